//! Bluetooth discovery of nearby robots for pairing

use anyhow::Result;
use bluer::{Adapter, AdapterEvent, Address, Device};
use futures::StreamExt;
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};

/// Configuration for a discovery scan
#[derive(Debug, Clone)]
pub struct BtDiscoveryConfig {
    /// How long to scan for devices
    pub scan_duration: Duration,
    /// Only list devices whose name starts with this prefix
    pub name_prefix: Option<String>,
}

impl Default for BtDiscoveryConfig {
    fn default() -> Self {
        Self {
            scan_duration: Duration::from_secs(10),
            name_prefix: None,
        }
    }
}

/// A device that could be a robot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RobotDevice {
    pub address: Address,
    pub name: Option<String>,
    /// Signal strength (if available)
    pub rssi: Option<i16>,
    pub paired: bool,
}

impl RobotDevice {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Unknown Device")
    }

    async fn read(device: &Device) -> Self {
        Self {
            address: device.address(),
            name: device.name().await.ok().flatten(),
            rssi: device.rssi().await.ok().flatten(),
            paired: device.is_paired().await.unwrap_or(false),
        }
    }
}

/// List paired devices, then scan for new ones for `scan_duration`.
///
/// Results are ordered paired first, then by signal strength.
pub async fn discover_robots(
    adapter: &Adapter,
    config: &BtDiscoveryConfig,
) -> Result<Vec<RobotDevice>> {
    let mut devices = Vec::new();
    let mut seen: HashSet<Address> = HashSet::new();
    let prefix = config.name_prefix.as_deref();

    for address in adapter.device_addresses().await? {
        let Ok(device) = adapter.device(address) else {
            continue;
        };
        let found = RobotDevice::read(&device).await;
        if found.paired && matches_prefix(found.name.as_deref(), prefix) {
            seen.insert(address);
            devices.push(found);
        }
    }

    let discover = adapter.discover_devices().await?;
    tokio::pin!(discover);

    let scan = timeout(config.scan_duration, async {
        while let Some(event) = discover.next().await {
            let AdapterEvent::DeviceAdded(address) = event else {
                continue;
            };
            if !seen.insert(address) {
                continue;
            }
            let Ok(device) = adapter.device(address) else {
                continue;
            };
            let found = RobotDevice::read(&device).await;
            if matches_prefix(found.name.as_deref(), prefix) {
                debug!("[BT] Found {} ({})", found.display_name(), address);
                devices.push(found);
            }
        }
    })
    .await;

    if scan.is_err() {
        info!("[BT] Discovery scan completed");
    }

    rank_devices(&mut devices);
    Ok(devices)
}

fn matches_prefix(name: Option<&str>, prefix: Option<&str>) -> bool {
    match prefix {
        None => true,
        Some(prefix) => name.is_some_and(|name| name.starts_with(prefix)),
    }
}

fn rank_devices(devices: &mut [RobotDevice]) {
    devices.sort_by(|a, b| {
        b.paired
            .cmp(&a.paired)
            .then_with(|| b.rssi.unwrap_or(i16::MIN).cmp(&a.rssi.unwrap_or(i16::MIN)))
    });
}

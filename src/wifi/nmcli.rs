//! NetworkManager-backed WiFi platform

use async_trait::async_trait;
use std::io;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::process::Command;
use tracing::{debug, info};

use super::platform::{NetworkHandle, NetworkRequest, WifiPlatform};
use super::scan::AccessPoint;
use super::WifiError;

/// Drives `nmcli` to join and leave robot access points.
pub struct NmcliPlatform {
    program: String,
    next_id: AtomicU64,
}

impl NmcliPlatform {
    pub fn new() -> Self {
        Self::with_program("nmcli")
    }

    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            next_id: AtomicU64::new(1),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String, WifiError> {
        debug!("[WiFi] {} {}", self.program, args.join(" "));
        let output = Command::new(&self.program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => {
                    WifiError::Platform(format!("{} not found", self.program))
                }
                io::ErrorKind::PermissionDenied => WifiError::PermissionDenied(e.to_string()),
                _ => WifiError::Platform(e.to_string()),
            })?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(classify_failure(&String::from_utf8_lossy(&output.stderr)))
        }
    }

    /// Connected WiFi device and its IPv4 address
    async fn wifi_device(&self) -> Result<(Option<String>, Option<IpAddr>), WifiError> {
        let devices = self.run(&["-t", "-f", "DEVICE,TYPE,STATE", "device"]).await?;
        let Some(device) = parse_wifi_device(&devices) else {
            return Ok((None, None));
        };
        let addresses = self
            .run(&["-g", "IP4.ADDRESS", "device", "show", &device])
            .await?;
        Ok((Some(device), parse_ip4_address(&addresses)))
    }
}

impl Default for NmcliPlatform {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WifiPlatform for NmcliPlatform {
    async fn current_ssid(&self) -> Result<Option<String>, WifiError> {
        let listing = self.run(&["-t", "-f", "ACTIVE,SSID", "device", "wifi"]).await?;
        Ok(parse_active_ssid(&listing))
    }

    async fn request_network(&self, request: &NetworkRequest) -> Result<NetworkHandle, WifiError> {
        let ssid = match &request.ssid {
            Some(ssid) => {
                let mut args = vec!["device", "wifi", "connect", ssid.as_str()];
                if let Some(passphrase) = &request.passphrase {
                    args.extend(["password", passphrase.as_str()]);
                }
                self.run(&args).await?;
                info!("[WiFi] nmcli joined {}", ssid);
                ssid.clone()
            }
            None => self
                .current_ssid()
                .await?
                .ok_or_else(|| WifiError::Unavailable("no active WiFi network".into()))?,
        };

        let (interface, local_addr) = self.wifi_device().await?;
        Ok(NetworkHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            ssid,
            interface,
            local_addr,
        })
    }

    async fn release_network(&self, handle: &NetworkHandle) -> Result<(), WifiError> {
        self.run(&["connection", "down", "id", &handle.ssid]).await?;
        info!("[WiFi] nmcli left {}", handle.ssid);
        Ok(())
    }

    async fn scan(&self) -> Result<Vec<AccessPoint>, WifiError> {
        let listing = self
            .run(&["-t", "-f", "SSID,SIGNAL", "device", "wifi", "list", "--rescan", "yes"])
            .await?;
        Ok(parse_scan(&listing))
    }
}

fn classify_failure(stderr: &str) -> WifiError {
    let message = stderr.trim().to_string();
    let lower = message.to_lowercase();
    if lower.contains("not authorized") || lower.contains("insufficient privileges") {
        WifiError::PermissionDenied(message)
    } else if lower.contains("no network with ssid") || lower.contains("no wi-fi device") {
        WifiError::Unavailable(message)
    } else if lower.contains("secrets were required") || lower.contains("invalid") {
        WifiError::MalformedRequest(message)
    } else {
        WifiError::Platform(message)
    }
}

/// Split a terse-mode line on unescaped colons
fn split_terse(line: &str) -> Vec<String> {
    let mut fields = vec![String::new()];
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    if let Some(field) = fields.last_mut() {
                        field.push(escaped);
                    }
                }
            }
            ':' => fields.push(String::new()),
            _ => {
                if let Some(field) = fields.last_mut() {
                    field.push(c);
                }
            }
        }
    }
    fields
}

fn parse_active_ssid(listing: &str) -> Option<String> {
    listing.lines().find_map(|line| {
        let fields = split_terse(line);
        match fields.as_slice() {
            [active, ssid] if active == "yes" && !ssid.is_empty() => Some(ssid.clone()),
            _ => None,
        }
    })
}

fn parse_wifi_device(listing: &str) -> Option<String> {
    listing.lines().find_map(|line| {
        let fields = split_terse(line);
        match fields.as_slice() {
            [device, kind, state] if kind == "wifi" && state == "connected" => Some(device.clone()),
            _ => None,
        }
    })
}

fn parse_scan(listing: &str) -> Vec<AccessPoint> {
    listing
        .lines()
        .filter_map(|line| {
            let fields = split_terse(line);
            match fields.as_slice() {
                [ssid, signal] if !ssid.is_empty() => {
                    Some(AccessPoint::new(ssid.clone(), signal.trim().parse().unwrap_or(0)))
                }
                _ => None,
            }
        })
        .collect()
}

fn parse_ip4_address(output: &str) -> Option<IpAddr> {
    output
        .split(['\n', '|'])
        .map(str::trim)
        .find_map(|entry| entry.split('/').next()?.parse().ok())
}

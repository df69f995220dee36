//! Bluetooth adapter access and serial-port service checks

use anyhow::{anyhow, bail, Result};
use bluer::{Adapter, Address, Uuid};
use tracing::{debug, info};

/// Serial Port Profile service class the robot's RFCOMM module exposes
pub const SERIAL_PORT_UUID: Uuid = Uuid::from_u128(0x0000_1101_0000_1000_8000_0080_5f9b_34fb);

/// Parse a `AA:BB:CC:DD:EE:FF` device address
pub fn parse_address(text: &str) -> Result<Address> {
    text.trim()
        .parse::<Address>()
        .map_err(|_| anyhow!("Invalid Bluetooth address: {}", text))
}

/// Get the default Bluetooth adapter, which must be powered on
pub async fn get_adapter() -> Result<Adapter> {
    let session = bluer::Session::new().await?;
    let adapter = session.default_adapter().await?;
    if !adapter.is_powered().await? {
        bail!("Bluetooth adapter {} is powered off", adapter.name());
    }
    Ok(adapter)
}

/// Check that a device advertises the serial port service.
///
/// Devices whose service list has not been resolved yet are let through;
/// the RFCOMM connect itself is the final check.
pub async fn verify_serial_port(address: Address) -> Result<()> {
    let adapter = get_adapter().await?;
    let device = adapter.device(address)?;

    match device.uuids().await? {
        Some(uuids) if !uuids.contains(&SERIAL_PORT_UUID) => {
            bail!("{} does not offer the serial port service", address)
        }
        Some(_) => {
            info!("[BT] {} offers the serial port service", address);
            Ok(())
        }
        None => {
            debug!("[BT] Services of {} not resolved, skipping check", address);
            Ok(())
        }
    }
}

//! RFCOMM connector for the robot's Bluetooth serial module

use crate::transport::bt_service;
use crate::transport::traits::{BoxedStream, TransportConnector, TransportStream};
use anyhow::{Context as _, Result};
use async_trait::async_trait;
use bluer::rfcomm::{SocketAddr as RfcommAddr, Stream as RfcommStream};
use bluer::Address;
use tracing::info;

/// Default RFCOMM channel of the robot's serial module
pub const DEFAULT_RFCOMM_CHANNEL: u8 = 1;

impl TransportStream for RfcommStream {
    fn peer(&self) -> String {
        self.peer_addr()
            .map(|addr| addr.addr.to_string())
            .unwrap_or_else(|_| "unknown".into())
    }
}

/// Configuration for RFCOMM connector
#[derive(Debug, Clone)]
pub struct RfcommConfig {
    /// Robot device address
    pub address: Address,
    /// RFCOMM channel number
    pub channel: u8,
    /// Check the advertised services before connecting
    pub verify_service: bool,
}

/// Opens the serial link to one robot
pub struct RfcommConnector {
    config: RfcommConfig,
}

impl RfcommConnector {
    pub fn new(config: RfcommConfig) -> Self {
        Self { config }
    }

    /// Connector for `address` that checks the serial port service first
    pub fn with_address(address: Address, channel: u8) -> Self {
        Self::new(RfcommConfig {
            address,
            channel,
            verify_service: true,
        })
    }
}

#[async_trait]
impl TransportConnector for RfcommConnector {
    async fn connect(&self) -> Result<BoxedStream> {
        let address = self.config.address;
        if self.config.verify_service {
            bt_service::verify_serial_port(address).await?;
        }

        info!("[BT] Opening RFCOMM to {} channel {}", address, self.config.channel);
        let stream = RfcommStream::connect(RfcommAddr::new(address, self.config.channel))
            .await
            .with_context(|| format!("RFCOMM connect to {} failed", address))?;

        Ok(Box::new(stream))
    }

    fn name(&self) -> &'static str {
        "Bluetooth"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connector_with_address() {
        let addr = Address::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        let connector = RfcommConnector::with_address(addr, 5);
        assert_eq!(connector.config.address, addr);
        assert_eq!(connector.config.channel, 5);
        assert!(connector.config.verify_service);
        assert_eq!(connector.name(), "Bluetooth");
    }
}

//! TCP transport standing in for the Bluetooth serial link during development

use crate::transport::traits::{BoxedStream, TransportConnector, TransportStream};
use anyhow::{Context as _, Result};
use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::debug;

impl TransportStream for TcpStream {
    fn peer(&self) -> String {
        self.peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".into())
    }
}

/// Connects to robot-sim's serial port in place of a Bluetooth device
pub struct TcpConnector {
    address: String,
}

impl TcpConnector {
    pub fn new_simulation(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

#[async_trait]
impl TransportConnector for TcpConnector {
    async fn connect(&self) -> Result<BoxedStream> {
        debug!("[BT-SIM] Connecting to {}", self.address);
        let stream = TcpStream::connect(&self.address)
            .await
            .with_context(|| format!("TCP connect to {} failed", self.address))?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }

    fn name(&self) -> &'static str {
        "Bluetooth (TCP simulation)"
    }
}

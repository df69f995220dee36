//! Command senders for each transport

use async_trait::async_trait;
use robot_link_shared::{LinkError, RobotCommand, Transport};
use tracing::debug;

use super::report::CommandReply;
use crate::transport::StreamWriter;

/// Delivers encoded commands over one live session
#[async_trait]
pub trait CommandSender: Send + Sync {
    fn transport(&self) -> Transport;

    /// Where a command with `label` is going, for progress reports
    fn target(&self, label: &str) -> String;

    async fn send(&self, command: &RobotCommand) -> Result<CommandReply, LinkError>;
}

/// Writes Bluetooth literals to the serial stream
pub struct StreamCommandSender {
    writer: StreamWriter,
    peer: String,
}

impl StreamCommandSender {
    pub fn new(writer: StreamWriter, peer: impl Into<String>) -> Self {
        Self {
            writer,
            peer: peer.into(),
        }
    }
}

#[async_trait]
impl CommandSender for StreamCommandSender {
    fn transport(&self) -> Transport {
        Transport::Bluetooth
    }

    fn target(&self, _label: &str) -> String {
        self.peer.clone()
    }

    async fn send(&self, command: &RobotCommand) -> Result<CommandReply, LinkError> {
        let bytes = command.to_bluetooth_bytes();
        self.writer.write(&bytes).await?;
        debug!("[CMD] Wrote {:?} to {}", command.bluetooth_literal(), self.peer);
        Ok(CommandReply::Written { bytes: bytes.len() })
    }
}

//! Robot command delivery
//!
//! This module handles:
//! - Sending encoded commands over the active session
//! - Reporting each command's progress and outcome in order

mod http;
mod report;
mod sender;

pub use http::{request_budget, HttpCommandSender};
pub use report::{preview, CommandReply, CommandReport};
pub use sender::{CommandSender, StreamCommandSender};

use robot_link_shared::{LinkError, RobotCommand};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::connection::ConnectionEvent;

/// Send one command, reporting `Sending` before any I/O and then exactly one outcome.
pub async fn dispatch(
    sender: &dyn CommandSender,
    command: RobotCommand,
    label: String,
    events: &mpsc::Sender<ConnectionEvent>,
) -> Result<CommandReply, LinkError> {
    report(
        events,
        CommandReport::Sending {
            label: label.clone(),
            target: sender.target(&label),
        },
    )
    .await;

    let result = sender.send(&command).await;
    match &result {
        Ok(reply) => {
            info!("[CMD] {} ({}) -> {:?}", label, sender.transport(), reply);
            report(
                events,
                CommandReport::Result {
                    label,
                    reply: reply.clone(),
                },
            )
            .await;
        }
        Err(error) => {
            warn!("[CMD] {} ({}) failed: {}", label, sender.transport(), error);
            report(
                events,
                CommandReport::Error {
                    label,
                    error: error.clone(),
                },
            )
            .await;
        }
    }
    result
}

async fn report(events: &mpsc::Sender<ConnectionEvent>, report: CommandReport) {
    if events.send(ConnectionEvent::Command(report)).await.is_err() {
        tracing::debug!("[CMD] Event receiver dropped");
    }
}

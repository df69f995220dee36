//! Command lifecycle reports

use robot_link_shared::LinkError;

/// What the robot side returned for a delivered command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandReply {
    /// Bytes written to the serial stream
    Written { bytes: usize },
    /// HTTP status and raw body from the robot's control server
    Http { status: u16, body: String },
}

/// Progress of one command, reported in order: `Sending`, then exactly one
/// of `Result` or `Error`.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandReport {
    Sending { label: String, target: String },
    Result { label: String, reply: CommandReply },
    Error { label: String, error: LinkError },
}

impl CommandReport {
    /// Bluetooth literal or WiFi endpoint path of the command
    pub fn label(&self) -> &str {
        match self {
            CommandReport::Sending { label, .. }
            | CommandReport::Result { label, .. }
            | CommandReport::Error { label, .. } => label,
        }
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, CommandReport::Sending { .. })
    }

    /// One-line summary for display, with HTTP bodies cut to `preview_len` characters
    pub fn status_line(&self, preview_len: usize) -> String {
        match self {
            CommandReport::Sending { label, .. } => format!("Command: {} (sending...)", label),
            CommandReport::Result {
                label,
                reply: CommandReply::Written { .. },
            } => format!("Command: {} (sent)", label),
            CommandReport::Result {
                label,
                reply: CommandReply::Http { status, body },
            } => {
                let preview = preview(body, preview_len);
                if preview.is_empty() {
                    format!("Command: {} (HTTP {})", label, status)
                } else {
                    format!("Command: {} (HTTP {}) {}", label, status, preview)
                }
            }
            CommandReport::Error { label, error } => {
                format!("Command: {} (FAILED: {})", label, error)
            }
        }
    }
}

/// Trimmed body, cut to `max` characters with a trailing ellipsis
pub fn preview(body: &str, max: usize) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= max {
        return trimmed.to_string();
    }
    let mut cut: String = trimmed.chars().take(max).collect();
    cut.push_str("...");
    cut
}

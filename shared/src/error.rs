//! Error taxonomy for the robot link

use thiserror::Error;

/// Errors raised while parsing or encoding robot commands
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Empty command")]
    Empty,

    #[error("Unknown command: {0:?}")]
    UnknownCommand(String),

    #[error("Servo index out of range: {0} (expected 1-8)")]
    InvalidServoIndex(i64),

    #[error("Malformed servo command: {0:?}")]
    MalformedServo(String),

    #[error("{command} has no {transport} encoding")]
    NoEncoding {
        command: String,
        transport: &'static str,
    },
}

/// Errors surfaced by the connection layer.
///
/// Messages are carried as strings so errors can travel inside cloned
/// connection events.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// Device unreachable, service missing, or the link could not be opened
    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    /// Read or write error on an established session
    #[error("I/O failure: {0}")]
    Io(String),

    /// WiFi network grant or HTTP round-trip took too long
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Operation attempted with no live session
    #[error("not connected")]
    NotConnected,

    /// The OS refused the Bluetooth or WiFi operation
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid command: {0}")]
    InvalidCommand(#[from] ProtocolError),

    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl LinkError {
    /// Whether this error means the established session is gone
    pub fn is_session_loss(&self) -> bool {
        matches!(self, LinkError::Io(_))
    }
}

impl From<std::io::Error> for LinkError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => LinkError::PermissionDenied(err.to_string()),
            std::io::ErrorKind::TimedOut => LinkError::Timeout(err.to_string()),
            _ => LinkError::Io(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_io_error_classification() {
        let denied: LinkError = io::Error::new(io::ErrorKind::PermissionDenied, "nope").into();
        assert!(matches!(denied, LinkError::PermissionDenied(_)));

        let broken: LinkError = io::Error::new(io::ErrorKind::BrokenPipe, "pipe").into();
        assert!(broken.is_session_loss());

        let timeout: LinkError = io::Error::new(io::ErrorKind::TimedOut, "slow").into();
        assert!(!timeout.is_session_loss());
    }

    #[test]
    fn test_not_connected_message() {
        assert_eq!(LinkError::NotConnected.to_string(), "not connected");
    }
}

//! Robot Link Shared Protocol Types
//!
//! This crate provides the I/O-free pieces shared by the controller, the
//! robot simulator and the tests: endpoints, the command vocabulary and its
//! wire encodings, telemetry line framing, connection state machines and the
//! error taxonomy.

pub mod codec;
pub mod error;
pub mod protocol;
pub mod state_machine;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

pub use codec::{LineFramer, ReceiveBuffer};
pub use error::{LinkError, ProtocolError};
pub use protocol::RobotCommand;
pub use state_machine::{
    ConnectionState, ConnectionStateMachine, LinkEvent, ReconnectPhase, ReconnectTracker,
    RetryDecision, TransitionResult,
};

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Timing and sizing parameters for the robot link
pub mod link {
    /// Delay between automatic reconnect attempts
    pub const RECONNECT_DELAY_MS: u64 = 5000;

    /// Reconnect attempts before giving up (controller screen)
    pub const MAX_RECONNECT_ATTEMPTS: u32 = 3;

    /// Reconnect attempts used by the long-running background supervisor
    pub const MAX_BACKGROUND_RECONNECT_ATTEMPTS: u32 = 5;

    /// HTTP connect timeout for WiFi commands
    pub const HTTP_CONNECT_TIMEOUT_MS: u64 = 4000;

    /// HTTP read timeout for WiFi commands
    pub const HTTP_READ_TIMEOUT_MS: u64 = 4000;

    /// Wait for the platform to grant a freshly requested WiFi network
    pub const WIFI_REQUEST_TIMEOUT_MS: u64 = 15000;

    /// Wait for a best-effort rebind to an already known WiFi network
    pub const WIFI_REBIND_TIMEOUT_MS: u64 = 5000;

    /// Characters of an HTTP body shown in a status line
    pub const BODY_PREVIEW_LEN: usize = 120;

    /// Completed telemetry lines kept for display
    pub const RECEIVE_HISTORY_LINES: usize = 6;

    /// Access point name the robot firmware ships with
    pub const DEFAULT_WIFI_SSID: &str = "Robot_AP";

    /// WPA2 passphrase the robot firmware ships with
    pub const DEFAULT_WIFI_PASSPHRASE: &str = "12345678";

    /// Default address of the robot's access point HTTP server
    pub const DEFAULT_WIFI_TARGET: &str = "192.168.4.1:8888";

    /// Serial Port Profile service class UUID
    pub const SERIAL_PORT_SERVICE_UUID: &str = "00001101-0000-1000-8000-00805f9b34fb";
}

/// Physical transport used to reach a robot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Bluetooth,
    Wifi,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Bluetooth => write!(f, "Bluetooth"),
            Transport::Wifi => write!(f, "WiFi"),
        }
    }
}

/// How to reach one robot. Immutable for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RobotEndpoint {
    /// Classic Bluetooth serial link to a device MAC address
    Bluetooth {
        robot_id: Option<String>,
        address: String,
    },
    /// HTTP control server behind the robot's own access point
    Wifi {
        robot_id: Option<String>,
        ssid: String,
        passphrase: String,
        /// `ip:port` of the robot's HTTP server
        target: String,
    },
}

impl RobotEndpoint {
    /// Bluetooth endpoint without a stored robot record
    pub fn bluetooth(address: impl Into<String>) -> Self {
        Self::Bluetooth {
            robot_id: None,
            address: address.into(),
        }
    }

    /// WiFi endpoint at the default robot address
    pub fn wifi(ssid: impl Into<String>, passphrase: impl Into<String>) -> Self {
        Self::Wifi {
            robot_id: None,
            ssid: ssid.into(),
            passphrase: passphrase.into(),
            target: link::DEFAULT_WIFI_TARGET.into(),
        }
    }

    /// Attach the id of the robot record to keep in sync
    pub fn with_robot_id(mut self, id: impl Into<String>) -> Self {
        match &mut self {
            Self::Bluetooth { robot_id, .. } | Self::Wifi { robot_id, .. } => {
                *robot_id = Some(id.into());
            }
        }
        self
    }

    /// Override the WiFi target (`ip:port`); ignored for Bluetooth
    pub fn with_target(mut self, new_target: impl Into<String>) -> Self {
        if let Self::Wifi { target, .. } = &mut self {
            *target = new_target.into();
        }
        self
    }

    pub fn transport(&self) -> Transport {
        match self {
            Self::Bluetooth { .. } => Transport::Bluetooth,
            Self::Wifi { .. } => Transport::Wifi,
        }
    }

    pub fn robot_id(&self) -> Option<&str> {
        match self {
            Self::Bluetooth { robot_id, .. } | Self::Wifi { robot_id, .. } => robot_id.as_deref(),
        }
    }

    /// MAC address for Bluetooth, SSID for WiFi
    pub fn address(&self) -> &str {
        match self {
            Self::Bluetooth { address, .. } => address,
            Self::Wifi { ssid, .. } => ssid,
        }
    }
}

impl fmt::Display for RobotEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bluetooth { address, .. } => write!(f, "bt://{}", address),
            Self::Wifi { ssid, target, .. } => write!(f, "wifi://{}@{}", ssid, target),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wifi_endpoint_defaults() {
        let endpoint = RobotEndpoint::wifi("Robot_AP", "12345678");
        assert_eq!(endpoint.transport(), Transport::Wifi);
        assert_eq!(endpoint.address(), "Robot_AP");
        assert_eq!(endpoint.to_string(), "wifi://Robot_AP@192.168.4.1:8888");
    }

    #[test]
    fn test_endpoint_builders() {
        let endpoint = RobotEndpoint::bluetooth("00:11:22:33:44:55")
            .with_robot_id("r-1")
            .with_target("ignored:1");
        assert_eq!(endpoint.robot_id(), Some("r-1"));
        assert_eq!(endpoint.to_string(), "bt://00:11:22:33:44:55");

        let endpoint = RobotEndpoint::wifi("AP", "pw").with_target("127.0.0.1:8080");
        assert!(matches!(endpoint, RobotEndpoint::Wifi { ref target, .. } if target == "127.0.0.1:8080"));
    }

    #[test]
    fn test_transport_display() {
        assert_eq!(Transport::Bluetooth.to_string(), "Bluetooth");
        assert_eq!(Transport::Wifi.to_string(), "WiFi");
    }
}

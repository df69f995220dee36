//! WiFi network selection for robots that host their own access point
//!
//! This module handles:
//! - Requesting the robot's network without requiring internet access
//! - Binding command traffic to the granted network
//! - Detecting when the device leaves the robot's network
//! - Scanning for robot access points

mod binder;
mod nmcli;
mod platform;
mod scan;

pub use binder::{BinderEvent, NetworkBinding, WifiNetworkBinder};
pub use nmcli::NmcliPlatform;
pub use platform::{NetworkHandle, NetworkRequest, StaticPlatform, WifiPlatform};
pub use scan::{filter_robot_aps, is_robot_ssid, AccessPoint};

#[cfg(test)]
pub(crate) use platform::testing;

use robot_link_shared::LinkError;
use std::time::Duration;
use thiserror::Error;

/// Failures of WiFi network requests
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WifiError {
    #[error("WiFi permission denied: {0}")]
    PermissionDenied(String),

    #[error("Malformed network request: {0}")]
    MalformedRequest(String),

    #[error("No network granted within {0:?}")]
    Timeout(Duration),

    #[error("Network unavailable: {0}")]
    Unavailable(String),

    #[error("Network lost: {0}")]
    NetworkLost(String),

    #[error("WiFi platform error: {0}")]
    Platform(String),
}

impl From<WifiError> for LinkError {
    fn from(err: WifiError) -> Self {
        match err {
            WifiError::PermissionDenied(msg) => LinkError::PermissionDenied(msg),
            WifiError::Timeout(_) => LinkError::Timeout(err.to_string()),
            WifiError::NetworkLost(msg) => LinkError::Io(msg),
            WifiError::MalformedRequest(_) | WifiError::Unavailable(_) | WifiError::Platform(_) => {
                LinkError::ConnectFailed(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wifi_error_mapping() {
        assert!(matches!(
            LinkError::from(WifiError::PermissionDenied("no".into())),
            LinkError::PermissionDenied(_)
        ));
        assert!(matches!(
            LinkError::from(WifiError::Timeout(Duration::from_secs(15))),
            LinkError::Timeout(_)
        ));
        assert!(LinkError::from(WifiError::NetworkLost("gone".into())).is_session_loss());
        assert!(matches!(
            LinkError::from(WifiError::MalformedRequest("ssid".into())),
            LinkError::ConnectFailed(_)
        ));
    }
}

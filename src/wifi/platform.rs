//! Platform seam for WiFi network requests

use async_trait::async_trait;
use std::net::IpAddr;

use super::scan::AccessPoint;
use super::WifiError;

/// Longest SSID allowed by 802.11
const MAX_SSID_BYTES: usize = 32;
/// WPA2 passphrase length bounds
const WPA2_PASSPHRASE_LEN: std::ops::RangeInclusive<usize> = 8..=63;

/// A request for a WiFi network.
///
/// Robot access points have no internet uplink, so requests never require
/// the internet capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkRequest {
    /// Specific network to join; `None` accepts whichever WiFi network is up
    pub ssid: Option<String>,
    pub passphrase: Option<String>,
}

impl NetworkRequest {
    /// Join a specific access point
    pub fn for_access_point(ssid: impl Into<String>, passphrase: impl Into<String>) -> Self {
        let passphrase = passphrase.into();
        Self {
            ssid: Some(ssid.into()),
            passphrase: (!passphrase.is_empty()).then_some(passphrase),
        }
    }

    /// Accept the WiFi network the device is already on
    pub fn any_wifi() -> Self {
        Self {
            ssid: None,
            passphrase: None,
        }
    }

    pub fn validate(&self) -> Result<(), WifiError> {
        if let Some(ssid) = &self.ssid {
            if ssid.is_empty() || ssid.len() > MAX_SSID_BYTES {
                return Err(WifiError::MalformedRequest(format!(
                    "SSID must be 1-{} bytes",
                    MAX_SSID_BYTES
                )));
            }
        }
        if let Some(passphrase) = &self.passphrase {
            if !WPA2_PASSPHRASE_LEN.contains(&passphrase.len()) {
                return Err(WifiError::MalformedRequest(
                    "WPA2 passphrase must be 8-63 characters".into(),
                ));
            }
        }
        Ok(())
    }
}

/// A granted network that command traffic can be bound to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkHandle {
    /// Platform-assigned id, 0 for a network the device joined on its own
    pub id: u64,
    pub ssid: String,
    /// Interface to pin sockets to
    pub interface: Option<String>,
    /// Local address on the granted network
    pub local_addr: Option<IpAddr>,
}

impl NetworkHandle {
    /// Handle for a network the device is already associated with; traffic
    /// follows the default route
    pub fn unbound(ssid: impl Into<String>) -> Self {
        Self {
            id: 0,
            ssid: ssid.into(),
            interface: None,
            local_addr: None,
        }
    }

    pub fn is_pinned(&self) -> bool {
        self.interface.is_some() || self.local_addr.is_some()
    }
}

/// OS-specific WiFi operations
#[async_trait]
pub trait WifiPlatform: Send + Sync {
    /// SSID the device is currently associated with
    async fn current_ssid(&self) -> Result<Option<String>, WifiError>;

    /// Issue a network request and wait until the platform grants it
    async fn request_network(&self, request: &NetworkRequest) -> Result<NetworkHandle, WifiError>;

    /// Withdraw a previously granted request
    async fn release_network(&self, handle: &NetworkHandle) -> Result<(), WifiError>;

    /// Networks currently in range
    async fn scan(&self) -> Result<Vec<AccessPoint>, WifiError>;
}

/// Platform for a device that is already on the robot's network.
///
/// Useful against the robot simulator, where the "access point" is the
/// loopback interface.
#[derive(Debug, Clone)]
pub struct StaticPlatform {
    ssid: String,
}

impl StaticPlatform {
    pub fn new(ssid: impl Into<String>) -> Self {
        Self { ssid: ssid.into() }
    }
}

#[async_trait]
impl WifiPlatform for StaticPlatform {
    async fn current_ssid(&self) -> Result<Option<String>, WifiError> {
        Ok(Some(self.ssid.clone()))
    }

    async fn request_network(&self, request: &NetworkRequest) -> Result<NetworkHandle, WifiError> {
        match &request.ssid {
            Some(ssid) if *ssid != self.ssid => Err(WifiError::Unavailable(ssid.clone())),
            _ => Ok(NetworkHandle::unbound(self.ssid.clone())),
        }
    }

    async fn release_network(&self, _handle: &NetworkHandle) -> Result<(), WifiError> {
        Ok(())
    }

    async fn scan(&self) -> Result<Vec<AccessPoint>, WifiError> {
        Ok(vec![AccessPoint::new(self.ssid.clone(), 100)])
    }
}

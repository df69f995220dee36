//! Link configuration
//!
//! Defaults match the robot firmware; a TOML file may override any field.
//! Durations are written in milliseconds (`*_ms` keys).

use anyhow::{bail, Context, Result};
use robot_link_shared::link;
use serde::{Deserialize, Deserializer};
use std::path::Path;
use std::time::Duration;

use crate::store::RobotRecord;

fn millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_millis)
}

/// Bluetooth transport mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BluetoothMode {
    /// Use real RFCOMM Bluetooth (requires BlueZ)
    Rfcomm,
    /// Use TCP simulation (for development against robot-sim)
    TcpSimulation,
}

impl Default for BluetoothMode {
    fn default() -> Self {
        if cfg!(feature = "rfcomm") {
            BluetoothMode::Rfcomm
        } else {
            BluetoothMode::TcpSimulation
        }
    }
}

/// Bluetooth configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// Bluetooth transport mode
    pub mode: BluetoothMode,
    /// RFCOMM channel number
    pub channel: u8,
    /// TCP simulation address (when mode is TcpSimulation)
    pub tcp_address: String,
    /// Check that the device advertises the serial port service before connecting
    pub verify_service: bool,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            mode: BluetoothMode::default(),
            channel: 1,
            tcp_address: "127.0.0.1:9000".into(),
            verify_service: true,
        }
    }
}

/// WiFi and HTTP configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WifiConfig {
    /// Robot HTTP server used when an endpoint does not name one
    pub default_target: String,
    #[serde(rename = "http_connect_timeout_ms", deserialize_with = "millis")]
    pub http_connect_timeout: Duration,
    #[serde(rename = "http_read_timeout_ms", deserialize_with = "millis")]
    pub http_read_timeout: Duration,
    /// Wait for a fresh network grant
    #[serde(rename = "request_timeout_ms", deserialize_with = "millis")]
    pub request_timeout: Duration,
    /// Wait for a best-effort rebind
    #[serde(rename = "rebind_timeout_ms", deserialize_with = "millis")]
    pub rebind_timeout: Duration,
    /// Characters of a response body kept in status lines
    pub body_preview_len: usize,
    /// How often the association monitor checks the current SSID
    #[serde(rename = "monitor_interval_ms", deserialize_with = "millis")]
    pub monitor_interval: Duration,
}

impl Default for WifiConfig {
    fn default() -> Self {
        Self {
            default_target: link::DEFAULT_WIFI_TARGET.into(),
            http_connect_timeout: Duration::from_millis(link::HTTP_CONNECT_TIMEOUT_MS),
            http_read_timeout: Duration::from_millis(link::HTTP_READ_TIMEOUT_MS),
            request_timeout: Duration::from_millis(link::WIFI_REQUEST_TIMEOUT_MS),
            rebind_timeout: Duration::from_millis(link::WIFI_REBIND_TIMEOUT_MS),
            body_preview_len: link::BODY_PREVIEW_LEN,
            monitor_interval: Duration::from_secs(1),
        }
    }
}

/// Reconnect policy configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Reconnect automatically after unexpected loss
    pub enabled: bool,
    /// Fixed delay before each attempt
    #[serde(rename = "delay_ms", deserialize_with = "millis")]
    pub delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            delay: Duration::from_millis(link::RECONNECT_DELAY_MS),
            max_attempts: link::MAX_RECONNECT_ATTEMPTS,
        }
    }
}

/// Configuration for the connection manager
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub bluetooth: BluetoothConfig,
    pub wifi: WifiConfig,
    pub reconnect: ReconnectConfig,
    /// Telemetry lines kept for display
    pub receive_history: usize,
    /// Capacity of the event channel
    pub event_capacity: usize,
    /// Seed records for the in-memory robot store
    pub robots: Vec<RobotRecord>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            bluetooth: BluetoothConfig::default(),
            wifi: WifiConfig::default(),
            reconnect: ReconnectConfig::default(),
            receive_history: link::RECEIVE_HISTORY_LINES,
            event_capacity: 100,
            robots: Vec::new(),
        }
    }
}

impl LinkConfig {
    /// Parse and validate a TOML document
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).context("invalid link configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the runtime cannot work with
    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("wifi.http_connect_timeout_ms", self.wifi.http_connect_timeout),
            ("wifi.http_read_timeout_ms", self.wifi.http_read_timeout),
            ("wifi.request_timeout_ms", self.wifi.request_timeout),
            ("wifi.rebind_timeout_ms", self.wifi.rebind_timeout),
            ("wifi.monitor_interval_ms", self.wifi.monitor_interval),
        ];
        for (key, value) in durations {
            if value.is_zero() {
                bail!("{} must be greater than zero", key);
            }
        }
        if self.event_capacity == 0 {
            bail!("event_capacity must be greater than zero");
        }
        if self.reconnect.max_attempts == 0 {
            bail!("reconnect.max_attempts must be at least 1");
        }
        Ok(())
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml(&text)
    }

    /// Load from `path` if given and present, defaults otherwise
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) if path.exists() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use robot_link_shared::Transport;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = LinkConfig::default();
        assert_eq!(config.bluetooth.channel, 1);
        assert_eq!(config.wifi.default_target, "192.168.4.1:8888");
        assert_eq!(config.wifi.http_connect_timeout, Duration::from_secs(4));
        assert_eq!(config.wifi.http_read_timeout, Duration::from_secs(4));
        assert_eq!(config.wifi.request_timeout, Duration::from_secs(15));
        assert_eq!(config.wifi.rebind_timeout, Duration::from_secs(5));
        assert_eq!(config.reconnect.delay, Duration::from_secs(5));
        assert_eq!(config.reconnect.max_attempts, 3);
        assert_eq!(config.receive_history, 6);
    }

    #[test]
    fn test_partial_toml_overrides() {
        let config = LinkConfig::from_toml(
            r#"
            [bluetooth]
            mode = "tcp_simulation"
            tcp_address = "127.0.0.1:9100"

            [reconnect]
            delay_ms = 250
            max_attempts = 5

            [[robots]]
            id = "r1"
            name = "Rover"
            mac_address = "00:11:22:33:44:55"
            connection_type = "bluetooth"
            "#,
        )
        .expect("parse");

        assert_eq!(config.bluetooth.mode, BluetoothMode::TcpSimulation);
        assert_eq!(config.bluetooth.tcp_address, "127.0.0.1:9100");
        assert_eq!(config.bluetooth.channel, 1);
        assert_eq!(config.reconnect.delay, Duration::from_millis(250));
        assert_eq!(config.reconnect.max_attempts, 5);
        assert!(config.reconnect.enabled);
        assert_eq!(config.robots.len(), 1);
        assert_eq!(config.robots[0].connection_type, Transport::Bluetooth);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "[wifi]\nbody_preview_len = 40").expect("write");

        let config = LinkConfig::load(file.path()).expect("load");
        assert_eq!(config.wifi.body_preview_len, 40);
        assert_eq!(config.wifi.http_read_timeout, Duration::from_secs(4));
    }

    #[test]
    fn test_zero_values_rejected() {
        assert!(LinkConfig::default().validate().is_ok());

        let err = LinkConfig::from_toml("[wifi]\nmonitor_interval_ms = 0").unwrap_err();
        assert!(err.to_string().contains("monitor_interval_ms"));
        assert!(LinkConfig::from_toml("[wifi]\nhttp_read_timeout_ms = 0").is_err());
        assert!(LinkConfig::from_toml("[wifi]\nrebind_timeout_ms = 0").is_err());
        assert!(LinkConfig::from_toml("event_capacity = 0").is_err());
        assert!(LinkConfig::from_toml("[reconnect]\nmax_attempts = 0").is_err());
        assert!(LinkConfig::from_toml("[reconnect]\ndelay_ms = 0").is_ok());
    }

    #[test]
    fn test_missing_file_means_defaults() {
        let config = LinkConfig::load_or_default(Some(Path::new("/nonexistent/robot-link.toml")))
            .expect("defaults");
        assert_eq!(config.event_capacity, 100);
        assert!(LinkConfig::from_toml("reconnect = 3").is_err());
    }
}

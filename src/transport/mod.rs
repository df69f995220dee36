//! Transport layer for robot links
//!
//! Bluetooth sessions are byte streams (RFCOMM, or TCP against the robot
//! simulator). WiFi sessions are a bound network used for HTTP requests.

#[cfg(feature = "rfcomm")]
pub mod bt_discovery;
#[cfg(feature = "rfcomm")]
pub mod bt_service;
#[cfg(feature = "rfcomm")]
pub mod rfcomm;
pub mod session;
pub mod tcp;
pub mod traits;

#[cfg(feature = "rfcomm")]
pub use bt_discovery::{discover_robots, BtDiscoveryConfig, RobotDevice};
#[cfg(feature = "rfcomm")]
pub use rfcomm::{RfcommConfig, RfcommConnector, DEFAULT_RFCOMM_CHANNEL};
pub use session::{
    connector_for, ChunkStream, NetworkSession, StreamSession, StreamWriter, TransportSession,
};
pub use tcp::TcpConnector;
pub use traits::{BoxedStream, TransportConnector, TransportStream};

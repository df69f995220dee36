//! Connectivity core for driving small robots over Bluetooth serial or WiFi HTTP
//!
//! A [`ConnectionManager`] owns at most one robot link. It opens sessions in
//! the background, streams telemetry lines, delivers commands on worker tasks
//! and reconnects after unexpected loss. Everything it does is reported as
//! [`ConnectionEvent`]s on a single ordered channel.

pub mod command;
pub mod config;
pub mod connection;
pub mod store;
pub mod transport;
pub mod wifi;

pub use command::{CommandReply, CommandReport};
pub use config::{BluetoothMode, LinkConfig};
pub use connection::{ConnectionEvent, ConnectionManager};
pub use store::{MemoryRobotStore, RobotRecord, RobotStore, StoreError};
pub use wifi::{AccessPoint, NmcliPlatform, StaticPlatform, WifiError, WifiPlatform};

pub use robot_link_shared::{
    ConnectionState, LinkError, ProtocolError, RobotCommand, RobotEndpoint, Transport,
};

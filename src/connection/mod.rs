//! Connection management for the robot link
//!
//! This module handles:
//! - Opening Bluetooth and WiFi sessions in the background
//! - Streaming telemetry lines from the robot
//! - Bounded, fixed-delay reconnection after unexpected loss

mod manager;
mod reconnect;

pub use manager::{ConnectionEvent, ConnectionManager};
pub use reconnect::{ReconnectOutcome, ReconnectPolicy};

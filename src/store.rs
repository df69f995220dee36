//! Robot store seam
//!
//! The controller keeps robot records elsewhere; the connection core only
//! reads a record and writes back its connected flag and last-connected
//! time. Persistence failures are logged and never affect connection state.

use parking_lot::RwLock;
use robot_link_shared::{now_ms, Transport};
use serde::Deserialize;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, warn};

/// A stored robot
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RobotRecord {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mac_address: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
    pub connection_type: Transport,
    #[serde(default)]
    pub connected: bool,
    /// Milliseconds since Unix epoch, 0 if never connected
    #[serde(default)]
    pub last_connected: u64,
}

impl RobotRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>, connection_type: Transport) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            mac_address: None,
            ip_address: None,
            connection_type,
            connected: false,
            last_connected: 0,
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Robot not found: {0}")]
    NotFound(String),

    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Robot record persistence used by the connection manager
pub trait RobotStore: Send + Sync {
    fn get_robot(&self, id: &str) -> Result<Option<RobotRecord>, StoreError>;

    fn update_robot(&self, record: &RobotRecord) -> Result<(), StoreError>;
}

/// In-memory store, seeded from configuration
#[derive(Debug, Default)]
pub struct MemoryRobotStore {
    robots: RwLock<HashMap<String, RobotRecord>>,
}

impl MemoryRobotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = RobotRecord>) -> Self {
        let store = Self::new();
        for record in records {
            store.insert(record);
        }
        store
    }

    pub fn insert(&self, record: RobotRecord) {
        self.robots.write().insert(record.id.clone(), record);
    }

    pub fn list(&self) -> Vec<RobotRecord> {
        let mut robots: Vec<_> = self.robots.read().values().cloned().collect();
        robots.sort_by(|a, b| a.id.cmp(&b.id));
        robots
    }
}

impl RobotStore for MemoryRobotStore {
    fn get_robot(&self, id: &str) -> Result<Option<RobotRecord>, StoreError> {
        Ok(self.robots.read().get(id).cloned())
    }

    fn update_robot(&self, record: &RobotRecord) -> Result<(), StoreError> {
        let mut robots = self.robots.write();
        match robots.get_mut(&record.id) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(record.id.clone())),
        }
    }
}

/// Persist the connected flag for a robot, logging failures
pub(crate) fn record_connection(store: &dyn RobotStore, robot_id: Option<&str>, connected: bool) {
    let Some(id) = robot_id else {
        return;
    };

    let result = store.get_robot(id).and_then(|record| {
        let mut record = record.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        record.connected = connected;
        if connected {
            record.last_connected = now_ms();
        }
        store.update_robot(&record)
    });

    match result {
        Ok(()) => debug!("[STORE] Robot {} connected={}", id, connected),
        Err(e) => warn!("[STORE] Failed to update robot {}: {}", id, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_connection_updates_flags() {
        let store = MemoryRobotStore::with_records([RobotRecord::new("r1", "Rover", Transport::Bluetooth)]);

        record_connection(&store, Some("r1"), true);
        let record = store.get_robot("r1").unwrap().unwrap();
        assert!(record.connected);
        assert!(record.last_connected > 0);

        record_connection(&store, Some("r1"), false);
        let after = store.get_robot("r1").unwrap().unwrap();
        assert!(!after.connected);
        assert_eq!(after.last_connected, record.last_connected);
    }

    #[test]
    fn test_missing_robot_is_not_fatal() {
        let store = MemoryRobotStore::new();
        record_connection(&store, Some("ghost"), true);
        record_connection(&store, None, true);
        assert!(store.list().is_empty());
        assert!(matches!(
            store.update_robot(&RobotRecord::new("ghost", "", Transport::Wifi)),
            Err(StoreError::NotFound(_))
        ));
    }
}

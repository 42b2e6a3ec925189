use super::TopologyResolver;
use crate::error::StoreError;
use crate::reading::{RoomId, ZoneId};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Placement {
    room_id: RoomId,
    zone_id: ZoneId,
}

/// Topology held in memory; `assign` both registers and moves sensors.
#[derive(Debug, Default)]
pub struct MemoryTopology {
    sensors: RwLock<BTreeMap<String, Placement>>,
}

impl MemoryTopology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(&self, guid: &str, room_id: RoomId, zone_id: ZoneId) {
        if let Ok(mut sensors) = self.sensors.write() {
            sensors.insert(guid.to_string(), Placement { room_id, zone_id });
        }
    }

    pub fn remove(&self, guid: &str) {
        if let Ok(mut sensors) = self.sensors.write() {
            sensors.remove(guid);
        }
    }

    fn matching(&self, keep: impl Fn(&Placement) -> bool) -> Result<Vec<String>, StoreError> {
        let sensors = self
            .sensors
            .read()
            .map_err(|_| StoreError::Unavailable("topology lock poisoned".to_string()))?;
        Ok(sensors
            .iter()
            .filter(|(_, placement)| keep(placement))
            .map(|(guid, _)| guid.clone())
            .collect())
    }
}

#[async_trait]
impl TopologyResolver for MemoryTopology {
    async fn resolve_room(&self, guid: &str) -> Result<Option<RoomId>, StoreError> {
        let sensors = self
            .sensors
            .read()
            .map_err(|_| StoreError::Unavailable("topology lock poisoned".to_string()))?;
        Ok(sensors.get(guid).map(|placement| placement.room_id))
    }

    async fn sensors_in_room(&self, room_id: RoomId) -> Result<Vec<String>, StoreError> {
        self.matching(|placement| placement.room_id == room_id)
    }

    async fn sensors_in_zone(&self, zone_id: ZoneId) -> Result<Vec<String>, StoreError> {
        self.matching(|placement| placement.zone_id == zone_id)
    }
}

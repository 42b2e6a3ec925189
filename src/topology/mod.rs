mod memory;
mod postgres;

pub use memory::MemoryTopology;
pub use postgres::PgTopology;

use crate::error::StoreError;
use crate::reading::{RoomId, ZoneId};
use async_trait::async_trait;
use std::collections::HashMap;

/// Read-only view of the current sensor → room → zone assignment, owned by
/// the CRUD service. Answers always reflect the assignment at call time.
#[async_trait]
pub trait TopologyResolver: Send + Sync {
    /// `None` when the sensor is unknown or has been deleted.
    async fn resolve_room(&self, guid: &str) -> Result<Option<RoomId>, StoreError>;

    /// Bulk form of [`TopologyResolver::resolve_room`]; unresolvable sensors
    /// are absent from the map.
    async fn resolve_rooms(&self, guids: &[String]) -> Result<HashMap<String, RoomId>, StoreError> {
        let mut rooms = HashMap::with_capacity(guids.len());
        for guid in guids {
            if let Some(room_id) = self.resolve_room(guid).await? {
                rooms.insert(guid.clone(), room_id);
            }
        }
        Ok(rooms)
    }

    async fn sensors_in_room(&self, room_id: RoomId) -> Result<Vec<String>, StoreError>;

    async fn sensors_in_zone(&self, zone_id: ZoneId) -> Result<Vec<String>, StoreError>;
}

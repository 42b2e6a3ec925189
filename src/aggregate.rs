use crate::error::PipelineError;
use crate::reading::{ReadingTotals, RoomId, RoomStatistic, ZoneId, ZoneStatistic};
use crate::store::ReadingStore;
use crate::topology::TopologyResolver;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Averages over committed readings, grouped by the sensors' current room.
///
/// Readings follow their sensor: moving a sensor to another room moves its
/// whole history with it. Staged readings are not visible until flushed.
#[derive(Clone)]
pub struct AggregationEngine {
    store: Arc<dyn ReadingStore>,
    topology: Arc<dyn TopologyResolver>,
}

impl AggregationEngine {
    pub fn new(store: Arc<dyn ReadingStore>, topology: Arc<dyn TopologyResolver>) -> Self {
        Self { store, topology }
    }

    pub async fn room_statistic(&self, room_id: RoomId) -> Result<RoomStatistic, PipelineError> {
        let guids = self.topology.sensors_in_room(room_id).await?;
        if guids.is_empty() {
            return Err(PipelineError::NoDataForRoom(room_id));
        }

        let per_sensor = self.store.totals_by_sensor(&guids).await?;
        let mut totals = ReadingTotals::default();
        for sensor_totals in per_sensor.values() {
            totals.merge(sensor_totals);
        }

        room_from_totals(room_id, &totals).ok_or(PipelineError::NoDataForRoom(room_id))
    }

    /// Rooms without committed readings are left out, so an empty zone is a
    /// successful, empty result.
    pub async fn zone_statistic(&self, zone_id: ZoneId) -> Result<ZoneStatistic, PipelineError> {
        let guids = self.topology.sensors_in_zone(zone_id).await?;
        if guids.is_empty() {
            return Ok(ZoneStatistic {
                zone_id,
                rooms: Vec::new(),
            });
        }

        let rooms = self.topology.resolve_rooms(&guids).await?;
        let resolved: Vec<String> = guids
            .into_iter()
            .filter(|guid| {
                if rooms.contains_key(guid) {
                    return true;
                }
                let err = PipelineError::TopologyLookupFailed(guid.clone());
                tracing::debug!(zone_id, error = %err, "excluding sensor from zone statistic");
                false
            })
            .collect();

        let per_sensor = self.store.totals_by_sensor(&resolved).await?;
        let mut by_room: BTreeMap<RoomId, ReadingTotals> = BTreeMap::new();
        for guid in &resolved {
            let (Some(room_id), Some(sensor_totals)) = (rooms.get(guid), per_sensor.get(guid))
            else {
                continue;
            };
            by_room.entry(*room_id).or_default().merge(sensor_totals);
        }

        Ok(ZoneStatistic {
            zone_id,
            rooms: by_room
                .iter()
                .filter_map(|(room_id, totals)| room_from_totals(*room_id, totals))
                .collect(),
        })
    }
}

fn room_from_totals(room_id: RoomId, totals: &ReadingTotals) -> Option<RoomStatistic> {
    totals
        .averages()
        .map(|(co2, tvoc)| RoomStatistic { co2, tvoc, room_id })
}

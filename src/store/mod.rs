mod memory;
mod postgres;

pub use memory::MemoryReadingStore;
pub use postgres::{PgReadingStore, DEFAULT_INSERT_CHUNK, MAX_INSERT_CHUNK};

use crate::error::StoreError;
use crate::reading::{NewReading, ReadingTotals};
use async_trait::async_trait;
use std::collections::HashMap;

/// Append-only store of committed readings.
#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Commits the whole batch or nothing. Rows whose staging key is already
    /// stored are skipped; the return value counts newly inserted rows only.
    async fn commit_batch(&self, batch: &[NewReading]) -> Result<u64, StoreError>;

    /// Per-sensor totals over every committed reading of the given sensors.
    /// Sensors without readings are absent from the map.
    async fn totals_by_sensor(
        &self,
        guids: &[String],
    ) -> Result<HashMap<String, ReadingTotals>, StoreError>;
}

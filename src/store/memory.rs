use super::ReadingStore;
use crate::error::StoreError;
use crate::reading::{DurableReading, NewReading, ReadingTotals};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[derive(Debug, Default)]
struct Table {
    rows: Vec<DurableReading>,
    keys: HashSet<String>,
}

/// Reading store kept in process memory, with the same idempotent-commit
/// contract as the Postgres table.
#[derive(Debug, Default)]
pub struct MemoryReadingStore {
    table: Mutex<Table>,
}

impl MemoryReadingStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Table>, StoreError> {
        self.table
            .lock()
            .map_err(|_| StoreError::Unavailable("reading store lock poisoned".to_string()))
    }

    pub fn readings(&self) -> Vec<DurableReading> {
        self.lock().map(|table| table.rows.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.lock().map(|table| table.rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ReadingStore for MemoryReadingStore {
    async fn commit_batch(&self, batch: &[NewReading]) -> Result<u64, StoreError> {
        let mut table = self.lock()?;
        let mut inserted = 0u64;
        for row in batch {
            if !table.keys.insert(row.staging_key.clone()) {
                continue;
            }
            let id = table.rows.len() as i64 + 1;
            table.rows.push(DurableReading {
                id,
                staging_key: Some(row.staging_key.clone()),
                guid: row.guid.clone(),
                co2: row.co2,
                tvoc: row.tvoc,
                battery_charge: row.battery_charge,
                committed_at: row.committed_at,
            });
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn totals_by_sensor(
        &self,
        guids: &[String],
    ) -> Result<HashMap<String, ReadingTotals>, StoreError> {
        let wanted: HashSet<&str> = guids.iter().map(String::as_str).collect();
        let table = self.lock()?;
        let mut totals: HashMap<String, ReadingTotals> = HashMap::new();
        for row in table.rows.iter().filter(|row| wanted.contains(row.guid.as_str())) {
            totals.entry(row.guid.clone()).or_default().add(row.co2, row.tvoc);
        }
        Ok(totals)
    }
}

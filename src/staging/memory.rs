use super::StagingBuffer;
use crate::error::StoreError;
use crate::reading::{Reading, StagingEntry};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// In-process staging buffer. Entries do not survive a restart.
#[derive(Debug, Default)]
pub struct MemoryStagingBuffer {
    entries: Mutex<BTreeMap<String, Reading>>,
}

impl MemoryStagingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Reading>>, StoreError> {
        self.entries
            .lock()
            .map_err(|_| StoreError::Unavailable("staging buffer lock poisoned".to_string()))
    }
}

#[async_trait]
impl StagingBuffer for MemoryStagingBuffer {
    async fn put(&self, key: &str, reading: &Reading) -> Result<(), StoreError> {
        let mut entries = self.lock()?;
        match entries.entry(key.to_string()) {
            Entry::Occupied(_) => Err(StoreError::DuplicateKey(key.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(reading.clone());
                Ok(())
            }
        }
    }

    fn scan_all(&self) -> BoxStream<'_, Result<StagingEntry, StoreError>> {
        let snapshot: Vec<Result<StagingEntry, StoreError>> = match self.lock() {
            Ok(entries) => entries
                .iter()
                .map(|(key, reading)| {
                    Ok(StagingEntry {
                        key: key.clone(),
                        reading: reading.clone(),
                    })
                })
                .collect(),
            Err(err) => vec![Err(err)],
        };
        stream::iter(snapshot).boxed()
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.lock()?.remove(key);
        Ok(())
    }

    async fn len(&self) -> Result<u64, StoreError> {
        Ok(self.lock()?.len() as u64)
    }
}

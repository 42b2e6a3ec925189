use crate::aggregate::AggregationEngine;
use crate::config::{Config, StagingBackend};
use crate::error::StoreError;
use crate::flush::{FlushCycle, PipelineStats};
use crate::ingest::Ingestor;
use crate::reading::{NewReading, Reading, ReadingTotals, StagingEntry};
use crate::staging::{MemoryStagingBuffer, StagingBuffer};
use crate::state::AppState;
use crate::store::{MemoryReadingStore, ReadingStore};
use crate::topology::MemoryTopology;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

pub fn reading(guid: &str, co2: i64, tvoc: i64) -> Reading {
    Reading {
        guid: guid.to_string(),
        co2,
        tvoc,
        battery_charge: 80,
    }
}

pub fn test_config() -> Config {
    Config {
        database_url: "postgresql://localhost/airq_test".to_string(),
        db_pool_size: 1,
        http_bind: "127.0.0.1:0".to_string(),
        flush_interval_ms: 50,
        insert_chunk_size: 1000,
        staging_backend: StagingBackend::Memory,
        ensure_schema: false,
        otlp_endpoint: None,
    }
}

/// Staging buffer that refuses every write.
pub struct FailingStagingBuffer;

#[async_trait]
impl StagingBuffer for FailingStagingBuffer {
    async fn put(&self, _key: &str, _reading: &Reading) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("staging buffer offline".to_string()))
    }

    fn scan_all(&self) -> BoxStream<'_, Result<StagingEntry, StoreError>> {
        stream::iter(vec![Err(StoreError::Unavailable(
            "staging buffer offline".to_string(),
        ))])
        .boxed()
    }

    async fn delete(&self, _key: &str) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("staging buffer offline".to_string()))
    }

    async fn len(&self) -> Result<u64, StoreError> {
        Err(StoreError::Unavailable("staging buffer offline".to_string()))
    }
}

/// Memory buffer whose deletes can be switched off.
#[derive(Default)]
pub struct StickyStagingBuffer {
    pub inner: MemoryStagingBuffer,
    pub fail_deletes: AtomicBool,
}

#[async_trait]
impl StagingBuffer for StickyStagingBuffer {
    async fn put(&self, key: &str, reading: &Reading) -> Result<(), StoreError> {
        self.inner.put(key, reading).await
    }

    fn scan_all(&self) -> BoxStream<'_, Result<StagingEntry, StoreError>> {
        self.inner.scan_all()
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("delete refused".to_string()));
        }
        self.inner.delete(key).await
    }

    async fn len(&self) -> Result<u64, StoreError> {
        self.inner.len().await
    }
}

/// Memory store that fails the next `failures` commits.
#[derive(Default)]
pub struct FlakyReadingStore {
    pub inner: MemoryReadingStore,
    failures: AtomicUsize,
}

impl FlakyReadingStore {
    pub fn failing(failures: usize) -> Self {
        Self {
            inner: MemoryReadingStore::new(),
            failures: AtomicUsize::new(failures),
        }
    }
}

#[async_trait]
impl ReadingStore for FlakyReadingStore {
    async fn commit_batch(&self, batch: &[NewReading]) -> Result<u64, StoreError> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("durable store offline".to_string()));
        }
        self.inner.commit_batch(batch).await
    }

    async fn totals_by_sensor(
        &self,
        guids: &[String],
    ) -> Result<HashMap<String, ReadingTotals>, StoreError> {
        self.inner.totals_by_sensor(guids).await
    }
}

/// Memory store whose commits park until released.
#[derive(Default)]
pub struct GatedReadingStore {
    pub inner: MemoryReadingStore,
    pub entered: Notify,
    pub release: Notify,
}

#[async_trait]
impl ReadingStore for GatedReadingStore {
    async fn commit_batch(&self, batch: &[NewReading]) -> Result<u64, StoreError> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.commit_batch(batch).await
    }

    async fn totals_by_sensor(
        &self,
        guids: &[String],
    ) -> Result<HashMap<String, ReadingTotals>, StoreError> {
        self.inner.totals_by_sensor(guids).await
    }
}

/// A fully in-memory pipeline wired the way `main` wires the Postgres one.
pub struct MemoryPipeline {
    pub state: AppState,
    pub buffer: Arc<MemoryStagingBuffer>,
    pub store: Arc<MemoryReadingStore>,
    pub topology: Arc<MemoryTopology>,
}

pub fn memory_pipeline() -> MemoryPipeline {
    let buffer = Arc::new(MemoryStagingBuffer::new());
    let store = Arc::new(MemoryReadingStore::new());
    let topology = Arc::new(MemoryTopology::new());
    let stats = Arc::new(PipelineStats::new());
    let config = test_config();

    let flush = Arc::new(FlushCycle::new(buffer.clone(), store.clone(), stats.clone()));
    let state = AppState {
        config: Arc::new(config),
        ingestor: Ingestor::new(buffer.clone(), stats.clone()),
        aggregation: AggregationEngine::new(store.clone(), topology.clone()),
        flush,
        stats,
    };

    MemoryPipeline {
        state,
        buffer,
        store,
        topology,
    }
}

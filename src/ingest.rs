use crate::error::PipelineError;
use crate::flush::PipelineStats;
use crate::reading::{Reading, StagingKeyGen};
use crate::staging::StagingBuffer;
use chrono::Utc;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Write path for device readings. Returns as soon as the reading is staged;
/// durability is the flush cycle's job.
#[derive(Clone)]
pub struct Ingestor {
    buffer: Arc<dyn StagingBuffer>,
    keys: Arc<StagingKeyGen>,
    stats: Arc<PipelineStats>,
}

impl Ingestor {
    pub fn new(buffer: Arc<dyn StagingBuffer>, stats: Arc<PipelineStats>) -> Self {
        Self {
            buffer,
            keys: Arc::new(StagingKeyGen::new()),
            stats,
        }
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        self.stats.clone()
    }

    pub async fn staged_len(&self) -> Result<u64, PipelineError> {
        Ok(self.buffer.len().await?)
    }

    /// Stages one reading and returns its staging key. A buffer failure drops
    /// the reading; the device is expected to resend.
    pub async fn ingest(&self, reading: Reading) -> Result<String, PipelineError> {
        let guid = reading.guid.trim();
        if guid.is_empty() {
            return Err(PipelineError::InvalidReading(
                "guid must not be blank".to_string(),
            ));
        }
        let reading = Reading {
            guid: guid.to_string(),
            ..reading
        };

        let key = self.keys.next_key(&reading.guid, Utc::now());
        if let Err(err) = self.buffer.put(&key, &reading).await {
            self.stats.ingest_failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(guid = %reading.guid, error = %err, "failed to stage reading");
            return Err(PipelineError::BufferWriteFailed(err));
        }

        self.stats.staged_total.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(key = %key, guid = %reading.guid, "staged reading");
        Ok(key)
    }
}

use crate::error::PipelineError;
use crate::reading::{NewReading, Reading, StagingEntry};
use crate::staging::StagingBuffer;
use crate::store::ReadingStore;
use chrono::Utc;
use futures::StreamExt;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{
    atomic::{AtomicU64, AtomicU8, Ordering},
    Arc, Mutex,
};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

#[cfg(test)]
mod tests;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushPhase {
    Idle = 0,
    Draining = 1,
    Committing = 2,
}

impl FlushPhase {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => FlushPhase::Draining,
            2 => FlushPhase::Committing,
            _ => FlushPhase::Idle,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum FlushOutcome {
    /// Another cycle held the gate.
    Skipped,
    Empty,
    Committed {
        drained: usize,
        inserted: u64,
        deleted: usize,
    },
}

#[derive(Debug)]
pub struct PipelineStats {
    pub phase: AtomicU8,
    pub staged_total: AtomicU64,
    pub ingest_failures: AtomicU64,
    pub committed_total: AtomicU64,
    pub duplicates_skipped: AtomicU64,
    pub failed_flushes: AtomicU64,
    pub skipped_ticks: AtomicU64,
    pub delete_failures: AtomicU64,
    pub last_flush_unix_ms: AtomicU64,
    pub last_batch_len: AtomicU64,
    pub average_flush_micros: AtomicU64,
    pub last_error: Mutex<Option<String>>,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self {
            phase: AtomicU8::new(FlushPhase::Idle as u8),
            staged_total: AtomicU64::new(0),
            ingest_failures: AtomicU64::new(0),
            committed_total: AtomicU64::new(0),
            duplicates_skipped: AtomicU64::new(0),
            failed_flushes: AtomicU64::new(0),
            skipped_ticks: AtomicU64::new(0),
            delete_failures: AtomicU64::new(0),
            last_flush_unix_ms: AtomicU64::new(0),
            last_batch_len: AtomicU64::new(0),
            average_flush_micros: AtomicU64::new(0),
            last_error: Mutex::new(None),
        }
    }

    pub fn phase(&self) -> FlushPhase {
        FlushPhase::from_u8(self.phase.load(Ordering::Relaxed))
    }

    fn set_phase(&self, phase: FlushPhase) {
        self.phase.store(phase as u8, Ordering::Relaxed);
    }

    pub fn record_error(&self, err: impl Into<String>) {
        if let Ok(mut guard) = self.last_error.lock() {
            *guard = Some(err.into());
        }
    }

    pub fn clear_error(&self) {
        if let Ok(mut guard) = self.last_error.lock() {
            *guard = None;
        }
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().ok().and_then(|guard| guard.clone())
    }

    fn record_flush(&self, len: usize, started: Instant) {
        self.last_batch_len.store(len as u64, Ordering::Relaxed);
        let now = Utc::now().timestamp_millis().max(0) as u64;
        self.last_flush_unix_ms.store(now, Ordering::Relaxed);
        let micros = started.elapsed().as_micros() as u64;
        let prev = self.average_flush_micros.load(Ordering::Relaxed);
        let avg = if prev == 0 {
            micros
        } else {
            (prev + micros) / 2
        };
        self.average_flush_micros.store(avg, Ordering::Relaxed);
    }
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Moves staged readings into the durable store: drain, commit, then delete.
///
/// Each cycle drains everything staged at scan time and commits it as one
/// unit. Entries leave the staging buffer only after the store confirmed the commit.
/// A failed commit leaves them in place for the next cycle; the store drops
/// rows whose staging key it already holds, so replays are harmless.
pub struct FlushCycle {
    buffer: Arc<dyn StagingBuffer>,
    store: Arc<dyn ReadingStore>,
    stats: Arc<PipelineStats>,
    gate: tokio::sync::Mutex<()>,
}

impl FlushCycle {
    pub fn new(
        buffer: Arc<dyn StagingBuffer>,
        store: Arc<dyn ReadingStore>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            buffer,
            store,
            stats,
            gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        self.stats.clone()
    }

    pub async fn run_once(&self) -> Result<FlushOutcome, PipelineError> {
        let Ok(_guard) = self.gate.try_lock() else {
            self.stats.skipped_ticks.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("previous flush still running; skipping tick");
            return Ok(FlushOutcome::Skipped);
        };

        let result = self.drain_and_commit().await;
        self.stats.set_phase(FlushPhase::Idle);
        result
    }

    async fn drain_and_commit(&self) -> Result<FlushOutcome, PipelineError> {
        let started = Instant::now();

        self.stats.set_phase(FlushPhase::Draining);
        let batch = self.drain().await?;
        if batch.is_empty() {
            return Ok(FlushOutcome::Empty);
        }

        self.stats.set_phase(FlushPhase::Committing);
        let drained = batch.len();
        let committed_at = Utc::now();
        let keys: Vec<String> = batch.keys().cloned().collect();
        let rows: Vec<NewReading> = batch
            .into_iter()
            .map(|(key, reading)| NewReading::from_entry(StagingEntry { key, reading }, committed_at))
            .collect();

        let inserted = match self.store.commit_batch(&rows).await {
            Ok(inserted) => inserted,
            Err(err) => {
                self.stats.failed_flushes.fetch_add(1, Ordering::Relaxed);
                self.stats.record_error(err.to_string());
                tracing::error!(error = %err, len = drained, "failed to commit staged readings");
                return Err(PipelineError::FlushCommitFailed {
                    batch: drained,
                    source: err,
                });
            }
        };

        let skipped = (drained as u64).saturating_sub(inserted);
        if skipped > 0 {
            self.stats
                .duplicates_skipped
                .fetch_add(skipped, Ordering::Relaxed);
            tracing::warn!(inserted, skipped, "skipped already committed readings");
        }
        self.stats
            .committed_total
            .fetch_add(inserted, Ordering::Relaxed);

        let mut deleted = 0usize;
        for key in &keys {
            match self.buffer.delete(key).await {
                Ok(()) => deleted += 1,
                Err(err) => {
                    self.stats.delete_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(key = %key, error = %err, "failed to delete committed staging entry");
                }
            }
        }

        self.stats.record_flush(drained, started);
        self.stats.clear_error();
        tracing::debug!(
            len = drained,
            inserted,
            deleted,
            micros = started.elapsed().as_micros() as u64,
            "flushed staged readings"
        );

        Ok(FlushOutcome::Committed {
            drained,
            inserted,
            deleted,
        })
    }

    async fn drain(&self) -> Result<BTreeMap<String, Reading>, PipelineError> {
        let mut batch = BTreeMap::new();
        let mut scan = self.buffer.scan_all();
        while let Some(entry) = scan.next().await {
            let entry = entry.map_err(|err| {
                self.stats.record_error(err.to_string());
                PipelineError::BufferScanFailed(err)
            })?;
            batch.insert(entry.key, entry.reading);
        }
        Ok(batch)
    }
}

/// Runs a [`FlushCycle`] on a fixed interval until cancelled.
pub struct FlushService {
    cycle: Arc<FlushCycle>,
    interval: Duration,
}

impl FlushService {
    pub fn new(cycle: Arc<FlushCycle>, interval: Duration) -> Self {
        Self {
            cycle,
            interval: interval.max(Duration::from_millis(10)),
        }
    }

    /// The returned handle resolves once the loop has stopped and the final
    /// shutdown drain has run. A cycle in progress when `cancel` fires always
    /// completes first.
    pub fn start(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = self.cycle.run_once().await {
                            tracing::warn!(error = %err, "flush on interval failed");
                        }
                    }
                }
            }

            match self.cycle.run_once().await {
                Ok(outcome) => tracing::info!(?outcome, "flush during shutdown finished"),
                Err(err) => tracing::warn!(error = %err, "flush during shutdown failed"),
            }
        })
    }
}

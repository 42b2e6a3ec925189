use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::atomic::Ordering;

use crate::error::AppResult;
use crate::flush::{FlushOutcome, FlushPhase};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct PipelineStatus {
    pub staging_backend: &'static str,
    pub flush_interval_ms: u64,
    pub insert_chunk_size: usize,
    pub phase: FlushPhase,
    /// `None` when the staging buffer could not be counted.
    pub staged: Option<u64>,
    pub staged_total: u64,
    pub ingest_failures: u64,
    pub committed_total: u64,
    pub duplicates_skipped: u64,
    pub failed_flushes: u64,
    pub skipped_ticks: u64,
    pub delete_failures: u64,
    pub last_flush_unix_ms: Option<u64>,
    pub last_batch_len: u64,
    pub average_flush_micros: u64,
    pub last_error: Option<String>,
}

pub(crate) async fn get_status(State(state): State<AppState>) -> Json<PipelineStatus> {
    let staged = match state.ingestor.staged_len().await {
        Ok(len) => Some(len),
        Err(err) => {
            tracing::warn!(error = %err, "failed to count staged readings");
            None
        }
    };
    let stats = &state.stats;
    let last_flush = stats.last_flush_unix_ms.load(Ordering::Relaxed);

    Json(PipelineStatus {
        staging_backend: state.config.staging_backend.as_str(),
        flush_interval_ms: state.config.flush_interval_ms,
        insert_chunk_size: state.config.insert_chunk_size,
        phase: stats.phase(),
        staged,
        staged_total: stats.staged_total.load(Ordering::Relaxed),
        ingest_failures: stats.ingest_failures.load(Ordering::Relaxed),
        committed_total: stats.committed_total.load(Ordering::Relaxed),
        duplicates_skipped: stats.duplicates_skipped.load(Ordering::Relaxed),
        failed_flushes: stats.failed_flushes.load(Ordering::Relaxed),
        skipped_ticks: stats.skipped_ticks.load(Ordering::Relaxed),
        delete_failures: stats.delete_failures.load(Ordering::Relaxed),
        last_flush_unix_ms: (last_flush > 0).then_some(last_flush),
        last_batch_len: stats.last_batch_len.load(Ordering::Relaxed),
        average_flush_micros: stats.average_flush_micros.load(Ordering::Relaxed),
        last_error: stats.last_error(),
    })
}

pub(crate) async fn post_flush(State(state): State<AppState>) -> AppResult<Json<FlushOutcome>> {
    Ok(Json(state.flush.run_once().await?))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/status", get(get_status))
        .route("/v1/flush", post(post_flush))
}

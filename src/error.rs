use crate::reading::RoomId;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Failures raised by a storage backend (staging table, reading table, topology).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("staging key {0} already present")]
    DuplicateKey(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid reading: {0}")]
    InvalidReading(String),
    #[error("staging buffer write failed: {0}")]
    BufferWriteFailed(#[source] StoreError),
    #[error("staging buffer scan failed: {0}")]
    BufferScanFailed(#[source] StoreError),
    #[error("commit of {batch} staged readings failed: {source}")]
    FlushCommitFailed {
        batch: usize,
        #[source]
        source: StoreError,
    },
    #[error("no committed readings for room {0}")]
    NoDataForRoom(RoomId),
    #[error("sensor {0} does not resolve to a room")]
    TopologyLookupFailed(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PipelineError {
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::InvalidReading(_) => "invalid_reading",
            PipelineError::BufferWriteFailed(_) => "buffer_write_failed",
            PipelineError::BufferScanFailed(_) => "buffer_scan_failed",
            PipelineError::FlushCommitFailed { .. } => "flush_commit_failed",
            PipelineError::NoDataForRoom(_) => "no_data_for_room",
            PipelineError::TopologyLookupFailed(_) => "topology_lookup_failed",
            PipelineError::Store(_) => "store_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            PipelineError::InvalidReading(_) => StatusCode::UNPROCESSABLE_ENTITY,
            PipelineError::NoDataForRoom(_) => StatusCode::NOT_FOUND,
            PipelineError::TopologyLookupFailed(_) => StatusCode::BAD_GATEWAY,
            PipelineError::BufferWriteFailed(_)
            | PipelineError::BufferScanFailed(_)
            | PipelineError::FlushCommitFailed { .. }
            | PipelineError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, "invalid_request", message)
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        let status = err.status();
        if status.is_server_error() {
            tracing::error!(error = %err, status = %status, "pipeline error");
        } else {
            tracing::debug!(error = %err, status = %status, "request rejected");
        }
        Self::new(status, err.code(), err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "status": "error",
            "error": self.code,
            "detail": self.message,
        }));
        (self.status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

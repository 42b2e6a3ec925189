use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};

use crate::error::{AppError, AppResult};
use crate::ingest::Ingestor;
use crate::reading::Reading;
use crate::state::AppState;

/// Device ingestion endpoint. Answers as soon as the reading is staged.
pub(crate) async fn post_sensor_data(
    State(ingestor): State<Ingestor>,
    payload: Result<Json<Reading>, JsonRejection>,
) -> AppResult<StatusCode> {
    let Json(reading) = payload.map_err(|err| AppError::unprocessable(err.body_text()))?;
    ingestor.ingest(reading).await?;
    Ok(StatusCode::OK)
}

pub fn router() -> Router<AppState> {
    Router::new().route("/external/sensors_data", post(post_sensor_data))
}

use axum::extract::rejection::PathRejection;
use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};

use crate::aggregate::AggregationEngine;
use crate::error::{AppError, AppResult};
use crate::reading::{RoomId, RoomStatistic, ZoneId, ZoneStatistic};
use crate::state::AppState;

pub(crate) async fn zone_statistic(
    State(aggregation): State<AggregationEngine>,
    zone_id: Result<Path<ZoneId>, PathRejection>,
) -> AppResult<Json<ZoneStatistic>> {
    let Path(zone_id) = zone_id.map_err(|err| AppError::unprocessable(err.body_text()))?;
    Ok(Json(aggregation.zone_statistic(zone_id).await?))
}

pub(crate) async fn room_statistic(
    State(aggregation): State<AggregationEngine>,
    room_id: Result<Path<RoomId>, PathRejection>,
) -> AppResult<Json<RoomStatistic>> {
    let Path(room_id) = room_id.map_err(|err| AppError::unprocessable(err.body_text()))?;
    Ok(Json(aggregation.room_statistic(room_id).await?))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/zone/{id}/statistic", get(zone_statistic))
        .route("/room/{id}/statistic", get(room_statistic))
}

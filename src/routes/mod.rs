pub mod external;
pub mod health;
pub mod statistics;
pub mod status;

use axum::Router;
use tower_http::cors::CorsLayer;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(external::router())
        .merge(statistics::router())
        .merge(status::router())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

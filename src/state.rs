use crate::aggregate::AggregationEngine;
use crate::config::Config;
use crate::flush::{FlushCycle, PipelineStats};
use crate::ingest::Ingestor;
use axum::extract::FromRef;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub ingestor: Ingestor,
    pub aggregation: AggregationEngine,
    pub flush: Arc<FlushCycle>,
    pub stats: Arc<PipelineStats>,
}

impl FromRef<AppState> for Ingestor {
    fn from_ref(state: &AppState) -> Ingestor {
        state.ingestor.clone()
    }
}

impl FromRef<AppState> for AggregationEngine {
    fn from_ref(state: &AppState) -> AggregationEngine {
        state.aggregation.clone()
    }
}

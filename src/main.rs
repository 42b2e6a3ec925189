use airq_pipeline::aggregate::AggregationEngine;
use airq_pipeline::config::{Config, StagingBackend};
use airq_pipeline::flush::{FlushCycle, FlushService, PipelineStats};
use airq_pipeline::ingest::Ingestor;
use airq_pipeline::staging::{MemoryStagingBuffer, PgStagingBuffer, StagingBuffer};
use airq_pipeline::state::AppState;
use airq_pipeline::store::PgReadingStore;
use airq_pipeline::topology::PgTopology;
use airq_pipeline::{db, routes};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn otlp_tracer(endpoint: String) -> Result<opentelemetry_sdk::trace::Tracer> {
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::{runtime::Tokio, trace::Config as OTelTraceConfig, Resource};

    let exporter = opentelemetry_otlp::new_exporter()
        .http()
        .with_endpoint(endpoint);
    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(exporter)
        .with_trace_config(OTelTraceConfig::default().with_resource(Resource::new(vec![
            KeyValue::new("service.name", "airq-pipeline"),
        ])))
        .install_batch(Tokio)?;
    Ok(tracer)
}

fn init_tracing(config: &Config) -> Result<()> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,airq_pipeline=info".into());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true);
    let otel_layer = match config.otlp_traces_endpoint() {
        Some(endpoint) => Some(tracing_opentelemetry::layer().with_tracer(otlp_tracer(endpoint)?)),
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(otel_layer)
        .try_init()?;
    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for shutdown signal");
    }
    tracing::info!("shutdown signal received");
    cancel.cancel();
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config)?;

    let pool = db::connect(&config).await?;
    let store = PgReadingStore::new(pool.clone()).with_chunk_size(config.insert_chunk_size);
    if config.ensure_schema {
        store
            .ensure_schema()
            .await
            .context("failed to prepare sensor_data table")?;
    }

    let buffer: Arc<dyn StagingBuffer> = match config.staging_backend {
        StagingBackend::Postgres => {
            let buffer = PgStagingBuffer::new(pool.clone());
            if config.ensure_schema {
                buffer
                    .ensure_schema()
                    .await
                    .context("failed to prepare staging_readings table")?;
            }
            Arc::new(buffer)
        }
        StagingBackend::Memory => {
            tracing::warn!("memory staging buffer in use; staged readings are lost on restart");
            Arc::new(MemoryStagingBuffer::new())
        }
    };
    let store = Arc::new(store);
    let topology = Arc::new(PgTopology::new(pool));
    let stats = Arc::new(PipelineStats::new());

    let flush = Arc::new(FlushCycle::new(buffer.clone(), store.clone(), stats.clone()));
    let state = AppState {
        config: Arc::new(config.clone()),
        ingestor: Ingestor::new(buffer, stats.clone()),
        aggregation: AggregationEngine::new(store, topology),
        flush: flush.clone(),
        stats,
    };

    let cancel = CancellationToken::new();
    let flush_handle = FlushService::new(flush, config.flush_interval()).start(cancel.clone());

    let listener = tokio::net::TcpListener::bind(&config.http_bind)
        .await
        .with_context(|| format!("failed to bind {}", config.http_bind))?;
    tracing::info!(
        bind = %config.http_bind,
        backend = config.staging_backend.as_str(),
        interval_ms = config.flush_interval_ms,
        "airq pipeline listening"
    );

    let served = axum::serve(listener, routes::router(state))
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await;

    cancel.cancel();
    if let Err(err) = flush_handle.await {
        tracing::error!(error = %err, "flush task failed");
    }
    served.context("http server failed")?;

    Ok(())
}

use anyhow::{anyhow, bail, Context, Result};
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::store::{DEFAULT_INSERT_CHUNK, MAX_INSERT_CHUNK};

const DEFAULT_SETUP_CONFIG_PATH: &str = "/etc/airq/config.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagingBackend {
    Postgres,
    Memory,
}

impl StagingBackend {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(StagingBackend::Postgres),
            "memory" | "mem" => Ok(StagingBackend::Memory),
            other => bail!("unknown staging backend {other:?} (expected postgres or memory)"),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StagingBackend::Postgres => "postgres",
            StagingBackend::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SetupConfigOverrides {
    #[serde(default)]
    database_url: Option<String>,
    #[serde(default)]
    http_bind: Option<String>,
    #[serde(default)]
    flush_interval_ms: Option<u64>,
    #[serde(default)]
    insert_chunk_size: Option<usize>,
    #[serde(default)]
    staging_backend: Option<String>,
}

fn setup_config_path() -> PathBuf {
    env_optional("AIRQ_SETUP_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SETUP_CONFIG_PATH))
}

fn load_setup_config_overrides() -> Option<SetupConfigOverrides> {
    load_setup_config_overrides_from(&setup_config_path())
}

fn load_setup_config_overrides_from(path: &Path) -> Option<SetupConfigOverrides> {
    if !path.exists() {
        return None;
    }
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "failed to read setup config; using env defaults"
            );
            return None;
        }
    };
    match parse_setup_overrides(contents) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "failed to parse setup config; using env defaults"
            );
            None
        }
    }
}

fn parse_setup_overrides(contents: String) -> Result<SetupConfigOverrides> {
    let mut bytes = contents.into_bytes();
    Ok(simd_json::serde::from_slice(&mut bytes)?)
}

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub db_pool_size: u32,
    pub http_bind: String,
    pub flush_interval_ms: u64,
    pub insert_chunk_size: usize,
    pub staging_backend: StagingBackend,
    pub ensure_schema: bool,
    pub otlp_endpoint: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        let overrides = load_setup_config_overrides().unwrap_or_default();
        Self::from_sources(&overrides)
    }

    fn from_sources(overrides: &SetupConfigOverrides) -> Result<Self> {
        let database_url = env_optional("AIRQ_DATABASE_URL")
            .or_else(|| env_optional("DATABASE_URL"))
            .or_else(|| non_blank(overrides.database_url.as_deref()))
            .context("AIRQ_DATABASE_URL or DATABASE_URL is required (or database_url in the setup config)")?;
        let database_url = normalize_database_url(database_url);

        let db_pool_size = env_u64("AIRQ_DB_POOL_SIZE", 10)? as u32;

        let http_bind = env_optional("AIRQ_HTTP_BIND")
            .or_else(|| non_blank(overrides.http_bind.as_deref()))
            .unwrap_or_else(|| "0.0.0.0:8080".to_string());

        let flush_interval_ms = env_u64(
            "AIRQ_FLUSH_INTERVAL_MS",
            overrides.flush_interval_ms.filter(|v| *v != 0).unwrap_or(3000),
        )?;
        let insert_chunk_size = env_u64(
            "AIRQ_INSERT_CHUNK_SIZE",
            overrides
                .insert_chunk_size
                .filter(|v| *v != 0)
                .unwrap_or(DEFAULT_INSERT_CHUNK) as u64,
        )? as usize;

        let staging_backend = match env_optional("AIRQ_STAGING_BACKEND")
            .or_else(|| non_blank(overrides.staging_backend.as_deref()))
        {
            Some(raw) => StagingBackend::parse(&raw).context("invalid AIRQ_STAGING_BACKEND")?,
            None => StagingBackend::Postgres,
        };

        let ensure_schema = env_optional("AIRQ_ENSURE_SCHEMA")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(true);
        let otlp_endpoint = env_optional("OTEL_EXPORTER_OTLP_ENDPOINT");

        let config = Self {
            database_url,
            db_pool_size,
            http_bind,
            flush_interval_ms,
            insert_chunk_size,
            staging_backend,
            ensure_schema,
            otlp_endpoint,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.flush_interval_ms == 0 {
            return Err(anyhow!("AIRQ_FLUSH_INTERVAL_MS must be greater than zero"));
        }
        if self.insert_chunk_size == 0 || self.insert_chunk_size > MAX_INSERT_CHUNK {
            return Err(anyhow!(
                "AIRQ_INSERT_CHUNK_SIZE must be between 1 and {MAX_INSERT_CHUNK}"
            ));
        }
        if self.db_pool_size == 0 {
            return Err(anyhow!("AIRQ_DB_POOL_SIZE must be greater than zero"));
        }
        Ok(())
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// OTLP/HTTP trace endpoint, with `/v1/traces` appended when only the
    /// collector base URL was configured.
    pub fn otlp_traces_endpoint(&self) -> Option<String> {
        let base = self.otlp_endpoint.as_deref()?.trim();
        if base.contains("/v1/traces") {
            return Some(base.to_string());
        }
        Some(format!("{}/v1/traces", base.trim_end_matches('/')))
    }
}

fn normalize_database_url(url: String) -> String {
    if let Some(stripped) = url.strip_prefix("postgresql+psycopg://") {
        return format!("postgresql://{stripped}");
    }
    if let Some(stripped) = url.strip_prefix("postgresql+asyncpg://") {
        return format!("postgresql://{stripped}");
    }
    url
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn env_u64(key: &str, default: u64) -> Result<u64> {
    match env_optional(key) {
        Some(value) => value
            .parse::<u64>()
            .with_context(|| format!("invalid {key}")),
        None => Ok(default),
    }
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

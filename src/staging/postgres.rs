use super::StagingBuffer;
use crate::error::StoreError;
use crate::reading::{Reading, StagingEntry};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use sqlx::PgPool;

const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, sqlx::FromRow)]
struct StagingRow {
    key: String,
    guid: String,
    co2: i64,
    tvoc: i64,
    battery_charge: i64,
}

impl From<StagingRow> for StagingEntry {
    fn from(row: StagingRow) -> Self {
        StagingEntry {
            key: row.key,
            reading: Reading {
                guid: row.guid,
                co2: row.co2,
                tvoc: row.tvoc,
                battery_charge: row.battery_charge,
            },
        }
    }
}

/// Staging buffer backed by an UNLOGGED Postgres table, so staged readings
/// outlive a process restart and can be shared by several instances.
#[derive(Debug, Clone)]
pub struct PgStagingBuffer {
    pool: PgPool,
}

impl PgStagingBuffer {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE UNLOGGED TABLE IF NOT EXISTS staging_readings (
                key text primary key,
                guid text not null,
                co2 bigint not null,
                tvoc bigint not null,
                battery_charge bigint not null,
                staged_at timestamptz not null default now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl StagingBuffer for PgStagingBuffer {
    async fn put(&self, key: &str, reading: &Reading) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO staging_readings (key, guid, co2, tvoc, battery_charge)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(key)
        .bind(&reading.guid)
        .bind(reading.co2)
        .bind(reading.tvoc)
        .bind(reading.battery_charge)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
                Err(StoreError::DuplicateKey(key.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn scan_all(&self) -> BoxStream<'_, Result<StagingEntry, StoreError>> {
        sqlx::query_as::<_, StagingRow>(
            r#"
            SELECT key, guid, co2, tvoc, battery_charge
            FROM staging_readings
            ORDER BY key
            "#,
        )
        .fetch(&self.pool)
        .map(|row| row.map(StagingEntry::from).map_err(StoreError::from))
        .boxed()
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM staging_readings WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn len(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM staging_readings")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}

use super::ReadingStore;
use crate::error::StoreError;
use crate::reading::{NewReading, ReadingTotals};
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use std::collections::HashMap;

pub const DEFAULT_INSERT_CHUNK: usize = 1000;
// Seven binds per row; Postgres caps a statement at 65535 parameters.
pub const MAX_INSERT_CHUNK: usize = 9000;

/// The `sensor_data` table shared with the CRUD service, extended with a
/// unique `staging_key` so replayed flushes are absorbed.
#[derive(Debug, Clone)]
pub struct PgReadingStore {
    pool: PgPool,
    chunk_size: usize,
}

impl PgReadingStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            chunk_size: DEFAULT_INSERT_CHUNK,
        }
    }

    /// Rows per INSERT statement. All chunks of one batch share a transaction.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.clamp(1, MAX_INSERT_CHUNK);
        self
    }

    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sensor_data (
                id bigserial primary key,
                created_at timestamptz null,
                updated_at timestamptz null,
                deleted_at timestamptz null,
                guid text not null,
                co2 bigint not null,
                tvoc bigint not null,
                battery_charge bigint not null
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("ALTER TABLE sensor_data ADD COLUMN IF NOT EXISTS staging_key text")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_sensor_data_staging_key ON sensor_data (staging_key)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sensor_data_guid ON sensor_data (guid)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ReadingStore for PgReadingStore {
    async fn commit_batch(&self, batch: &[NewReading]) -> Result<u64, StoreError> {
        if batch.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;
        for chunk in batch.chunks(self.chunk_size) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO sensor_data (staging_key, guid, co2, tvoc, battery_charge, created_at, updated_at) ",
            );
            builder.push_values(chunk.iter(), |mut b, row| {
                b.push_bind(&row.staging_key)
                    .push_bind(&row.guid)
                    .push_bind(row.co2)
                    .push_bind(row.tvoc)
                    .push_bind(row.battery_charge)
                    .push_bind(row.committed_at)
                    .push_bind(row.committed_at);
            });
            builder.push(" ON CONFLICT (staging_key) DO NOTHING");

            let result = builder.build().execute(&mut *tx).await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;

        Ok(inserted)
    }

    async fn totals_by_sensor(
        &self,
        guids: &[String],
    ) -> Result<HashMap<String, ReadingTotals>, StoreError> {
        if guids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT
                guid,
                COUNT(*) AS readings,
                COALESCE(SUM(co2), 0)::text AS co2_sum,
                COALESCE(SUM(tvoc), 0)::text AS tvoc_sum
            FROM sensor_data
            WHERE guid = ANY($1)
              AND deleted_at IS NULL
            GROUP BY guid
            "#,
        )
        .bind(guids)
        .fetch_all(&self.pool)
        .await?;

        let mut totals = HashMap::with_capacity(rows.len());
        for row in rows {
            let guid: String = row.try_get("guid")?;
            totals.insert(
                guid,
                ReadingTotals {
                    count: row.try_get("readings")?,
                    co2_sum: parse_sum(row.try_get("co2_sum")?)?,
                    tvoc_sum: parse_sum(row.try_get("tvoc_sum")?)?,
                },
            );
        }
        Ok(totals)
    }
}

// SUM over bigint is numeric in Postgres and can exceed i64; it is read as text.
fn parse_sum(raw: String) -> Result<i128, StoreError> {
    raw.trim()
        .parse::<i128>()
        .map_err(|err| StoreError::Database(sqlx::Error::Decode(Box::new(err))))
}

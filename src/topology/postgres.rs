use super::TopologyResolver;
use crate::error::StoreError;
use crate::reading::{RoomId, ZoneId};
use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashMap;

/// Reads the CRUD service's `sensors` table. Soft-deleted sensors do not resolve.
#[derive(Debug, Clone)]
pub struct PgTopology {
    pool: PgPool,
}

impl PgTopology {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TopologyResolver for PgTopology {
    async fn resolve_room(&self, guid: &str) -> Result<Option<RoomId>, StoreError> {
        let room_id: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT room_id::bigint
            FROM sensors
            WHERE guid = $1
              AND deleted_at IS NULL
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(guid)
        .fetch_optional(&self.pool)
        .await?;
        Ok(room_id)
    }

    async fn resolve_rooms(&self, guids: &[String]) -> Result<HashMap<String, RoomId>, StoreError> {
        if guids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT DISTINCT ON (guid) guid, room_id::bigint
            FROM sensors
            WHERE guid = ANY($1)
              AND deleted_at IS NULL
            ORDER BY guid, id DESC
            "#,
        )
        .bind(guids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }

    async fn sensors_in_room(&self, room_id: RoomId) -> Result<Vec<String>, StoreError> {
        let guids: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT guid
            FROM (
                SELECT DISTINCT ON (guid) guid, room_id
                FROM sensors
                WHERE deleted_at IS NULL
                ORDER BY guid, id DESC
            ) latest
            WHERE room_id = $1
            ORDER BY guid
            "#,
        )
        .bind(room_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(guids)
    }

    async fn sensors_in_zone(&self, zone_id: ZoneId) -> Result<Vec<String>, StoreError> {
        let guids: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT guid
            FROM (
                SELECT DISTINCT ON (guid) guid, zone_id
                FROM sensors
                WHERE deleted_at IS NULL
                ORDER BY guid, id DESC
            ) latest
            WHERE zone_id = $1
            ORDER BY guid
            "#,
        )
        .bind(zone_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(guids)
    }
}

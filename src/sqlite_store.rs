//! SQLite-backed [`VectorStore`] and [`CheckpointStore`].
//!
//! Vectors are stored as little-endian `f32` BLOBs in `vector_records`
//! and searched by brute-force cosine similarity, the same approach the
//! in-memory store takes. Timestamps are epoch milliseconds.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use reportportal_sync_core::embedding::{blob_to_vec, rank_by_similarity, vec_to_blob};
use reportportal_sync_core::models::{
    EntityType, RecordFilter, RecordMetadata, SearchHit, StoreCount, SyncCheckpoint, VectorRecord,
};
use reportportal_sync_core::store::{CheckpointStore, VectorStore};

fn to_millis(ts: Option<DateTime<Utc>>) -> Option<i64> {
    ts.map(|t| t.timestamp_millis())
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow!("timestamp out of range: {}", ms))
}

fn parse_entity_type(raw: &str) -> Result<EntityType> {
    raw.parse::<EntityType>().map_err(|e| anyhow!(e))
}

pub struct SqliteVectorStore {
    pool: SqlitePool,
    collection: String,
    model: String,
}

impl SqliteVectorStore {
    pub fn new(pool: SqlitePool, collection: &str) -> Self {
        Self {
            pool,
            collection: collection.to_string(),
            model: String::new(),
        }
    }

    /// Record the embedding model name on every row written.
    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    fn row_to_record(row: &SqliteRow) -> Result<VectorRecord> {
        let entity_type: String = row.get("entity_type");
        let last_modified_at: Option<i64> = row.get("last_modified_at");
        let fields_json: String = row.get("fields_json");
        let blob: Vec<u8> = row.get("embedding");
        Ok(VectorRecord {
            record_id: row.get("record_id"),
            document: row.get("document"),
            embedding: blob_to_vec(&blob),
            metadata: RecordMetadata {
                project_name: row.get("project_name"),
                entity_type: parse_entity_type(&entity_type)?,
                entity_id: row.get("entity_id"),
                last_modified_at: last_modified_at.map(from_millis).transpose()?,
                fields: serde_json::from_str(&fields_json)?,
            },
            raw_json: row.get("raw_json"),
            content_hash: row.get("content_hash"),
        })
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<u64> {
        let synced_at = Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await?;

        for record in records {
            let meta = &record.metadata;
            sqlx::query(
                r#"
                INSERT INTO vector_records (
                    collection, record_id, entity_type, entity_id, project_name,
                    last_modified_at, document, embedding, dims, model,
                    fields_json, raw_json, content_hash, synced_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(collection, record_id) DO UPDATE SET
                    entity_type = excluded.entity_type,
                    entity_id = excluded.entity_id,
                    project_name = excluded.project_name,
                    last_modified_at = excluded.last_modified_at,
                    document = excluded.document,
                    embedding = excluded.embedding,
                    dims = excluded.dims,
                    model = excluded.model,
                    fields_json = excluded.fields_json,
                    raw_json = excluded.raw_json,
                    content_hash = excluded.content_hash,
                    synced_at = excluded.synced_at
                "#,
            )
            .bind(&self.collection)
            .bind(&record.record_id)
            .bind(meta.entity_type.as_str())
            .bind(&meta.entity_id)
            .bind(&meta.project_name)
            .bind(to_millis(meta.last_modified_at))
            .bind(&record.document)
            .bind(vec_to_blob(&record.embedding))
            .bind(record.embedding.len() as i64)
            .bind(&self.model)
            .bind(serde_json::to_string(&meta.fields)?)
            .bind(&record.raw_json)
            .bind(&record.content_hash)
            .bind(synced_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(records.len() as u64)
    }

    async fn delete_where(&self, project_name: &str, entity_type: EntityType) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM vector_records WHERE collection = ? AND project_name = ? AND entity_type = ?",
        )
        .bind(&self.collection)
        .bind(project_name)
        .bind(entity_type.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn search(
        &self,
        query: &[f32],
        filter: &RecordFilter,
        top_k: usize,
    ) -> Result<Vec<SearchHit>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM vector_records
            WHERE collection = ?
              AND (? IS NULL OR project_name = ?)
              AND (? IS NULL OR last_modified_at >= ?)
            "#,
        )
        .bind(&self.collection)
        .bind(&filter.project_name)
        .bind(&filter.project_name)
        .bind(to_millis(filter.modified_since))
        .bind(to_millis(filter.modified_since))
        .fetch_all(&self.pool)
        .await?;

        let mut candidates = Vec::with_capacity(rows.len());
        for row in &rows {
            let record = Self::row_to_record(row)?;
            if filter.matches(&record.metadata) {
                candidates.push(record);
            }
        }
        Ok(rank_by_similarity(query, &candidates, top_k))
    }

    async fn clear(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM vector_records WHERE collection = ?")
            .bind(&self.collection)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn get(&self, record_id: &str) -> Result<Option<VectorRecord>> {
        let row = sqlx::query("SELECT * FROM vector_records WHERE collection = ? AND record_id = ?")
            .bind(&self.collection)
            .bind(record_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn stats(&self) -> Result<Vec<StoreCount>> {
        let rows = sqlx::query(
            r#"
            SELECT project_name, entity_type, COUNT(*) AS records
            FROM vector_records
            WHERE collection = ?
            GROUP BY project_name, entity_type
            ORDER BY project_name, entity_type
            "#,
        )
        .bind(&self.collection)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let entity_type: String = row.get("entity_type");
                let records: i64 = row.get("records");
                Ok(StoreCount {
                    project_name: row.get("project_name"),
                    entity_type: parse_entity_type(&entity_type)?,
                    records: records as u64,
                })
            })
            .collect()
    }
}

pub struct SqliteCheckpointStore {
    pool: SqlitePool,
}

impl SqliteCheckpointStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_checkpoint(row: &SqliteRow) -> Result<SyncCheckpoint> {
        let entity_type: String = row.get("entity_type");
        Ok(SyncCheckpoint {
            project_name: row.get("project_name"),
            entity_type: parse_entity_type(&entity_type)?,
            last_synced_at: from_millis(row.get("last_synced_at"))?,
            cursor: row.get("cursor"),
            updated_at: from_millis(row.get("updated_at"))?,
        })
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn get(
        &self,
        project_name: &str,
        entity_type: EntityType,
    ) -> Result<Option<SyncCheckpoint>> {
        let row = sqlx::query(
            "SELECT * FROM sync_checkpoints WHERE project_name = ? AND entity_type = ?",
        )
        .bind(project_name)
        .bind(entity_type.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_checkpoint).transpose()
    }

    async fn set(&self, checkpoint: &SyncCheckpoint) -> Result<bool> {
        // The WHERE clause on the update arm keeps last_synced_at monotonic.
        let result = sqlx::query(
            r#"
            INSERT INTO sync_checkpoints (project_name, entity_type, last_synced_at, cursor, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(project_name, entity_type) DO UPDATE SET
                last_synced_at = excluded.last_synced_at,
                cursor = excluded.cursor,
                updated_at = excluded.updated_at
            WHERE excluded.last_synced_at >= sync_checkpoints.last_synced_at
            "#,
        )
        .bind(&checkpoint.project_name)
        .bind(checkpoint.entity_type.as_str())
        .bind(checkpoint.last_synced_at.timestamp_millis())
        .bind(&checkpoint.cursor)
        .bind(checkpoint.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn reset(&self, project_name: &str, entity_type: EntityType) -> Result<()> {
        sqlx::query("DELETE FROM sync_checkpoints WHERE project_name = ? AND entity_type = ?")
            .bind(project_name)
            .bind(entity_type.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<SyncCheckpoint>> {
        let rows = sqlx::query(
            "SELECT * FROM sync_checkpoints ORDER BY project_name, entity_type",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_checkpoint).collect()
    }
}

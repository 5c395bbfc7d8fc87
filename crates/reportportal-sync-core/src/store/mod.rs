//! Storage abstractions for the sync engine.
//!
//! [`VectorStore`] owns the embedded documents and [`CheckpointStore`]
//! owns per-unit sync progress. Both are async (via `async-trait`) so the
//! SQLite implementations in the application crate and the in-memory
//! implementations in [`memory`] are interchangeable behind `Arc<dyn _>`.
//!
//! | Method | Used by |
//! |--------|---------|
//! | [`VectorStore::upsert`] | every flush of a sync unit |
//! | [`VectorStore::delete_where`] | full sync reconciliation |
//! | [`VectorStore::search`] | downstream readers, `storage search` |
//! | [`VectorStore::clear`] | `storage clear` |
//! | [`CheckpointStore::get`] / [`CheckpointStore::set`] | incremental sync |
//! | [`CheckpointStore::reset`] | after a full sync |

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{EntityType, RecordFilter, SearchHit, StoreCount, SyncCheckpoint, VectorRecord};

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace records by `record_id`. Returns the number written.
    ///
    /// A record is either fully written or not written at all.
    async fn upsert(&self, records: &[VectorRecord]) -> Result<u64>;

    /// Remove every record of `entity_type` belonging to `project_name`.
    async fn delete_where(&self, project_name: &str, entity_type: EntityType) -> Result<u64>;

    /// Records matching `filter`, ranked by cosine similarity to `query`.
    async fn search(
        &self,
        query: &[f32],
        filter: &RecordFilter,
        top_k: usize,
    ) -> Result<Vec<SearchHit>>;

    /// Remove every record.
    async fn clear(&self) -> Result<u64>;

    async fn get(&self, record_id: &str) -> Result<Option<VectorRecord>>;

    /// Record counts per (project, entity type).
    async fn stats(&self) -> Result<Vec<StoreCount>>;
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn get(&self, project_name: &str, entity_type: EntityType)
        -> Result<Option<SyncCheckpoint>>;

    /// Atomically replace the checkpoint for its (project, entity type).
    ///
    /// A checkpoint older than the stored one is ignored; `last_synced_at`
    /// only moves forward. Returns whether the write took effect.
    async fn set(&self, checkpoint: &SyncCheckpoint) -> Result<bool>;

    async fn reset(&self, project_name: &str, entity_type: EntityType) -> Result<()>;

    async fn list(&self) -> Result<Vec<SyncCheckpoint>>;
}

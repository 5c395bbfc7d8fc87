//! In-memory store implementations for tests and embedding in other hosts.
//!
//! Both use `HashMap` behind `std::sync::RwLock`. Search is brute-force
//! cosine similarity over every stored vector.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::embedding::rank_by_similarity;
use crate::models::{EntityType, RecordFilter, SearchHit, StoreCount, SyncCheckpoint, VectorRecord};

use super::{CheckpointStore, VectorStore};

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory store lock poisoned")
}

#[derive(Default)]
pub struct InMemoryVectorStore {
    records: RwLock<HashMap<String, VectorRecord>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record ids currently stored, sorted.
    pub fn record_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .records
            .read()
            .map(|r| r.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<u64> {
        let mut stored = self.records.write().map_err(poisoned)?;
        for record in records {
            stored.insert(record.record_id.clone(), record.clone());
        }
        Ok(records.len() as u64)
    }

    async fn delete_where(&self, project_name: &str, entity_type: EntityType) -> Result<u64> {
        let mut stored = self.records.write().map_err(poisoned)?;
        let before = stored.len();
        stored.retain(|_, r| {
            !(r.metadata.project_name == project_name && r.metadata.entity_type == entity_type)
        });
        Ok((before - stored.len()) as u64)
    }

    async fn search(
        &self,
        query: &[f32],
        filter: &RecordFilter,
        top_k: usize,
    ) -> Result<Vec<SearchHit>> {
        let stored = self.records.read().map_err(poisoned)?;
        Ok(rank_by_similarity(
            query,
            stored.values().filter(|r| filter.matches(&r.metadata)),
            top_k,
        ))
    }

    async fn clear(&self) -> Result<u64> {
        let mut stored = self.records.write().map_err(poisoned)?;
        let removed = stored.len() as u64;
        stored.clear();
        Ok(removed)
    }

    async fn get(&self, record_id: &str) -> Result<Option<VectorRecord>> {
        let stored = self.records.read().map_err(poisoned)?;
        Ok(stored.get(record_id).cloned())
    }

    async fn stats(&self) -> Result<Vec<StoreCount>> {
        let stored = self.records.read().map_err(poisoned)?;
        let mut counts: BTreeMap<(String, EntityType), u64> = BTreeMap::new();
        for record in stored.values() {
            let key = (
                record.metadata.project_name.clone(),
                record.metadata.entity_type,
            );
            *counts.entry(key).or_default() += 1;
        }
        Ok(counts
            .into_iter()
            .map(|((project_name, entity_type), records)| StoreCount {
                project_name,
                entity_type,
                records,
            })
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: RwLock<HashMap<(String, EntityType), SyncCheckpoint>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn get(
        &self,
        project_name: &str,
        entity_type: EntityType,
    ) -> Result<Option<SyncCheckpoint>> {
        let stored = self.checkpoints.read().map_err(poisoned)?;
        Ok(stored.get(&(project_name.to_string(), entity_type)).cloned())
    }

    async fn set(&self, checkpoint: &SyncCheckpoint) -> Result<bool> {
        let mut stored = self.checkpoints.write().map_err(poisoned)?;
        let key = (checkpoint.project_name.clone(), checkpoint.entity_type);
        if let Some(existing) = stored.get(&key) {
            if checkpoint.last_synced_at < existing.last_synced_at {
                return Ok(false);
            }
        }
        stored.insert(key, checkpoint.clone());
        Ok(true)
    }

    async fn reset(&self, project_name: &str, entity_type: EntityType) -> Result<()> {
        let mut stored = self.checkpoints.write().map_err(poisoned)?;
        stored.remove(&(project_name.to_string(), entity_type));
        Ok(())
    }

    async fn list(&self) -> Result<Vec<SyncCheckpoint>> {
        let stored = self.checkpoints.read().map_err(poisoned)?;
        let mut all: Vec<SyncCheckpoint> = stored.values().cloned().collect();
        all.sort_by(|a, b| {
            (&a.project_name, a.entity_type).cmp(&(&b.project_name, b.entity_type))
        });
        Ok(all)
    }
}

//! `rpsync storage ...`: administrative access to the vector store.

use anyhow::{bail, Context, Result};

use reportportal_sync_core::models::{EntityType, RecordFilter, SearchHit};
use reportportal_sync_core::store::VectorStore;

use crate::config::Config;
use crate::db;
use crate::embedding::{create_embedder, embed_query};
use crate::migrate;
use crate::sqlite_store::SqliteVectorStore;

async fn open_store(config: &Config) -> Result<SqliteVectorStore> {
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;
    Ok(SqliteVectorStore::new(pool, &config.storage.collection))
}

/// Remove every record in the configured collection. Checkpoints are
/// kept; run `sync run --full` afterwards to repopulate.
pub async fn run_clear(config: &Config, yes: bool) -> Result<()> {
    if !yes {
        bail!(
            "refusing to clear collection '{}' without --yes",
            config.storage.collection
        );
    }
    let store = open_store(config).await?;
    let removed = store.clear().await?;
    println!(
        "Removed {} records from '{}'.",
        removed, config.storage.collection
    );
    Ok(())
}

/// Embed `query` with the configured provider and rank stored records.
pub async fn search(
    config: &Config,
    query: &str,
    filter: &RecordFilter,
    limit: usize,
) -> Result<Vec<SearchHit>> {
    let embedder =
        create_embedder(&config.embedding).context("Failed to set up embedding provider")?;
    let vector = embed_query(embedder.as_ref(), query).await?;
    let store = open_store(config).await?;
    store.search(&vector, filter, limit).await
}

pub async fn run_search(
    config: &Config,
    query: &str,
    project: Option<String>,
    entity_types: Vec<EntityType>,
    limit: usize,
    json: bool,
) -> Result<()> {
    let filter = RecordFilter {
        project_name: project,
        entity_types,
        modified_since: None,
    };
    let hits = search(config, query, &filter, limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }
    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        let meta = &hit.metadata;
        println!(
            "{}. [{:.2}] {} / {}",
            i + 1,
            hit.score,
            meta.project_name,
            hit.record_id
        );
        if let Some(ts) = meta.last_modified_at {
            println!("    modified: {}", ts.format("%Y-%m-%d %H:%M"));
        }
        let excerpt: String = hit.document.chars().take(160).collect();
        println!("    excerpt: \"{}\"", excerpt.replace('\n', " ").trim());
        println!();
    }
    Ok(())
}

pub async fn run_get(config: &Config, record_id: &str) -> Result<()> {
    let store = open_store(config).await?;
    let Some(record) = store.get(record_id).await? else {
        bail!("record not found: {}", record_id);
    };

    let raw: serde_json::Value =
        serde_json::from_str(&record.raw_json).unwrap_or(serde_json::Value::Null);
    let output = serde_json::json!({
        "record_id": record.record_id,
        "document": record.document,
        "metadata": record.metadata,
        "content_hash": record.content_hash,
        "dims": record.embedding.len(),
        "raw": raw,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index. Idempotent.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // One row per embedded entity; (collection, record_id) is the upsert key.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vector_records (
            collection TEXT NOT NULL,
            record_id TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            project_name TEXT NOT NULL,
            last_modified_at INTEGER,
            document TEXT NOT NULL,
            embedding BLOB NOT NULL,
            dims INTEGER NOT NULL,
            model TEXT NOT NULL DEFAULT '',
            fields_json TEXT NOT NULL DEFAULT '{}',
            raw_json TEXT NOT NULL DEFAULT '{}',
            content_hash TEXT NOT NULL,
            synced_at INTEGER NOT NULL,
            PRIMARY KEY (collection, record_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_checkpoints (
            project_name TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            last_synced_at INTEGER NOT NULL,
            cursor TEXT,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (project_name, entity_type)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_vector_records_unit ON vector_records(collection, project_name, entity_type)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_vector_records_modified ON vector_records(collection, last_modified_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

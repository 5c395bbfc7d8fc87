//! `rpsync sync status`: checkpoints and stored record counts per unit.

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};

use reportportal_sync_core::models::EntityType;
use reportportal_sync_core::store::{CheckpointStore, VectorStore};

use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::orchestrator::SyncStatus;
use crate::progress::format_number;
use crate::sqlite_store::{SqliteCheckpointStore, SqliteVectorStore};

pub async fn load_status(config: &Config) -> Result<SyncStatus> {
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;

    let checkpoints = SqliteCheckpointStore::new(pool.clone()).list().await?;
    let records = SqliteVectorStore::new(pool.clone(), &config.storage.collection)
        .stats()
        .await?;
    pool.close().await;
    Ok(SyncStatus {
        checkpoints,
        records,
    })
}

/// Per-unit row merging checkpoint and record count.
#[derive(Default)]
struct UnitRow {
    records: u64,
    last_synced_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

pub async fn run_status(config: &Config, json: bool) -> Result<()> {
    let status = load_status(config).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let mut rows: BTreeMap<(String, EntityType), UnitRow> = BTreeMap::new();
    for count in &status.records {
        rows.entry((count.project_name.clone(), count.entity_type))
            .or_default()
            .records = count.records;
    }
    for cp in &status.checkpoints {
        let row = rows
            .entry((cp.project_name.clone(), cp.entity_type))
            .or_default();
        row.last_synced_at = Some(cp.last_synced_at);
        row.updated_at = Some(cp.updated_at);
    }

    let total: u64 = status.records.iter().map(|c| c.records).sum();

    println!("ReportPortal Sync Status");
    println!("========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Collection:  {}", config.storage.collection);
    println!("  Records:     {}", format_number(total));

    if rows.is_empty() {
        println!();
        println!("  Nothing synced yet.");
        println!();
        return Ok(());
    }

    println!();
    println!(
        "  {:<20} {:<10} {:>9}   {:<18} {}",
        "PROJECT", "TYPE", "RECORDS", "CHECKPOINT", "LAST SYNC"
    );
    println!("  {}", "-".repeat(76));
    let now = Utc::now();
    for ((project, entity_type), row) in &rows {
        let checkpoint = row
            .last_synced_at
            .map(|ts| ts.format(STAMP).to_string())
            .unwrap_or_else(|| "-".to_string());
        let last_sync = row
            .updated_at
            .map(|ts| elapsed_label(ts, now))
            .unwrap_or_else(|| "never".to_string());
        println!(
            "  {:<20} {:<10} {:>9}   {:<18} {}",
            project,
            entity_type.as_str(),
            format_number(row.records),
            checkpoint,
            last_sync
        );
    }
    println!();
    Ok(())
}

const STAMP: &str = "%Y-%m-%d %H:%M";

/// How long before `now` the store last changed, coarsened to one unit.
/// Anything in the future or older than a month shows the absolute stamp.
fn elapsed_label(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let age = now.signed_duration_since(at);
    let (count, unit) = match age {
        a if a < Duration::zero() || a >= Duration::days(30) => {
            return at.format(STAMP).to_string()
        }
        a if a < Duration::minutes(1) => return "just now".to_string(),
        a if a < Duration::hours(1) => (a.num_minutes(), "min"),
        a if a < Duration::days(1) => (a.num_hours(), "hour"),
        a => (a.num_days(), "day"),
    };
    let plural = if count == 1 { "" } else { "s" };
    format!("{} {}{} ago", count, unit, plural)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_labels() {
        let now = DateTime::<Utc>::from_timestamp(1_760_000_000, 0).unwrap();
        assert_eq!(elapsed_label(now - Duration::seconds(20), now), "just now");
        assert_eq!(elapsed_label(now - Duration::minutes(1), now), "1 min ago");
        assert_eq!(elapsed_label(now - Duration::minutes(45), now), "45 mins ago");
        assert_eq!(elapsed_label(now - Duration::hours(2), now), "2 hours ago");
        assert_eq!(elapsed_label(now - Duration::days(3), now), "3 days ago");
        let old = DateTime::<Utc>::from_timestamp(0, 0).unwrap();
        assert_eq!(elapsed_label(old, now), "1970-01-01 00:00");
        assert_eq!(
            elapsed_label(now + Duration::hours(1), now),
            (now + Duration::hours(1)).format(STAMP).to_string()
        );
    }
}

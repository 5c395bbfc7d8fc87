//! `rpsync sync run`: wire the components from config and print the run report.

use std::fmt::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use reportportal_sync_core::models::{EntityType, SyncType};
use reportportal_sync_core::run::{RunState, SyncRun};

use crate::config::Config;
use crate::db;
use crate::embedding::create_embedder;
use crate::fetcher::HttpFetcher;
use crate::migrate;
use crate::orchestrator::{SyncOptions, SyncOrchestrator, SyncRequest};
use crate::progress::{format_number, SyncProgressReporter};
use crate::sqlite_store::{SqliteCheckpointStore, SqliteVectorStore};

/// Build an orchestrator backed by the HTTP fetcher and the SQLite stores.
pub async fn build_orchestrator(
    config: &Config,
    progress: Arc<dyn SyncProgressReporter>,
) -> Result<SyncOrchestrator> {
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;

    let embedder = create_embedder(&config.embedding).context("Failed to set up embedding provider")?;
    let fetcher = HttpFetcher::from_config(&config.api, &config.sync)?;
    let store = SqliteVectorStore::new(pool.clone(), &config.storage.collection)
        .with_model(embedder.model_name());
    let checkpoints = SqliteCheckpointStore::new(pool);

    Ok(SyncOrchestrator::new(
        Arc::new(fetcher),
        embedder,
        Arc::new(store),
        Arc::new(checkpoints),
        SyncOptions::from_config(config),
    )
    .with_progress(progress))
}

/// Run one sync and print its report. Returns the overall state so the
/// caller can pick the exit code.
pub async fn run_sync(
    config: &Config,
    full: bool,
    projects: Vec<String>,
    entity_types: Vec<EntityType>,
    json: bool,
    progress: Arc<dyn SyncProgressReporter>,
) -> Result<RunState> {
    let orchestrator = build_orchestrator(config, progress).await?;

    let request = if full {
        SyncRequest::full()
    } else {
        SyncRequest::incremental()
    }
    .with_projects(projects)
    .with_entity_types(entity_types);

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, finishing in-flight pages");
            ctrl_c.cancel();
        }
    });

    let run = orchestrator.sync(request, cancel).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&run)?);
    } else {
        print_run(&run);
    }
    Ok(run.state)
}

fn print_run(run: &SyncRun) {
    print!("{}", render_run(run));
}

/// Per-unit counts table followed by the run totals.
fn render_run(run: &SyncRun) -> String {
    let mode = match run.sync_type {
        SyncType::Full => "full",
        SyncType::Incremental => "incremental",
    };
    let mut out = String::new();
    let _ = writeln!(out, "sync {} ({})", run.run_id, mode);
    let _ = writeln!(
        out,
        "  {:<20} {:<10} {:<17} {:>6} {:>8} {:>12} {:>9} {:>7}",
        "PROJECT", "TYPE", "STATE", "PAGES", "FETCHED", "TRANSFORMED", "UPSERTED", "FAILED"
    );
    let _ = writeln!(out, "  {}", "-".repeat(96));
    for unit in &run.units {
        let _ = writeln!(
            out,
            "  {:<20} {:<10} {:<17} {:>6} {:>8} {:>12} {:>9} {:>7}",
            unit.project_name,
            unit.entity_type.as_str(),
            format!("{:?}", unit.state),
            format_number(unit.stats.pages),
            format_number(unit.stats.fetched),
            format_number(unit.stats.transformed),
            format_number(unit.stats.upserted),
            format_number(unit.stats.failed),
        );
        if let Some(err) = &unit.first_error {
            let _ = writeln!(out, "      error: {}", err);
        }
    }
    for err in &run.errors {
        let _ = writeln!(out, "  {}", err);
    }

    let totals = run.totals();
    let elapsed = (run.finished_at - run.started_at).num_milliseconds() as f64 / 1000.0;
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "  {:?}: {} fetched, {} transformed, {} upserted, {} failed in {:.1}s",
        run.state,
        format_number(totals.fetched),
        format_number(totals.transformed),
        format_number(totals.upserted),
        format_number(totals.failed),
        elapsed
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use reportportal_sync_core::run::UnitReport;

    #[test]
    fn run_table_lists_every_count() {
        let mut unit = UnitReport::new("demo", EntityType::Log);
        unit.stats.pages = 3;
        unit.stats.fetched = 1_500;
        unit.stats.transformed = 1_498;
        unit.stats.upserted = 1_497;
        unit.stats.failed = 3;
        unit.record_error("log 17 has no id");
        unit.finish(false);
        let now = Utc::now();
        let run = SyncRun {
            run_id: "run-1".to_string(),
            sync_type: SyncType::Incremental,
            project_names: vec!["demo".to_string()],
            entity_types: vec![EntityType::Log],
            started_at: now,
            finished_at: now,
            state: RunState::PartiallyFailed,
            units: vec![unit],
            errors: Vec::new(),
        };

        let table = render_run(&run);
        let header = table.lines().nth(1).unwrap();
        for column in ["PAGES", "FETCHED", "TRANSFORMED", "UPSERTED", "FAILED"] {
            assert!(header.contains(column), "missing {column}");
        }
        let row = table.lines().nth(3).unwrap();
        let cells: Vec<&str> = row.split_whitespace().collect();
        assert_eq!(cells, vec!["demo", "log", "PartiallyFailed", "3", "1,500", "1,498", "1,497", "3"]);
        assert!(table.contains("error: log 17 has no id"));
        assert!(table.contains("1,500 fetched, 1,498 transformed, 1,497 upserted, 3 failed"));
    }
}

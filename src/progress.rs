//! Sync progress reporting.
//!
//! Reports observable progress during `rpsync sync run` so users see which
//! units are running and how many records have landed. Progress is emitted
//! on **stderr** so stdout remains parseable for scripts.

use std::io::Write;
use std::sync::Arc;

use reportportal_sync_core::models::{EntityType, SyncType};
use reportportal_sync_core::run::UnitState;

/// Something worth telling the operator about while a run is in flight.
#[derive(Clone, Debug)]
pub enum SyncProgressEvent {
    UnitStarted {
        project: String,
        entity_type: EntityType,
        sync_type: SyncType,
    },
    /// Page `page` (1-based within the unit) arrived with `entities` items.
    PageFetched {
        project: String,
        entity_type: EntityType,
        page: u64,
        entities: u64,
    },
    /// A buffer of records was embedded and upserted.
    Flushed {
        project: String,
        entity_type: EntityType,
        upserted: u64,
        total_upserted: u64,
    },
    UnitFinished {
        project: String,
        entity_type: EntityType,
        state: UnitState,
        upserted: u64,
        failed: u64,
    },
}

/// Sink for [`SyncProgressEvent`]s emitted by the orchestrator.
pub trait SyncProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the orchestrator.
    fn report(&self, event: SyncProgressEvent);
}

/// Human-friendly progress on stderr: "sync demo/launch  upserted  1,234 records".
pub struct StderrProgress;

impl SyncProgressReporter for StderrProgress {
    fn report(&self, event: SyncProgressEvent) {
        let line = match &event {
            SyncProgressEvent::UnitStarted {
                project,
                entity_type,
                sync_type,
            } => format!("sync {}/{}  starting {} sync\n", project, entity_type, sync_type),
            SyncProgressEvent::PageFetched {
                project,
                entity_type,
                page,
                entities,
            } => format!(
                "sync {}/{}  page {}  {} items\n",
                project,
                entity_type,
                page,
                format_number(*entities)
            ),
            SyncProgressEvent::Flushed {
                project,
                entity_type,
                total_upserted,
                ..
            } => format!(
                "sync {}/{}  upserted  {} records\n",
                project,
                entity_type,
                format_number(*total_upserted)
            ),
            SyncProgressEvent::UnitFinished {
                project,
                entity_type,
                state,
                upserted,
                failed,
            } => format!(
                "sync {}/{}  {:?}  {} upserted, {} failed\n",
                project,
                entity_type,
                state,
                format_number(*upserted),
                format_number(*failed)
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// JSON-lines reporter, one event per line on stderr.
pub struct JsonProgress;

impl SyncProgressReporter for JsonProgress {
    fn report(&self, event: SyncProgressEvent) {
        let obj = match &event {
            SyncProgressEvent::UnitStarted {
                project,
                entity_type,
                sync_type,
            } => serde_json::json!({
                "event": "unit_started",
                "project": project,
                "entity_type": entity_type,
                "sync_type": sync_type,
            }),
            SyncProgressEvent::PageFetched {
                project,
                entity_type,
                page,
                entities,
            } => serde_json::json!({
                "event": "page_fetched",
                "project": project,
                "entity_type": entity_type,
                "page": page,
                "entities": entities,
            }),
            SyncProgressEvent::Flushed {
                project,
                entity_type,
                upserted,
                total_upserted,
            } => serde_json::json!({
                "event": "flushed",
                "project": project,
                "entity_type": entity_type,
                "upserted": upserted,
                "total_upserted": total_upserted,
            }),
            SyncProgressEvent::UnitFinished {
                project,
                entity_type,
                state,
                upserted,
                failed,
            } => serde_json::json!({
                "event": "unit_finished",
                "project": project,
                "entity_type": entity_type,
                "state": state,
                "upserted": upserted,
                "failed": failed,
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// Discards every event.
pub struct NoProgress;

impl SyncProgressReporter for NoProgress {
    fn report(&self, _event: SyncProgressEvent) {}
}

pub(crate) fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// How `--progress` renders sync events.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human output on an interactive stderr; silent when piped.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Build a reporter for this mode.
    pub fn reporter(&self) -> Arc<dyn SyncProgressReporter> {
        match self {
            ProgressMode::Off => Arc::new(NoProgress),
            ProgressMode::Human => Arc::new(StderrProgress),
            ProgressMode::Json => Arc::new(JsonProgress),
        }
    }
}

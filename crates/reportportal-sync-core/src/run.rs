//! Run report types.
//!
//! A [`SyncRun`] lives for a single orchestrator invocation. It is handed
//! back to the caller and never persisted.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{EntityType, SyncType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    Completed,
    PartiallyFailed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Completed,
    PartiallyFailed,
    Failed,
}

impl RunState {
    /// Process exit code for this outcome.
    pub fn exit_code(&self) -> u8 {
        match self {
            RunState::Completed => 0,
            RunState::Failed => 1,
            RunState::PartiallyFailed => 2,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UnitStats {
    pub pages: u64,
    pub fetched: u64,
    pub transformed: u64,
    pub embed_batches: u64,
    pub upserted: u64,
    pub failed: u64,
}

impl UnitStats {
    pub fn add(&mut self, other: &UnitStats) {
        self.pages += other.pages;
        self.fetched += other.fetched;
        self.transformed += other.transformed;
        self.embed_batches += other.embed_batches;
        self.upserted += other.upserted;
        self.failed += other.failed;
    }
}

/// Outcome of one (project, entity type) unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitReport {
    pub project_name: String,
    pub entity_type: EntityType,
    pub state: UnitState,
    pub stats: UnitStats,
    pub first_error: Option<String>,
    /// Checkpoint after the unit finished, if one exists.
    pub checkpoint: Option<DateTime<Utc>>,
}

impl UnitReport {
    pub fn new(project_name: &str, entity_type: EntityType) -> Self {
        Self {
            project_name: project_name.to_string(),
            entity_type,
            state: UnitState::Completed,
            stats: UnitStats::default(),
            first_error: None,
            checkpoint: None,
        }
    }

    /// Remember `error` unless an earlier one was already recorded.
    pub fn record_error(&mut self, error: impl ToString) {
        if self.first_error.is_none() {
            self.first_error = Some(error.to_string());
        }
    }

    pub fn has_errors(&self) -> bool {
        self.first_error.is_some()
    }

    /// Settle the unit's final state from what was recorded.
    pub fn finish(&mut self, cancelled: bool) {
        self.state = match (self.has_errors(), cancelled) {
            (false, false) => UnitState::Completed,
            (false, true) => UnitState::Cancelled,
            (true, _) if self.stats.upserted > 0 => UnitState::PartiallyFailed,
            (true, _) => UnitState::Failed,
        };
    }
}

/// Report of one orchestrator invocation.
#[derive(Debug, Clone, Serialize)]
pub struct SyncRun {
    pub run_id: String,
    pub sync_type: SyncType,
    pub project_names: Vec<String>,
    pub entity_types: Vec<EntityType>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub state: RunState,
    pub units: Vec<UnitReport>,
    /// Run-level errors not tied to a single unit.
    pub errors: Vec<String>,
}

impl SyncRun {
    /// Overall state: `Failed` when the run was aborted or every unit
    /// failed outright, `Completed` when every unit completed, and
    /// `PartiallyFailed` otherwise.
    pub fn overall_state(units: &[UnitReport], aborted: bool) -> RunState {
        if aborted {
            return RunState::Failed;
        }
        if units.iter().all(|u| u.state == UnitState::Completed) {
            return RunState::Completed;
        }
        if units.iter().all(|u| u.state == UnitState::Failed) {
            return RunState::Failed;
        }
        RunState::PartiallyFailed
    }

    pub fn totals(&self) -> UnitStats {
        let mut totals = UnitStats::default();
        for unit in &self.units {
            totals.add(&unit.stats);
        }
        totals
    }

    pub fn unit(&self, project_name: &str, entity_type: EntityType) -> Option<&UnitReport> {
        self.units
            .iter()
            .find(|u| u.project_name == project_name && u.entity_type == entity_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(state: UnitState) -> UnitReport {
        let mut unit = UnitReport::new("demo", EntityType::Launch);
        unit.state = state;
        unit
    }

    #[test]
    fn finish_derives_unit_state() {
        let mut clean = UnitReport::new("demo", EntityType::Log);
        clean.finish(false);
        assert_eq!(clean.state, UnitState::Completed);

        let mut partial = UnitReport::new("demo", EntityType::Log);
        partial.stats.upserted = 3;
        partial.record_error("first");
        partial.record_error("second");
        partial.finish(false);
        assert_eq!(partial.state, UnitState::PartiallyFailed);
        assert_eq!(partial.first_error.as_deref(), Some("first"));

        let mut failed = UnitReport::new("demo", EntityType::Log);
        failed.record_error("boom");
        failed.finish(false);
        assert_eq!(failed.state, UnitState::Failed);

        let mut cancelled = UnitReport::new("demo", EntityType::Log);
        cancelled.finish(true);
        assert_eq!(cancelled.state, UnitState::Cancelled);
    }

    #[test]
    fn overall_state_rules() {
        use UnitState::*;
        assert_eq!(SyncRun::overall_state(&[], false), RunState::Completed);
        assert_eq!(
            SyncRun::overall_state(&[unit(Completed), unit(Completed)], false),
            RunState::Completed
        );
        assert_eq!(
            SyncRun::overall_state(&[unit(Completed), unit(Failed)], false),
            RunState::PartiallyFailed
        );
        assert_eq!(
            SyncRun::overall_state(&[unit(Failed), unit(Failed)], false),
            RunState::Failed
        );
        assert_eq!(
            SyncRun::overall_state(&[unit(Completed)], true),
            RunState::Failed
        );
        assert_eq!(RunState::PartiallyFailed.exit_code(), 2);
    }
}

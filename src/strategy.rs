//! Full and incremental sync as one strategy type.

use chrono::{DateTime, Duration, Utc};

use reportportal_sync_core::models::{SyncCheckpoint, SyncType};
use reportportal_sync_core::run::UnitState;

/// What to do with a unit's checkpoint once the unit has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointAction {
    Keep,
    /// Drop the stored checkpoint and start over from this instant.
    ResetTo(DateTime<Utc>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// Re-fetch everything and replace the stored records of each unit.
    Full,
    /// Fetch only what changed since the checkpoint, or since
    /// `now - lookback` when there is none.
    Incremental { lookback: Duration },
}

impl SyncStrategy {
    pub fn incremental_days(days: u32) -> Self {
        SyncStrategy::Incremental {
            lookback: Duration::days(i64::from(days)),
        }
    }

    pub fn sync_type(&self) -> SyncType {
        match self {
            SyncStrategy::Full => SyncType::Full,
            SyncStrategy::Incremental { .. } => SyncType::Incremental,
        }
    }

    /// Lower bound (exclusive) on `last_modified_at` for this fetch.
    pub fn compute_fetch_window(
        &self,
        checkpoint: Option<&SyncCheckpoint>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        match self {
            SyncStrategy::Full => None,
            SyncStrategy::Incremental { lookback } => Some(
                checkpoint
                    .map(|c| c.last_synced_at)
                    .unwrap_or(now - *lookback),
            ),
        }
    }

    /// Whether stored records are replaced rather than merged.
    pub fn reconciles(&self) -> bool {
        matches!(self, SyncStrategy::Full)
    }

    pub fn reads_checkpoint(&self) -> bool {
        matches!(self, SyncStrategy::Incremental { .. })
    }

    /// Whether each successful flush moves the checkpoint forward.
    pub fn advances_checkpoint(&self) -> bool {
        matches!(self, SyncStrategy::Incremental { .. })
    }

    pub fn on_complete(&self, state: UnitState, unit_started_at: DateTime<Utc>) -> CheckpointAction {
        match (self, state) {
            (SyncStrategy::Full, UnitState::Completed) => CheckpointAction::ResetTo(unit_started_at),
            _ => CheckpointAction::Keep,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reportportal_sync_core::models::EntityType;

    #[test]
    fn incremental_window_prefers_checkpoint() {
        let now = Utc::now();
        let strategy = SyncStrategy::incremental_days(7);
        assert_eq!(
            strategy.compute_fetch_window(None, now),
            Some(now - Duration::days(7))
        );

        let checkpoint = SyncCheckpoint::new("demo", EntityType::Launch, now - Duration::days(2));
        assert_eq!(
            strategy.compute_fetch_window(Some(&checkpoint), now),
            Some(now - Duration::days(2))
        );
    }

    #[test]
    fn full_sync_has_no_window_and_resets_on_success() {
        let now = Utc::now();
        let checkpoint = SyncCheckpoint::new("demo", EntityType::Log, now);
        assert_eq!(SyncStrategy::Full.compute_fetch_window(Some(&checkpoint), now), None);
        assert!(SyncStrategy::Full.reconciles());
        assert!(!SyncStrategy::Full.advances_checkpoint());
        assert_eq!(
            SyncStrategy::Full.on_complete(UnitState::Completed, now),
            CheckpointAction::ResetTo(now)
        );
        assert_eq!(
            SyncStrategy::Full.on_complete(UnitState::PartiallyFailed, now),
            CheckpointAction::Keep
        );
        assert_eq!(
            SyncStrategy::incremental_days(1).on_complete(UnitState::Completed, now),
            CheckpointAction::Keep
        );
    }
}

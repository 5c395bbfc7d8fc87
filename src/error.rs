//! Sync error taxonomy.
//!
//! Every failure the orchestrator reasons about is one of these variants.
//! Collaborator traits return `anyhow::Result`; the orchestrator classifies
//! those errors into a [`SyncError`] at the call site.

use std::fmt;

use reportportal_sync_core::transform::TransformError;
use thiserror::Error;

/// Whether retrying the same request could succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transient,
    Permanent,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Transient => f.write_str("transient"),
            FailureKind::Permanent => f.write_str("permanent"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    /// A page could not be fetched.
    #[error("fetch failed ({kind}): {message}")]
    FetchFailed { kind: FailureKind, message: String },

    /// One entity could not be transformed. Never fatal to its page.
    #[error("transform failed: {0}")]
    TransformFailed(#[from] TransformError),

    /// An embedding batch failed even after being split.
    #[error("embedding failed for {count} record(s): {message}")]
    EmbeddingFailed { count: usize, message: String },

    /// A flush could not be written; its pages are not checkpointed.
    #[error("upsert failed: {0}")]
    UpsertFailed(String),

    /// The remote rejected the credentials. Aborts the whole run.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The checkpoint store could not be read or written.
    #[error("checkpoint unavailable: {0}")]
    CheckpointUnavailable(String),
}

impl SyncError {
    pub fn transient(message: impl Into<String>) -> Self {
        SyncError::FetchFailed {
            kind: FailureKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        SyncError::FetchFailed {
            kind: FailureKind::Permanent,
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::AuthFailed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reportportal_sync_core::models::EntityType;

    #[test]
    fn messages_name_the_failure() {
        assert_eq!(
            SyncError::transient("503 Service Unavailable").to_string(),
            "fetch failed (transient): 503 Service Unavailable"
        );
        let err: SyncError = TransformError::MissingField {
            entity_type: EntityType::Log,
            field: "id",
        }
        .into();
        assert_eq!(
            err.to_string(),
            "transform failed: log entity is missing required field 'id'"
        );
        assert!(SyncError::AuthFailed("401".into()).is_fatal());
        assert!(!SyncError::permanent("404").is_fatal());
    }
}

//! Core data models.
//!
//! [`RemoteEntity`] is what the fetcher hands out, [`NormalizedRecord`] is
//! what the transformer produces, [`VectorRecord`] is what the vector store
//! persists, and [`SyncCheckpoint`] is the per-unit progress marker.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// The seven kinds of remote entity mirrored into the vector store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Project,
    User,
    Launch,
    TestItem,
    Log,
    Filter,
    Dashboard,
}

impl EntityType {
    /// Every entity type, in the order a default run visits them.
    pub const ALL: [EntityType; 7] = [
        EntityType::Project,
        EntityType::User,
        EntityType::Launch,
        EntityType::TestItem,
        EntityType::Log,
        EntityType::Filter,
        EntityType::Dashboard,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Project => "project",
            EntityType::User => "user",
            EntityType::Launch => "launch",
            EntityType::TestItem => "test_item",
            EntityType::Log => "log",
            EntityType::Filter => "filter",
            EntityType::Dashboard => "dashboard",
        }
    }

    /// Raw payload keys that carry the entity's id, most specific first.
    pub fn id_keys(&self) -> &'static [&'static str] {
        match self {
            EntityType::Project => &["projectName", "id"],
            EntityType::User => &["userId", "id"],
            _ => &["id"],
        }
    }

    /// Raw payload keys that may carry the last modification time.
    pub fn timestamp_keys(&self) -> &'static [&'static str] {
        match self {
            EntityType::Launch | EntityType::TestItem => &["lastModified", "endTime", "startTime"],
            EntityType::Log => &["lastModified", "logTime", "time"],
            EntityType::User => &["lastModified", "lastLogin"],
            EntityType::Project | EntityType::Filter | EntityType::Dashboard => {
                &["lastModified", "creationDate"]
            }
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown entity type '{0}' (expected one of: project, user, launch, test_item, log, filter, dashboard)")]
pub struct UnknownEntityType(pub String);

impl FromStr for EntityType {
    type Err = UnknownEntityType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        EntityType::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| UnknownEntityType(s.to_string()))
    }
}

/// Full or incremental synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncType {
    Full,
    Incremental,
}

impl fmt::Display for SyncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncType::Full => f.write_str("full"),
            SyncType::Incremental => f.write_str("incremental"),
        }
    }
}

/// One raw entity as returned by the remote API.
///
/// `id` and `last_modified_at` are lifted out of `raw_fields` when the
/// entity is constructed. Either may be absent; the transformer decides
/// whether that is fatal.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEntity {
    pub entity_type: EntityType,
    pub id: Option<String>,
    pub project_name: String,
    pub last_modified_at: Option<DateTime<Utc>>,
    pub raw_fields: Value,
}

impl RemoteEntity {
    pub fn from_raw(entity_type: EntityType, project_name: &str, raw_fields: Value) -> Self {
        let id = entity_type
            .id_keys()
            .iter()
            .find_map(|key| scalar_string(raw_fields.get(*key)?));
        let last_modified_at = entity_type
            .timestamp_keys()
            .iter()
            .find_map(|key| parse_timestamp(raw_fields.get(*key)?));
        Self {
            entity_type,
            id,
            project_name: project_name.to_string(),
            last_modified_at,
            raw_fields,
        }
    }
}

/// Render a JSON scalar as a non-empty string.
pub fn scalar_string(value: &Value) -> Option<String> {
    let s = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Parse a remote timestamp.
///
/// Accepts epoch milliseconds (as a number or a digit string), RFC 3339,
/// and naive ISO date-times (read as UTC).
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            let millis = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            Utc.timestamp_millis_opt(millis).single()
        }
        Value::String(s) => {
            let s = s.trim();
            if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) {
                return Utc.timestamp_millis_opt(s.parse().ok()?).single();
            }
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        }
        _ => None,
    }
}

/// Output of the transformer: the normalized view of one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    /// `entity_type:id`, or `user:project/id` for users.
    pub record_id: String,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub project_name: String,
    pub last_modified_at: Option<DateTime<Utc>>,
    /// Entity-specific scalar fields kept as searchable metadata.
    pub fields: Map<String, Value>,
    /// The complete raw payload, serialized.
    pub raw_json: String,
}

impl NormalizedRecord {
    /// Users are listed per project and one user belongs to many projects,
    /// so their ids are scoped by project. Every other id is global.
    pub fn record_id_for(entity_type: EntityType, project_name: &str, entity_id: &str) -> String {
        match entity_type {
            EntityType::User => format!("{}:{}/{}", entity_type, project_name, entity_id),
            _ => format!("{}:{}", entity_type, entity_id),
        }
    }
}

/// Filterable metadata stored alongside every vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub project_name: String,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub last_modified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

/// A document plus its embedding, keyed by `record_id`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorRecord {
    pub record_id: String,
    pub document: String,
    #[serde(skip)]
    pub embedding: Vec<f32>,
    pub metadata: RecordMetadata,
    #[serde(skip)]
    pub raw_json: String,
    /// SHA-256 of `document`.
    pub content_hash: String,
}

impl VectorRecord {
    pub fn new(record: NormalizedRecord, document: String, embedding: Vec<f32>) -> Self {
        let content_hash = content_hash(&document);
        Self {
            record_id: record.record_id,
            document,
            embedding,
            metadata: RecordMetadata {
                project_name: record.project_name,
                entity_type: record.entity_type,
                entity_id: record.entity_id,
                last_modified_at: record.last_modified_at,
                fields: record.fields,
            },
            raw_json: record.raw_json,
            content_hash,
        }
    }
}

pub fn content_hash(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

/// Persisted sync progress for one (project, entity type) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncCheckpoint {
    pub project_name: String,
    pub entity_type: EntityType,
    /// Upper bound of `last_modified_at` already mirrored.
    pub last_synced_at: DateTime<Utc>,
    /// Remote cursor of the last page folded into `last_synced_at`.
    pub cursor: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl SyncCheckpoint {
    pub fn new(project_name: &str, entity_type: EntityType, last_synced_at: DateTime<Utc>) -> Self {
        Self {
            project_name: project_name.to_string(),
            entity_type,
            last_synced_at,
            cursor: None,
            updated_at: Utc::now(),
        }
    }

    pub fn with_cursor(mut self, cursor: Option<String>) -> Self {
        self.cursor = cursor;
        self
    }
}

/// Metadata filter applied by [`VectorStore::search`](crate::store::VectorStore::search).
///
/// Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    pub project_name: Option<String>,
    pub entity_types: Vec<EntityType>,
    pub modified_since: Option<DateTime<Utc>>,
}

impl RecordFilter {
    pub fn matches(&self, metadata: &RecordMetadata) -> bool {
        if let Some(project) = &self.project_name {
            if &metadata.project_name != project {
                return false;
            }
        }
        if !self.entity_types.is_empty() && !self.entity_types.contains(&metadata.entity_type) {
            return false;
        }
        if let Some(since) = self.modified_since {
            match metadata.last_modified_at {
                Some(ts) if ts >= since => {}
                _ => return false,
            }
        }
        true
    }
}

/// One similarity search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub record_id: String,
    pub score: f32,
    pub document: String,
    pub metadata: RecordMetadata,
}

/// Number of stored records for one (project, entity type) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreCount {
    pub project_name: String,
    pub entity_type: EntityType,
    pub records: u64,
}

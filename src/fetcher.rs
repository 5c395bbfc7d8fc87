//! Rate-limited, retrying page fetcher for the ReportPortal API.
//!
//! [`EntityFetcher`] is the seam the orchestrator depends on;
//! [`HttpFetcher`] is the real implementation. [`PageStream`] turns a
//! fetcher into a lazy, restartable sequence of pages for one unit.
//!
//! # Endpoints
//!
//! | Entity | Path |
//! |--------|------|
//! | project | `/v1/project/{project}` |
//! | user | `/v1/project/{project}/users` |
//! | launch | `/v1/{project}/launch` |
//! | test_item | `/v1/{project}/item` |
//! | log | `/v1/{project}/log` |
//! | filter | `/v1/{project}/filter` |
//! | dashboard | `/v1/{project}/dashboard` |
//!
//! Paged endpoints receive `page.page` (1-based cursor), `page.size`,
//! `page.sort=lastModified,ASC`, and `filter.gt.lastModified` (epoch ms)
//! when a lower bound is known.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, RETRY_AFTER};
use reqwest::Url;
use serde_json::Value;

use reportportal_sync_core::models::{scalar_string, EntityType, RemoteEntity};

use crate::config::{ApiConfig, SyncConfig};
use crate::error::SyncError;
use crate::rate_limit::{RequestBudget, TokenBucket};
use crate::retry::{parse_retry_after, Attempt, Disposition, RetryPolicy};

/// One page of entities.
#[derive(Debug, Clone)]
pub struct Page {
    pub entities: Vec<RemoteEntity>,
    /// Cursor this page was fetched with.
    pub cursor: String,
    /// Cursor of the following page, or `None` when this is the last one.
    pub next_cursor: Option<String>,
}

#[async_trait]
pub trait EntityFetcher: Send + Sync {
    /// Fetch the page at `cursor` (the first page when `None`).
    async fn fetch_page(
        &self,
        entity_type: EntityType,
        project_name: &str,
        since: Option<DateTime<Utc>>,
        cursor: Option<&str>,
    ) -> Result<Page, SyncError>;

    /// Names of every project visible to the configured credentials.
    async fn list_projects(&self) -> Result<Vec<String>, SyncError>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
    base_url: Url,
    token: String,
    page_size: usize,
    budget: Arc<dyn RequestBudget>,
    policy: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(
        api: &ApiConfig,
        page_size: usize,
        budget: Arc<dyn RequestBudget>,
        policy: RetryPolicy,
    ) -> anyhow::Result<Self> {
        let base_url = Url::parse(api.base_url.trim_end_matches('/'))
            .map_err(|e| anyhow::anyhow!("invalid api.base_url '{}': {}", api.base_url, e))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("api.base_url '{}' cannot carry a path", api.base_url);
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(api.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url,
            token: api.token.clone(),
            page_size: page_size.max(1),
            budget,
            policy,
        })
    }

    /// Fetcher with a token bucket and retry policy built from `[sync]`.
    pub fn from_config(api: &ApiConfig, sync: &SyncConfig) -> anyhow::Result<Self> {
        Self::new(
            api,
            sync.batch_size,
            Arc::new(TokenBucket::per_second(sync.requests_per_second)),
            RetryPolicy::from_config(sync),
        )
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn endpoint(&self, entity_type: EntityType, project: &str) -> Url {
        match entity_type {
            EntityType::Project => self.url(&["v1", "project", project]),
            EntityType::User => self.url(&["v1", "project", project, "users"]),
            EntityType::Launch => self.url(&["v1", project, "launch"]),
            EntityType::TestItem => self.url(&["v1", project, "item"]),
            EntityType::Log => self.url(&["v1", project, "log"]),
            EntityType::Filter => self.url(&["v1", project, "filter"]),
            EntityType::Dashboard => self.url(&["v1", project, "dashboard"]),
        }
    }

    async fn get_json(&self, url: &Url, query: &[(&str, String)]) -> Result<Value, SyncError> {
        self.policy.run(|_| self.attempt(url, query)).await
    }

    async fn attempt(&self, url: &Url, query: &[(&str, String)]) -> Attempt<Value> {
        self.budget.acquire().await;
        let response = self
            .client
            .get(url.clone())
            .bearer_auth(&self.token)
            .header(ACCEPT, "application/json")
            .query(query)
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) if e.is_builder() => {
                return Attempt::Permanent(SyncError::permanent(format!(
                    "invalid request to {}: {}",
                    url, e
                )))
            }
            Err(e) => {
                return Attempt::Transient {
                    error: format!("request to {} failed: {}", url, e),
                    retry_after: None,
                }
            }
        };

        let status = response.status();
        if status.is_success() {
            return match response.json::<Value>().await {
                Ok(json) => Attempt::Success(json),
                Err(e) => Attempt::Permanent(SyncError::permanent(format!(
                    "malformed response from {}: {}",
                    url, e
                ))),
            };
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let body: String = response
            .text()
            .await
            .unwrap_or_default()
            .chars()
            .take(200)
            .collect();
        let message = format!("{} returned {}: {}", url.path(), status, body);

        match self.policy.classify(status) {
            Disposition::Retry => Attempt::Transient {
                error: message,
                retry_after,
            },
            Disposition::Unauthorized => Attempt::Permanent(SyncError::AuthFailed(message)),
            Disposition::Fail => Attempt::Permanent(SyncError::permanent(message)),
        }
    }
}

#[async_trait]
impl EntityFetcher for HttpFetcher {
    #[tracing::instrument(skip_all, fields(entity_type = %entity_type, project = %project_name, cursor = ?cursor))]
    async fn fetch_page(
        &self,
        entity_type: EntityType,
        project_name: &str,
        since: Option<DateTime<Utc>>,
        cursor: Option<&str>,
    ) -> Result<Page, SyncError> {
        let page_number: u64 = match cursor {
            None => 1,
            Some(c) => c
                .parse()
                .map_err(|_| SyncError::permanent(format!("invalid page cursor '{}'", c)))?,
        };

        let mut query = vec![
            ("page.page", page_number.to_string()),
            ("page.size", self.page_size.to_string()),
            ("page.sort", "lastModified,ASC".to_string()),
        ];
        if let Some(since) = since {
            query.push(("filter.gt.lastModified", since.timestamp_millis().to_string()));
        }

        let url = self.endpoint(entity_type, project_name);
        let json = self.get_json(&url, &query).await?;
        let page = parse_page(entity_type, project_name, page_number, self.page_size, json)?;
        tracing::debug!(
            count = page.entities.len(),
            last = page.next_cursor.is_none(),
            "fetched page"
        );
        Ok(page)
    }

    async fn list_projects(&self) -> Result<Vec<String>, SyncError> {
        let url = self.url(&["v1", "project", "names"]);
        let json = self.get_json(&url, &[]).await?;
        let items = match &json {
            Value::Array(items) => items,
            Value::Object(map) => map
                .get("content")
                .and_then(Value::as_array)
                .ok_or_else(|| SyncError::permanent("project list has no content array"))?,
            _ => return Err(SyncError::permanent("project list is not an array")),
        };
        Ok(items
            .iter()
            .filter_map(|item| match item {
                Value::Object(_) => item
                    .get("projectName")
                    .or_else(|| item.get("name"))
                    .and_then(scalar_string),
                other => scalar_string(other),
            })
            .collect())
    }
}

/// Interpret one response body as a page.
///
/// Accepts the paged `{content, page}` envelope or a bare array. The project
/// endpoint answers with a single object. Arrays and that object are always
/// final pages.
fn parse_page(
    entity_type: EntityType,
    project_name: &str,
    requested: u64,
    page_size: usize,
    json: Value,
) -> Result<Page, SyncError> {
    let to_entity = |raw: Value| RemoteEntity::from_raw(entity_type, project_name, raw);
    let cursor = requested.to_string();

    let mut map = match json {
        Value::Object(map) if map.contains_key("content") => map,
        Value::Array(items) => {
            return Ok(Page {
                entities: items.into_iter().map(to_entity).collect(),
                cursor,
                next_cursor: None,
            })
        }
        single @ Value::Object(_) if entity_type == EntityType::Project => {
            return Ok(Page {
                entities: vec![to_entity(single)],
                cursor,
                next_cursor: None,
            })
        }
        Value::Object(map) => {
            let keys: Vec<&str> = map.keys().map(String::as_str).take(4).collect();
            return Err(SyncError::permanent(format!(
                "malformed {} page: object without content (keys: {})",
                entity_type,
                keys.join(", ")
            )));
        }
        other => {
            return Err(SyncError::permanent(format!(
                "malformed {} page: expected an object or array, got {}",
                entity_type,
                json_kind(&other)
            )))
        }
    };

    let content = match map.remove("content") {
        Some(Value::Array(items)) => items,
        Some(other) => {
            return Err(SyncError::permanent(format!(
                "malformed {} page: content is {}",
                entity_type,
                json_kind(&other)
            )))
        }
        None => Vec::new(),
    };
    let meta = map.get("page");
    let number = meta.and_then(|m| m.get("number")).and_then(Value::as_u64);
    let total_pages = meta
        .and_then(|m| m.get("totalPages"))
        .and_then(Value::as_u64);

    let next_cursor = if content.is_empty() {
        None
    } else if number.is_some_and(|n| n != requested) {
        tracing::warn!(
            entity_type = %entity_type,
            project = %project_name,
            requested,
            returned = number,
            "server returned a different page than requested; treating as end of stream"
        );
        None
    } else {
        let more = match total_pages {
            Some(total) => requested < total,
            None => content.len() >= page_size,
        };
        more.then(|| (requested + 1).to_string())
    };

    Ok(Page {
        entities: content.into_iter().map(to_entity).collect(),
        cursor,
        next_cursor,
    })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Lazy sequence of pages for one (project, entity type) unit.
///
/// Pulling stops after the last page, after the first error, or when the
/// fetcher hands back the cursor it was just given. Dropping the stream
/// is all it takes to cancel; a new stream built with
/// [`PageStream::starting_at`] resumes from any cursor.
pub struct PageStream<'a> {
    fetcher: &'a dyn EntityFetcher,
    entity_type: EntityType,
    project_name: String,
    since: Option<DateTime<Utc>>,
    cursor: Option<String>,
    finished: bool,
}

impl<'a> PageStream<'a> {
    pub fn new(
        fetcher: &'a dyn EntityFetcher,
        entity_type: EntityType,
        project_name: &str,
        since: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            fetcher,
            entity_type,
            project_name: project_name.to_string(),
            since,
            cursor: None,
            finished: false,
        }
    }

    pub fn starting_at(mut self, cursor: Option<String>) -> Self {
        self.cursor = cursor;
        self
    }

    /// The cursor the next pull will use.
    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    /// No further pull will reach the fetcher.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub async fn next_page(&mut self) -> Option<Result<Page, SyncError>> {
        if self.finished {
            return None;
        }
        let result = self
            .fetcher
            .fetch_page(
                self.entity_type,
                &self.project_name,
                self.since,
                self.cursor.as_deref(),
            )
            .await;

        match &result {
            Ok(page) => match &page.next_cursor {
                None => self.finished = true,
                Some(next) if Some(next) == self.cursor.as_ref() || *next == page.cursor => {
                    tracing::warn!(
                        entity_type = %self.entity_type,
                        project = %self.project_name,
                        cursor = %next,
                        "cursor did not advance; treating as end of stream"
                    );
                    self.finished = true;
                }
                Some(next) => self.cursor = Some(next.clone()),
            },
            Err(_) => self.finished = true,
        }
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn paged_envelope_advances_until_total() {
        let body = json!({
            "content": [{"id": 1}, {"id": 2}],
            "page": {"number": 1, "size": 2, "totalElements": 3, "totalPages": 2}
        });
        let page = parse_page(EntityType::Launch, "demo", 1, 2, body).unwrap();
        assert_eq!(page.entities.len(), 2);
        assert_eq!(page.next_cursor.as_deref(), Some("2"));

        let last = json!({
            "content": [{"id": 3}],
            "page": {"number": 2, "size": 2, "totalElements": 3, "totalPages": 2}
        });
        let page = parse_page(EntityType::Launch, "demo", 2, 2, last).unwrap();
        assert_eq!(page.next_cursor, None);
    }

    #[test]
    fn empty_page_is_final() {
        let body = json!({"content": [], "page": {"number": 4, "totalPages": 9}});
        let page = parse_page(EntityType::Log, "demo", 4, 50, body).unwrap();
        assert!(page.entities.is_empty());
        assert_eq!(page.next_cursor, None);
    }

    #[test]
    fn mismatched_page_number_ends_stream() {
        let body = json!({"content": [{"id": 1}], "page": {"number": 1, "totalPages": 5}});
        let page = parse_page(EntityType::Log, "demo", 3, 1, body).unwrap();
        assert_eq!(page.entities.len(), 1);
        assert_eq!(page.next_cursor, None);
    }

    #[test]
    fn short_page_without_metadata_is_final() {
        let full = json!({"content": [{"id": 1}, {"id": 2}]});
        let page = parse_page(EntityType::Filter, "demo", 1, 2, full).unwrap();
        assert_eq!(page.next_cursor.as_deref(), Some("2"));
        let short = json!({"content": [{"id": 3}]});
        let page = parse_page(EntityType::Filter, "demo", 2, 2, short).unwrap();
        assert_eq!(page.next_cursor, None);
    }

    #[test]
    fn single_object_and_array_are_final_pages() {
        let project = json!({"projectName": "demo", "entryType": "INTERNAL"});
        let page = parse_page(EntityType::Project, "demo", 1, 100, project).unwrap();
        assert_eq!(page.entities[0].id.as_deref(), Some("demo"));
        assert_eq!(page.next_cursor, None);

        let users = json!([{"userId": "a"}, {"userId": "b"}]);
        let page = parse_page(EntityType::User, "demo", 1, 100, users).unwrap();
        assert_eq!(page.entities.len(), 2);
    }

    #[test]
    fn malformed_shapes_are_permanent() {
        let err = parse_page(EntityType::Log, "demo", 1, 10, json!("nope")).unwrap_err();
        assert!(matches!(
            err,
            SyncError::FetchFailed {
                kind: crate::error::FailureKind::Permanent,
                ..
            }
        ));
        let err =
            parse_page(EntityType::Log, "demo", 1, 10, json!({"content": {"id": 1}})).unwrap_err();
        assert!(err.to_string().contains("content is an object"));
    }

    #[test]
    fn error_envelope_is_not_an_entity() {
        let body = json!({"errorCode": 4001, "message": "Incorrect filtering parameters"});
        let err = parse_page(EntityType::Launch, "demo", 1, 50, body).unwrap_err();
        assert!(matches!(
            err,
            SyncError::FetchFailed {
                kind: crate::error::FailureKind::Permanent,
                ..
            }
        ));
        assert!(err.to_string().contains("errorCode"));
    }

    /// Pages 1..=3, except page 2 points back at itself.
    struct StallingFetcher;

    #[async_trait]
    impl EntityFetcher for StallingFetcher {
        async fn fetch_page(
            &self,
            entity_type: EntityType,
            project_name: &str,
            _since: Option<DateTime<Utc>>,
            cursor: Option<&str>,
        ) -> Result<Page, SyncError> {
            let cursor = cursor.unwrap_or("1").to_string();
            let next_cursor = match cursor.as_str() {
                "1" => Some("2".to_string()),
                "2" => Some("2".to_string()),
                _ => None,
            };
            let entity = RemoteEntity::from_raw(entity_type, project_name, json!({"id": cursor}));
            Ok(Page {
                entities: vec![entity],
                cursor,
                next_cursor,
            })
        }

        async fn list_projects(&self) -> Result<Vec<String>, SyncError> {
            Ok(vec!["demo".into()])
        }
    }

    #[tokio::test]
    async fn stalled_cursor_ends_stream() {
        let fetcher = StallingFetcher;
        let mut stream = PageStream::new(&fetcher, EntityType::Launch, "demo", None);
        let first = stream.next_page().await.unwrap().unwrap();
        assert_eq!(first.cursor, "1");
        assert_eq!(stream.cursor(), Some("2"));
        assert!(!stream.is_finished());
        let second = stream.next_page().await.unwrap().unwrap();
        assert_eq!(second.cursor, "2");
        assert!(stream.is_finished());
        assert!(stream.next_page().await.is_none());
    }

    #[tokio::test]
    async fn stream_resumes_from_cursor() {
        let fetcher = StallingFetcher;
        let mut stream = PageStream::new(&fetcher, EntityType::Launch, "demo", None)
            .starting_at(Some("3".into()));
        let page = stream.next_page().await.unwrap().unwrap();
        assert_eq!(page.cursor, "3");
        assert_eq!(page.next_cursor, None);
        assert!(stream.next_page().await.is_none());
    }
}

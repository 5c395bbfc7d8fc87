//! HTTP fetcher against the in-process mock API.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{TimeZone, Utc};

use common::{launch, MockServer, TOKEN};
use reportportal_sync::config::ApiConfig;
use reportportal_sync::core::models::EntityType;
use reportportal_sync::error::{FailureKind, SyncError};
use reportportal_sync::fetcher::{EntityFetcher, HttpFetcher, PageStream};
use reportportal_sync::rate_limit::Unlimited;
use reportportal_sync::retry::RetryPolicy;

fn api(server: &MockServer, token: &str) -> ApiConfig {
    ApiConfig {
        base_url: server.base_url(),
        token: token.to_string(),
        default_project: None,
        request_timeout_secs: 5,
    }
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        jitter: false,
        ..RetryPolicy::default()
    }
}

fn fetcher(server: &MockServer, page_size: usize) -> HttpFetcher {
    HttpFetcher::new(&api(server, TOKEN), page_size, Arc::new(Unlimited), fast_policy()).unwrap()
}

#[tokio::test]
async fn pages_through_results_after_since() {
    let server = MockServer::start().await;
    server.state.set(
        "demo/launch",
        (1..=5).map(|i| launch(i, i as i64 * 1000)).collect(),
    );
    let fetcher = fetcher(&server, 2);
    let since = Utc.timestamp_millis_opt(1000).unwrap();

    let mut stream = PageStream::new(&fetcher, EntityType::Launch, "demo", Some(since));
    let mut ids = Vec::new();
    while let Some(page) = stream.next_page().await {
        let page = page.unwrap();
        ids.extend(page.entities.into_iter().map(|e| e.id.unwrap()));
    }

    assert_eq!(ids, vec!["2", "3", "4", "5"]);
    let requests = server.state.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].contains("filter.gt.lastModified=1000"));
    assert!(requests[0].contains("page.page=1"));
    assert!(requests[1].contains("page.page=2"));
    assert!(requests[0].contains("page.sort=lastModified%2CASC"));
}

#[tokio::test]
async fn server_errors_are_retried() {
    let server = MockServer::start().await;
    server.state.set("demo/log", vec![launch(1, 1000)]);
    server.state.fail_next(503, None);
    server.state.fail_next(502, None);

    let page = fetcher(&server, 10)
        .fetch_page(EntityType::Log, "demo", None, None)
        .await
        .unwrap();
    assert_eq!(page.entities.len(), 1);
    assert_eq!(server.state.request_count(), 3);
}

#[tokio::test]
async fn gives_up_after_max_attempts() {
    let server = MockServer::start().await;
    server.state.set("demo/log", vec![launch(1, 1000)]);
    for _ in 0..5 {
        server.state.fail_next(500, None);
    }

    let err = fetcher(&server, 10)
        .fetch_page(EntityType::Log, "demo", None, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SyncError::FetchFailed {
            kind: FailureKind::Transient,
            ..
        }
    ));
    assert_eq!(server.state.request_count(), 3);
}

#[tokio::test]
async fn retry_after_is_honored() {
    let server = MockServer::start().await;
    server.state.set("demo/launch", vec![launch(1, 1000)]);
    server.state.fail_next(429, Some("1"));

    let started = Instant::now();
    let page = fetcher(&server, 10)
        .fetch_page(EntityType::Launch, "demo", None, None)
        .await
        .unwrap();
    assert_eq!(page.entities.len(), 1);
    assert!(started.elapsed() >= Duration::from_millis(950));
    assert_eq!(server.state.request_count(), 2);
}

#[tokio::test]
async fn not_found_is_not_retried() {
    let server = MockServer::start().await;

    let err = fetcher(&server, 10)
        .fetch_page(EntityType::Dashboard, "missing", None, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SyncError::FetchFailed {
            kind: FailureKind::Permanent,
            ..
        }
    ));
    assert_eq!(server.state.request_count(), 1);
}

#[tokio::test]
async fn bad_token_is_auth_failure() {
    let server = MockServer::start().await;
    server.state.set("demo/launch", vec![launch(1, 1000)]);
    let fetcher =
        HttpFetcher::new(&api(&server, "wrong"), 10, Arc::new(Unlimited), fast_policy()).unwrap();

    let err = fetcher
        .fetch_page(EntityType::Launch, "demo", None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::AuthFailed(_)));
    assert!(err.is_fatal());
    assert_eq!(server.state.request_count(), 1);
}

#[tokio::test]
async fn project_endpoint_returns_single_final_page() {
    let server = MockServer::start().await;
    server.state.set(
        "demo/project",
        vec![serde_json::json!({"id": 7, "projectName": "demo", "entryType": "INTERNAL"})],
    );

    let page = fetcher(&server, 10)
        .fetch_page(EntityType::Project, "demo", None, None)
        .await
        .unwrap();
    assert_eq!(page.entities.len(), 1);
    assert_eq!(page.entities[0].id.as_deref(), Some("demo"));
    assert!(page.next_cursor.is_none());
}

#[tokio::test]
async fn lists_projects() {
    let server = MockServer::start().await;
    *server.state.projects.lock().unwrap() = vec!["alpha".to_string(), "beta".to_string()];

    let projects = fetcher(&server, 10).list_projects().await.unwrap();
    assert_eq!(projects, vec!["alpha", "beta"]);
}

#[tokio::test]
async fn empty_unit_is_one_empty_page() {
    let server = MockServer::start().await;
    server.state.set("demo/filter", Vec::new());

    let fetcher = fetcher(&server, 10);
    let mut stream = PageStream::new(&fetcher, EntityType::Filter, "demo", None);
    let first = stream.next_page().await.unwrap().unwrap();
    assert!(first.entities.is_empty());
    assert!(stream.next_page().await.is_none());
}

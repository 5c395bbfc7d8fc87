//! In-process mock of the ReportPortal API.
//!
//! Serves `{content, page}` envelopes from an in-memory dataset keyed by
//! `"{project}/{kind}"`, honoring `page.page`, `page.size` and
//! `filter.gt.lastModified`. Queued failures are served before any real
//! response.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::{json, Value};

pub const TOKEN: &str = "test-token";

#[derive(Default)]
pub struct MockState {
    pub data: Mutex<HashMap<String, Vec<Value>>>,
    pub projects: Mutex<Vec<String>>,
    /// (status, Retry-After) served, in order, before normal handling.
    pub failures: Mutex<VecDeque<(u16, Option<String>)>>,
    /// `path?query` of every request received.
    pub requests: Mutex<Vec<String>>,
}

impl MockState {
    pub fn set(&self, key: &str, items: Vec<Value>) {
        self.data.lock().unwrap().insert(key.to_string(), items);
    }

    pub fn fail_next(&self, status: u16, retry_after: Option<&str>) {
        self.failures
            .lock()
            .unwrap()
            .push_back((status, retry_after.map(str::to_string)));
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

pub struct MockServer {
    pub addr: SocketAddr,
    pub state: Arc<MockState>,
}

impl MockServer {
    pub async fn start() -> Self {
        let state = Arc::new(MockState::default());
        let app = Router::new().fallback(handle).with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, state }
    }

    /// Base URL to put in `api.base_url`.
    pub fn base_url(&self) -> String {
        format!("http://{}/api", self.addr)
    }
}

/// Launch-shaped entity modified at `ms` epoch milliseconds.
pub fn launch(id: u64, ms: i64) -> Value {
    json!({
        "id": id,
        "name": format!("nightly regression {}", id),
        "number": id,
        "status": "PASSED",
        "description": "checkout and payment flows",
        "lastModified": ms,
    })
}

async fn handle(
    State(state): State<Arc<MockState>>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    state.requests.lock().unwrap().push(uri.to_string());

    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {}", TOKEN));
    if !authorized {
        return (StatusCode::UNAUTHORIZED, "bad token").into_response();
    }

    let scripted = state.failures.lock().unwrap().pop_front();
    if let Some((status, retry_after)) = scripted {
        let status = StatusCode::from_u16(status).unwrap();
        let mut response = (status, "scripted failure").into_response();
        if let Some(value) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, value.parse().unwrap());
        }
        return response;
    }

    let path = uri.path().trim_start_matches("/api/v1/");
    let segments: Vec<&str> = path.split('/').collect();
    let data = state.data.lock().unwrap();

    match segments.as_slice() {
        ["project", "names"] => Json(json!(*state.projects.lock().unwrap())).into_response(),
        ["project", project] => match data.get(&format!("{}/project", project)) {
            Some(items) if !items.is_empty() => Json(items[0].clone()).into_response(),
            _ => StatusCode::NOT_FOUND.into_response(),
        },
        ["project", project, "users"] => {
            paged(data.get(&format!("{}/user", project)), &params).into_response()
        }
        [project, kind] => match data.get(&format!("{}/{}", project, kind)) {
            Some(items) => paged(Some(items), &params).into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        },
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

fn paged(items: Option<&Vec<Value>>, params: &HashMap<String, String>) -> Json<Value> {
    let page: usize = params.get("page.page").and_then(|p| p.parse().ok()).unwrap_or(1);
    let size: usize = params.get("page.size").and_then(|p| p.parse().ok()).unwrap_or(20);
    let since: Option<i64> = params
        .get("filter.gt.lastModified")
        .and_then(|p| p.parse().ok());

    let mut matching: Vec<Value> = items
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .filter(|item| match since {
            Some(since) => item["lastModified"].as_i64().is_some_and(|ts| ts > since),
            None => true,
        })
        .collect();
    matching.sort_by_key(|item| item["lastModified"].as_i64().unwrap_or(0));

    let total = matching.len();
    let total_pages = total.div_ceil(size.max(1));
    let content: Vec<Value> = matching
        .into_iter()
        .skip((page.saturating_sub(1)) * size)
        .take(size)
        .collect();

    Json(json!({
        "content": content,
        "page": {
            "number": page,
            "size": size,
            "totalElements": total,
            "totalPages": total_pages,
        }
    }))
}

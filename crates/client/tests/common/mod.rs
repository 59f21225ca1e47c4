//! Shared test helpers: an in-memory [`SiteBackend`] with scripted responses.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use kidneysphere_core::backend::{
    BackendError, CurrentUser, IdLookup, RecordQuery, SiteBackend,
};
use kidneysphere_core::search::{SearchRequest, SearchResult};

type Rows = Result<Vec<serde_json::Value>, BackendError>;

/// Account creation time of the default signed-in test user.
pub const ACCOUNT_CREATED_AT: &str = "2026-01-01T00:00:00Z";

/// Scripted backend. Unscripted calls succeed with no rows.
pub struct MockBackend {
    configured: bool,
    user: Mutex<Option<CurrentUser>>,
    user_error: Mutex<Option<BackendError>>,
    search_responses: Mutex<VecDeque<Result<Vec<SearchResult>, BackendError>>>,
    search_gate: Mutex<Option<Arc<Notify>>>,
    record_responses: Mutex<HashMap<&'static str, VecDeque<Rows>>>,
    lookup_response: Mutex<Option<Rows>>,
    pub search_calls: Mutex<Vec<SearchRequest>>,
    pub record_calls: Mutex<Vec<RecordQuery>>,
    pub lookup_calls: Mutex<Vec<IdLookup>>,
    pub user_calls: Mutex<usize>,
}

impl MockBackend {
    /// Configured backend with a signed-in user.
    pub fn new() -> Self {
        Self {
            configured: true,
            user: Mutex::new(Some(CurrentUser {
                id: "user-1".into(),
                created_at: Some(ACCOUNT_CREATED_AT.into()),
            })),
            user_error: Mutex::new(None),
            search_responses: Mutex::new(VecDeque::new()),
            search_gate: Mutex::new(None),
            record_responses: Mutex::new(HashMap::new()),
            lookup_response: Mutex::new(None),
            search_calls: Mutex::new(Vec::new()),
            record_calls: Mutex::new(Vec::new()),
            lookup_calls: Mutex::new(Vec::new()),
            user_calls: Mutex::new(0),
        }
    }

    pub fn unconfigured() -> Self {
        Self {
            configured: false,
            ..Self::new()
        }
    }

    pub fn signed_out() -> Self {
        let backend = Self::new();
        *backend.user.lock().unwrap() = None;
        backend
    }

    /// Make every session lookup fail with `error`.
    pub fn fail_current_user(&self, error: BackendError) {
        *self.user_error.lock().unwrap() = Some(error);
    }

    pub fn push_search(&self, response: Result<Vec<SearchResult>, BackendError>) {
        self.search_responses.lock().unwrap().push_back(response);
    }

    /// Hold the next search call until `gate` is notified.
    pub fn gate_next_search(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.search_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn push_records(&self, collection: &'static str, response: Rows) {
        self.record_responses
            .lock()
            .unwrap()
            .entry(collection)
            .or_default()
            .push_back(response);
    }

    pub fn set_lookup(&self, response: Rows) {
        *self.lookup_response.lock().unwrap() = Some(response);
    }

    pub fn search_requests(&self) -> Vec<SearchRequest> {
        self.search_calls.lock().unwrap().clone()
    }

    pub fn record_queries(&self, collection: &str) -> Vec<RecordQuery> {
        self.record_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|q| q.collection == collection)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl SiteBackend for MockBackend {
    fn is_configured(&self) -> bool {
        self.configured
    }

    async fn current_user(&self) -> Result<Option<CurrentUser>, BackendError> {
        *self.user_calls.lock().unwrap() += 1;
        if let Some(error) = self.user_error.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(self.user.lock().unwrap().clone())
    }

    async fn search_site(
        &self,
        request: &SearchRequest,
    ) -> Result<Vec<SearchResult>, BackendError> {
        self.search_calls.lock().unwrap().push(request.clone());
        let response = self
            .search_responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()));
        let gate = self.search_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        response
    }

    async fn query_new_records(
        &self,
        query: &RecordQuery,
    ) -> Result<Vec<serde_json::Value>, BackendError> {
        self.record_calls.lock().unwrap().push(query.clone());
        self.record_responses
            .lock()
            .unwrap()
            .get_mut(query.collection)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn fetch_by_ids(
        &self,
        lookup: &IdLookup,
    ) -> Result<Vec<serde_json::Value>, BackendError> {
        self.lookup_calls.lock().unwrap().push(lookup.clone());
        self.lookup_response
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

// ---------------------------------------------------------------------------
// Row builders
// ---------------------------------------------------------------------------

/// `count` search rows titled `<prefix> N`.
pub fn search_rows(prefix: &str, count: usize) -> Vec<SearchResult> {
    (0..count)
        .map(|i| {
            serde_json::from_value(serde_json::json!({
                "type": "article",
                "title": format!("{prefix} {i}"),
                "snippet": format!("about {prefix}"),
                "url": format!("article.html?id={i}"),
                "created_at": "2026-02-11T08:00:00Z",
                "extra": { "tags": ["kidney"] }
            }))
            .unwrap()
        })
        .collect()
}

/// Let spawned tasks make progress.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

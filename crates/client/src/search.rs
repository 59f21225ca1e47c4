//! Unified site search aggregator.
//!
//! Owns one search view's state: the query, the active type filter, the
//! accumulated result pages, and the pagination cursor. Every state change
//! that invalidates the current results bumps a generation counter; a fetch
//! remembers the generation it started under, and its response is discarded
//! if the state moved on while it was in flight.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use reqwest::Url;
use tokio::sync::{Mutex, OnceCell};

use kidneysphere_core::backend::{BackendError, SiteBackend};
use kidneysphere_core::display::{format_datetime, join_meta};
use kidneysphere_core::highlight::{escape_html, highlight};
use kidneysphere_core::search::{
    all_types, is_last_page, normalize_query, SearchHint, SearchRequest, SearchResult,
    SearchType, MAX_META_TAGS,
};

use crate::debounce::Debouncer;
use crate::location::{query_from_url, set_query_param};

// ---------------------------------------------------------------------------
// Errors and outcomes
// ---------------------------------------------------------------------------

/// Why a search fetch failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SearchError {
    #[error("Search backend is not configured")]
    NotConfigured,

    /// The server-side search procedure has not been deployed.
    #[error("Search is not initialized on the server")]
    NotProvisioned,

    #[error("Search failed: {0}")]
    Failed(String),
}

/// What a call to [`SearchAggregator::fetch_page`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The query is empty; results were cleared without calling the backend.
    Cleared,
    /// A fetch for the current state is already running; nothing was done.
    Dropped,
    /// The state changed while the fetch ran; its rows were discarded.
    Stale,
    /// The last page is already loaded; nothing was fetched.
    Exhausted,
    /// A page was applied.
    Page {
        /// Rows in this page.
        received: usize,
        /// Rows accumulated so far.
        total: usize,
        has_more: bool,
    },
}

/// User-facing notice raised by a fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchNotice {
    NotConfigured,
    /// Shown at most once per aggregator.
    NotProvisioned,
    Failed(String),
}

impl std::fmt::Display for SearchNotice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotConfigured => f.write_str(
                "Search is not configured: set SUPABASE_URL and SUPABASE_ANON_KEY.",
            ),
            Self::NotProvisioned => f.write_str(
                "Search is not initialized: run the site search migration and reload the schema cache.",
            ),
            Self::Failed(msg) => write!(f, "Search failed: {msg}"),
        }
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Mutable state of one search view.
#[derive(Debug)]
struct SearchState {
    query: String,
    /// Never empty.
    active_types: BTreeSet<SearchType>,
    /// Equals `results.len()` after every applied page.
    offset: usize,
    results: Vec<SearchResult>,
    has_more: bool,
    hint: SearchHint,
    generation: u64,
    /// Generation of the outstanding fetch, if any.
    in_flight: Option<u64>,
    page_url: Option<Url>,
    notices: VecDeque<SearchNotice>,
    provisioning_noticed: bool,
}

impl SearchState {
    fn new(query: String, page_url: Option<Url>) -> Self {
        let active_types = all_types();
        Self {
            hint: SearchHint::for_state(&query, &active_types),
            query,
            active_types,
            offset: 0,
            results: Vec::new(),
            has_more: false,
            generation: 0,
            in_flight: None,
            page_url,
            notices: VecDeque::new(),
            provisioning_noticed: false,
        }
    }

    /// Invalidate results for a new query or filter.
    fn invalidate(&mut self) {
        self.generation += 1;
        self.offset = 0;
        self.results.clear();
        self.has_more = false;
        self.hint = SearchHint::for_state(&self.query, &self.active_types);
    }

    fn sync_url(&mut self) {
        if let Some(url) = self.page_url.as_mut() {
            set_query_param(url, &self.query);
        }
    }

    fn push_notice(&mut self, notice: SearchNotice) {
        if notice == SearchNotice::NotProvisioned {
            if self.provisioning_noticed {
                return;
            }
            self.provisioning_noticed = true;
        }
        self.notices.push_back(notice);
    }
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

/// View-ready search result. Every text field is HTML-safe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultView {
    pub type_label: String,
    pub title: String,
    /// Escaped snippet with `<mark>` around query terms.
    pub snippet: Option<String>,
    pub url: String,
    /// Creation time, board and up to three tags.
    pub meta: String,
}

impl ResultView {
    fn build(row: &SearchResult, query: &str) -> Self {
        let snippet = row
            .snippet
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| highlight(s, query));
        let tags = row
            .extra
            .tags
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .take(MAX_META_TAGS)
            .collect::<Vec<_>>();
        let meta = join_meta([
            row.created_at.as_ref().map(format_datetime).unwrap_or_default(),
            row.board().unwrap_or_default().to_string(),
            join_meta(tags),
        ]);
        Self {
            type_label: escape_html(row.type_label()),
            title: escape_html(row.display_title()),
            snippet,
            url: escape_html(row.display_url()),
            meta: escape_html(&meta),
        }
    }
}

/// Point-in-time copy of a search view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchSnapshot {
    pub query: String,
    pub active_types: Vec<SearchType>,
    pub results: Vec<ResultView>,
    pub has_more: bool,
    pub loading: bool,
    pub hint: SearchHint,
    /// Page URL with the current `q`, when the view tracks one.
    pub url: Option<String>,
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

/// Search aggregator for one view.
pub struct SearchAggregator<B> {
    backend: B,
    state: Mutex<SearchState>,
    debouncer: Debouncer,
    /// Session state, looked up once for the login hint.
    signed_in: OnceCell<bool>,
}

impl<B: SiteBackend + 'static> SearchAggregator<B> {
    pub fn new(backend: B, debouncer: Debouncer) -> Self {
        Self {
            backend,
            state: Mutex::new(SearchState::new(String::new(), None)),
            debouncer,
            signed_in: OnceCell::new(),
        }
    }

    /// Aggregator for a page whose URL carries the initial query in `q`.
    ///
    /// An unparseable URL is ignored. The caller runs the first fetch.
    pub fn from_page_url(backend: B, debouncer: Debouncer, page_url: &str) -> Self {
        let url = Url::parse(page_url).ok();
        let query = query_from_url(page_url);
        Self {
            backend,
            state: Mutex::new(SearchState::new(query, url)),
            debouncer,
            signed_in: OnceCell::new(),
        }
    }

    // ---- triggers ----

    /// Store a new query and fetch its first page.
    pub async fn set_query(&self, raw: &str) -> Result<FetchOutcome, SearchError> {
        {
            let mut state = self.state.lock().await;
            let query = normalize_query(raw);
            if query != state.query {
                state.query = query;
                state.invalidate();
            }
        }
        self.fetch_page(true).await
    }

    /// Explicit submit: runs immediately and cancels a pending keystroke.
    pub async fn submit(&self, raw: &str) -> Result<FetchOutcome, SearchError> {
        self.debouncer.cancel();
        self.set_query(raw).await
    }

    /// Keystroke-driven input; only the last of a burst is searched.
    pub fn input_changed(self: &Arc<Self>, raw: &str) {
        let this = Arc::clone(self);
        let raw = raw.to_string();
        self.debouncer.schedule(async move {
            if let Err(e) = this.set_query(&raw).await {
                tracing::debug!(error = %e, "Debounced search failed");
            }
        });
    }

    /// Flip one type. Removing the last active type restores all of them.
    pub async fn toggle_type(&self, kind: SearchType) -> Result<FetchOutcome, SearchError> {
        {
            let mut state = self.state.lock().await;
            if !state.active_types.remove(&kind) {
                state.active_types.insert(kind);
            }
            if state.active_types.is_empty() {
                state.active_types = all_types();
            }
            state.invalidate();
        }
        self.fetch_page(true).await
    }

    /// Restore the full type set.
    pub async fn select_all_types(&self) -> Result<FetchOutcome, SearchError> {
        {
            let mut state = self.state.lock().await;
            let all = all_types();
            if state.active_types != all {
                state.active_types = all;
                state.invalidate();
            }
        }
        self.fetch_page(true).await
    }

    /// Empty the search box.
    pub async fn clear(&self) -> Result<FetchOutcome, SearchError> {
        self.debouncer.cancel();
        self.set_query("").await
    }

    /// Fetch the next page at the current offset.
    ///
    /// Does nothing once the last page is loaded.
    pub async fn load_more(&self) -> Result<FetchOutcome, SearchError> {
        {
            let state = self.state.lock().await;
            let idle = state.in_flight != Some(state.generation);
            if idle && !state.query.is_empty() && !state.has_more {
                return Ok(FetchOutcome::Exhausted);
            }
        }
        self.fetch_page(false).await
    }

    // ---- fetch ----

    /// Fetch one page for the current state.
    ///
    /// With `reset` the first page replaces the results; otherwise the page
    /// at the current offset is appended.
    pub async fn fetch_page(&self, reset: bool) -> Result<FetchOutcome, SearchError> {
        let (request, generation) = {
            let mut state = self.state.lock().await;
            state.sync_url();
            state.hint = SearchHint::for_state(&state.query, &state.active_types);

            if state.query.is_empty() {
                state.offset = 0;
                state.results.clear();
                state.has_more = false;
                return Ok(FetchOutcome::Cleared);
            }

            if !self.backend.is_configured() {
                state.push_notice(SearchNotice::NotConfigured);
                return Err(SearchError::NotConfigured);
            }

            if state.in_flight == Some(state.generation) {
                tracing::debug!(generation = state.generation, "Search already in flight, dropping trigger");
                return Ok(FetchOutcome::Dropped);
            }

            if reset {
                state.offset = 0;
                state.results.clear();
            }
            let generation = state.generation;
            state.in_flight = Some(generation);
            (
                SearchRequest::page(&state.query, state.offset, &state.active_types),
                generation,
            )
        };

        let response = self.backend.search_site(&request).await;

        let outcome = {
            let mut state = self.state.lock().await;
            if state.in_flight == Some(generation) {
                state.in_flight = None;
            }
            if state.generation != generation {
                tracing::debug!(
                    started = generation,
                    current = state.generation,
                    "Discarding stale search response"
                );
                return Ok(FetchOutcome::Stale);
            }

            let rows = match response {
                Ok(rows) => rows,
                Err(e) => {
                    let (notice, error) = match e {
                        BackendError::NotConfigured => {
                            (SearchNotice::NotConfigured, SearchError::NotConfigured)
                        }
                        BackendError::NotProvisioned { name } => {
                            tracing::warn!(procedure = %name, "Search procedure is not provisioned");
                            (SearchNotice::NotProvisioned, SearchError::NotProvisioned)
                        }
                        other => {
                            tracing::warn!(error = %other, q = %request.q, "Search failed");
                            let msg = other.to_string();
                            (SearchNotice::Failed(msg.clone()), SearchError::Failed(msg))
                        }
                    };
                    state.push_notice(notice);
                    return Err(error);
                }
            };

            let received = rows.len();
            if reset {
                state.results = rows;
            } else {
                state.results.extend(rows);
            }
            state.offset = state.results.len();
            state.has_more = !is_last_page(received);

            tracing::debug!(
                q = %request.q,
                received,
                total = state.offset,
                has_more = state.has_more,
                "Search page applied"
            );
            FetchOutcome::Page {
                received,
                total: state.offset,
                has_more: state.has_more,
            }
        };

        if request.types.as_ref().map_or(true, |t| t.contains(&SearchType::Case)) {
            self.apply_login_hint(generation).await;
        }
        Ok(outcome)
    }

    /// Switch the hint when signed-out users would miss case results.
    async fn apply_login_hint(&self, generation: u64) {
        let signed_in = self
            .signed_in
            .get_or_try_init(|| async {
                self.backend.current_user().await.map(|user| user.is_some())
            })
            .await
            .copied();
        match signed_in {
            Ok(false) => {
                let mut state = self.state.lock().await;
                if state.generation == generation {
                    state.hint = SearchHint::CasesRequireLogin;
                }
            }
            Ok(true) => {}
            Err(e) => tracing::debug!(error = %e, "Could not check session for search hint"),
        }
    }

    // ---- reads ----

    /// Next pending notice, oldest first.
    pub async fn take_notice(&self) -> Option<SearchNotice> {
        self.state.lock().await.notices.pop_front()
    }

    pub async fn query(&self) -> String {
        self.state.lock().await.query.clone()
    }

    pub async fn active_types(&self) -> BTreeSet<SearchType> {
        self.state.lock().await.active_types.clone()
    }

    pub async fn is_loading(&self) -> bool {
        self.state.lock().await.in_flight.is_some()
    }

    pub async fn has_more(&self) -> bool {
        self.state.lock().await.has_more
    }

    /// Raw accumulated rows.
    pub async fn results(&self) -> Vec<SearchResult> {
        self.state.lock().await.results.clone()
    }

    pub async fn snapshot(&self) -> SearchSnapshot {
        let state = self.state.lock().await;
        SearchSnapshot {
            query: state.query.clone(),
            active_types: state.active_types.iter().copied().collect(),
            results: state
                .results
                .iter()
                .map(|row| ResultView::build(row, &state.query))
                .collect(),
            has_more: state.has_more,
            loading: state.in_flight.is_some(),
            hint: state.hint.clone(),
            url: state.page_url.as_ref().map(|u| u.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(snippet: &str) -> SearchResult {
        serde_json::from_value(serde_json::json!({
            "type": "case",
            "title": "<IgA> relapse",
            "snippet": snippet,
            "url": "case.html?id=1&x=2",
            "created_at": "2026-02-11T08:00:00Z",
            "extra": { "board": "glom", "tags": ["a", " ", "b", "c", "d"] }
        }))
        .unwrap()
    }

    #[test]
    fn result_view_escapes_and_highlights() {
        let view = ResultView::build(&row("IgA after transplant"), "iga");
        assert_eq!(view.title, "&lt;IgA&gt; relapse");
        assert_eq!(view.snippet.as_deref(), Some("<mark>IgA</mark> after transplant"));
        assert_eq!(view.url, "case.html?id=1&amp;x=2");
        assert_eq!(view.type_label, "Case discussions");
    }

    #[test]
    fn result_view_meta_has_time_board_and_three_tags() {
        let view = ResultView::build(&row(""), "x");
        assert!(view.snippet.is_none());
        assert_eq!(view.meta, "2026-02-11 16:00 · glom · a · b · c");
    }

    #[test]
    fn provisioning_notice_is_queued_once() {
        let mut state = SearchState::new("x".into(), None);
        state.push_notice(SearchNotice::NotProvisioned);
        state.push_notice(SearchNotice::NotProvisioned);
        state.push_notice(SearchNotice::Failed("boom".into()));
        assert_eq!(state.notices.len(), 2);
    }

    #[test]
    fn invalidate_bumps_generation_and_resets_pages() {
        let mut state = SearchState::new("x".into(), None);
        state.results.push(row("a"));
        state.offset = 1;
        state.has_more = true;
        state.invalidate();
        assert_eq!(state.generation, 1);
        assert_eq!(state.offset, 0);
        assert!(state.results.is_empty());
        assert!(!state.has_more);
    }
}

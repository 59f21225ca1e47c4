//! Backend access seam.
//!
//! The aggregators only talk to the hosted data store through
//! [`SiteBackend`]. Implementations report failures as structured
//! [`BackendError`] kinds so callers never parse human-readable messages;
//! [`classify_message`] is the compatibility shim implementations fall back
//! to when the store only hands back text.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;

use crate::search::{SearchRequest, SearchResult};
use crate::types::{RecordId, Timestamp};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure modes of a backend call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// No store URL or API key has been configured.
    #[error("Backend is not configured")]
    NotConfigured,

    /// The remote procedure or table does not exist yet (migration not run,
    /// or the schema cache was not reloaded).
    #[error("Backend capability not provisioned: {name}")]
    NotProvisioned { name: String },

    /// A selected column does not exist in this deployment's schema.
    #[error("Missing column: {column}")]
    MissingColumn { column: String },

    /// The caller is not signed in or lacks permission.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Network, server, or other retryable failure.
    #[error("Request failed: {0}")]
    Transient(String),

    /// The response body did not have the expected shape.
    #[error("Unexpected response: {0}")]
    Decode(String),
}

impl BackendError {
    /// Whether a user-triggered retry could succeed without operator action.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Decode(_))
    }
}

// ---------------------------------------------------------------------------
// Message classification shim
// ---------------------------------------------------------------------------

/// Classification of a free-text error message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    /// Looks like a missing function/procedure.
    NotProvisioned,
    /// Names a column that does not exist.
    MissingColumn(String),
    /// Anything else.
    Other,
}

fn missing_function_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)(function\s+\S+\s+does not exist|could not find the function|could not find|procedure\s+\S+\s+(does not exist|not found)|function\s+public\.search_site\b|\bsearch_site\b)",
        )
        .expect("missing-function pattern is valid")
    })
}

fn missing_column_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)column\s+"?(?:[A-Za-z_][A-Za-z0-9_]*\.)?([A-Za-z_][A-Za-z0-9_]*)"?\s+does not exist"#)
            .expect("missing-column pattern is valid")
    })
}

/// Classify an error message from the store.
///
/// Column errors are checked first: a message such as
/// `column moments.video_url does not exist` must not be mistaken for a
/// missing procedure.
pub fn classify_message(message: &str) -> MessageKind {
    if let Some(caps) = missing_column_re().captures(message) {
        if let Some(col) = caps.get(1) {
            return MessageKind::MissingColumn(col.as_str().to_string());
        }
    }
    if missing_function_re().is_match(message) {
        return MessageKind::NotProvisioned;
    }
    MessageKind::Other
}

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// A `created_at > since` read over one collection, newest first.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordQuery {
    pub collection: &'static str,
    pub fields: &'static str,
    pub since: Timestamp,
    pub limit: usize,
    /// Add a `deleted_at IS NULL` filter.
    pub exclude_deleted: bool,
}

/// Fetch specific rows of a collection by id.
#[derive(Debug, Clone, PartialEq)]
pub struct IdLookup {
    pub collection: &'static str,
    pub fields: &'static str,
    pub ids: Vec<RecordId>,
}

/// The signed-in account, as far as the aggregators care.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CurrentUser {
    pub id: String,
    /// Account creation time as returned by the auth service; may be absent
    /// or unparseable.
    #[serde(default)]
    pub created_at: Option<String>,
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Capabilities of the hosted data store used by the aggregators.
#[async_trait]
pub trait SiteBackend: Send + Sync {
    /// Whether the store URL and key are present. Unconfigured backends are
    /// never called.
    fn is_configured(&self) -> bool {
        true
    }

    /// The signed-in user, or `None` when signed out.
    async fn current_user(&self) -> Result<Option<CurrentUser>, BackendError>;

    /// Invoke the full-text search procedure.
    async fn search_site(&self, request: &SearchRequest)
        -> Result<Vec<SearchResult>, BackendError>;

    /// Rows of a collection created after a timestamp.
    async fn query_new_records(
        &self,
        query: &RecordQuery,
    ) -> Result<Vec<serde_json::Value>, BackendError>;

    /// Rows of a collection with the given ids.
    async fn fetch_by_ids(&self, lookup: &IdLookup)
        -> Result<Vec<serde_json::Value>, BackendError>;
}

#[async_trait]
impl<T: SiteBackend + ?Sized> SiteBackend for Arc<T> {
    fn is_configured(&self) -> bool {
        (**self).is_configured()
    }

    async fn current_user(&self) -> Result<Option<CurrentUser>, BackendError> {
        (**self).current_user().await
    }

    async fn search_site(
        &self,
        request: &SearchRequest,
    ) -> Result<Vec<SearchResult>, BackendError> {
        (**self).search_site(request).await
    }

    async fn query_new_records(
        &self,
        query: &RecordQuery,
    ) -> Result<Vec<serde_json::Value>, BackendError> {
        (**self).query_new_records(query).await
    }

    async fn fetch_by_ids(
        &self,
        lookup: &IdLookup,
    ) -> Result<Vec<serde_json::Value>, BackendError> {
        (**self).fetch_by_ids(lookup).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_search_procedure_is_not_provisioned() {
        for msg in [
            "function public.search_site(q => text) does not exist",
            "Could not find the function public.search_site(limit_count, offset_count, q, types) in the schema cache",
            "could not find relation",
            "procedure foo not found",
        ] {
            assert_eq!(classify_message(msg), MessageKind::NotProvisioned, "{msg}");
        }
    }

    #[test]
    fn missing_columns_are_named() {
        assert_eq!(
            classify_message("column moments.video_url does not exist"),
            MessageKind::MissingColumn("video_url".into())
        );
        assert_eq!(
            classify_message(r#"column "deleted_at" does not exist"#),
            MessageKind::MissingColumn("deleted_at".into())
        );
    }

    #[test]
    fn other_messages_are_other() {
        assert_eq!(classify_message("JWT expired"), MessageKind::Other);
        assert_eq!(classify_message("connection reset by peer"), MessageKind::Other);
    }

    #[test]
    fn only_transient_and_decode_are_retryable() {
        assert!(BackendError::Transient("timeout".into()).is_retryable());
        assert!(!BackendError::NotProvisioned { name: "search_site".into() }.is_retryable());
        assert!(!BackendError::NotConfigured.is_retryable());
    }

    #[test]
    fn current_user_tolerates_missing_created_at() {
        let user: CurrentUser = serde_json::from_str(r#"{"id":"u1","email":"a@b.c"}"#).unwrap();
        assert_eq!(user.id, "u1");
        assert!(user.created_at.is_none());
    }
}

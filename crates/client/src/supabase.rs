//! Supabase / PostgREST implementation of [`SiteBackend`].
//!
//! Wraps the hosted REST endpoints (`/rest/v1/<table>`,
//! `/rest/v1/rpc/<function>`, `/auth/v1/user`) using [`reqwest`]. Failures
//! are mapped to structured [`BackendError`] kinds from the PostgREST error
//! code first; the message-pattern shim is only consulted when no code
//! decides it.

use async_trait::async_trait;
use serde::Deserialize;

use kidneysphere_core::backend::{
    classify_message, BackendError, CurrentUser, IdLookup, MessageKind, RecordQuery, SiteBackend,
};
use kidneysphere_core::search::{SearchRequest, SearchResult, SEARCH_PROCEDURE};
use kidneysphere_core::watermark::format_watermark;

use crate::config::ClientConfig;

/// HTTP client for one Supabase project.
pub struct SupabaseBackend {
    client: reqwest::Client,
    base_url: Option<String>,
    anon_key: Option<String>,
    access_token: Option<String>,
}

/// Error body returned by PostgREST.
#[derive(Debug, Default, Deserialize)]
struct PostgrestError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    details: Option<String>,
    #[serde(default)]
    hint: Option<String>,
}

impl SupabaseBackend {
    /// Create a backend from configuration.
    ///
    /// Falls back to a default [`reqwest::Client`] if the configured one
    /// cannot be built.
    pub fn new(config: &ClientConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to default HTTP client");
                reqwest::Client::new()
            });
        Self::with_client(client, config)
    }

    /// Create a backend reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, config: &ClientConfig) -> Self {
        Self {
            client,
            base_url: config.supabase_url.clone(),
            anon_key: config.anon_key.clone(),
            access_token: config.access_token.clone(),
        }
    }

    // ---- private helpers ----

    fn endpoint(&self, path: &str) -> Result<(String, &str), BackendError> {
        match (&self.base_url, &self.anon_key) {
            (Some(base), Some(key)) => Ok((format!("{base}{path}"), key.as_str())),
            _ => Err(BackendError::NotConfigured),
        }
    }

    /// Attach the project key and the caller's bearer token.
    fn authorize(&self, builder: reqwest::RequestBuilder, key: &str) -> reqwest::RequestBuilder {
        let bearer = self.access_token.as_deref().unwrap_or(key);
        builder.header("apikey", key).bearer_auth(bearer)
    }

    async fn get_rows(
        &self,
        collection: &str,
        params: &[(&str, String)],
    ) -> Result<Vec<serde_json::Value>, BackendError> {
        let (url, key) = self.endpoint(&format!("/rest/v1/{collection}"))?;
        let response = self
            .authorize(self.client.get(url), key)
            .query(params)
            .send()
            .await
            .map_err(transport_error)?;
        parse_response(response, collection).await
    }
}

#[async_trait]
impl SiteBackend for SupabaseBackend {
    fn is_configured(&self) -> bool {
        self.base_url.is_some() && self.anon_key.is_some()
    }

    async fn current_user(&self) -> Result<Option<CurrentUser>, BackendError> {
        let Some(token) = self.access_token.as_deref() else {
            return Ok(None);
        };
        let (url, key) = self.endpoint("/auth/v1/user")?;
        let response = self
            .client
            .get(url)
            .header("apikey", key)
            .bearer_auth(token)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            tracing::warn!(status = status.as_u16(), "Access token rejected, treating as signed out");
            return Ok(None);
        }
        parse_response(response, "auth/v1/user").await.map(Some)
    }

    async fn search_site(
        &self,
        request: &SearchRequest,
    ) -> Result<Vec<SearchResult>, BackendError> {
        let (url, key) = self.endpoint(&format!("/rest/v1/rpc/{SEARCH_PROCEDURE}"))?;
        tracing::debug!(
            q = %request.q,
            offset = request.offset_count,
            types = ?request.types,
            "Calling search procedure"
        );
        let response = self
            .authorize(self.client.post(url), key)
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;
        parse_response(response, SEARCH_PROCEDURE).await
    }

    async fn query_new_records(
        &self,
        query: &RecordQuery,
    ) -> Result<Vec<serde_json::Value>, BackendError> {
        self.get_rows(query.collection, &record_query_params(query))
            .await
    }

    async fn fetch_by_ids(
        &self,
        lookup: &IdLookup,
    ) -> Result<Vec<serde_json::Value>, BackendError> {
        if lookup.ids.is_empty() {
            return Ok(Vec::new());
        }
        self.get_rows(lookup.collection, &id_lookup_params(lookup))
            .await
    }
}

// ---------------------------------------------------------------------------
// Request building
// ---------------------------------------------------------------------------

/// PostgREST query parameters for a "created after" read.
pub fn record_query_params(query: &RecordQuery) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("select", compact_fields(query.fields)),
        ("created_at", format!("gt.{}", format_watermark(&query.since))),
        ("order", "created_at.desc".to_string()),
        ("limit", query.limit.to_string()),
    ];
    if query.exclude_deleted {
        params.push(("deleted_at", "is.null".to_string()));
    }
    params
}

/// PostgREST query parameters for an id lookup.
pub fn id_lookup_params(lookup: &IdLookup) -> Vec<(&'static str, String)> {
    let quoted: Vec<String> = lookup
        .ids
        .iter()
        .map(|id| format!("\"{}\"", id.replace('\\', "\\\\").replace('"', "\\\"")))
        .collect();
    vec![
        ("select", compact_fields(lookup.fields)),
        ("id", format!("in.({})", quoted.join(","))),
    ]
}

/// PostgREST select lists must not contain spaces.
fn compact_fields(fields: &str) -> String {
    fields
        .split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .collect::<Vec<_>>()
        .join(",")
}

// ---------------------------------------------------------------------------
// Response handling
// ---------------------------------------------------------------------------

fn transport_error(e: reqwest::Error) -> BackendError {
    BackendError::Transient(e.to_string())
}

/// Turn a response into `T`, or into a classified error for non-2xx.
async fn parse_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    resource: &str,
) -> Result<T, BackendError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        let error = classify_error(status.as_u16(), &body, resource);
        tracing::debug!(status = status.as_u16(), resource, error = %error, "Backend call failed");
        return Err(error);
    }
    response
        .json::<T>()
        .await
        .map_err(|e| BackendError::Decode(e.to_string()))
}

/// Map an error response to a [`BackendError`].
///
/// `resource` names the table or procedure that was called.
pub fn classify_error(status: u16, body: &str, resource: &str) -> BackendError {
    let parsed: PostgrestError = serde_json::from_str(body).unwrap_or_default();
    let message = parsed
        .message
        .clone()
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| body.trim().to_string());

    match parsed.code.as_deref() {
        // Undefined function or table, or stale schema cache.
        Some("PGRST202" | "42883" | "PGRST205" | "42P01") => {
            return BackendError::NotProvisioned {
                name: resource.to_string(),
            }
        }
        Some("42703") => {
            let column = match classify_message(&message) {
                MessageKind::MissingColumn(column) => column,
                _ => "unknown".to_string(),
            };
            return BackendError::MissingColumn { column };
        }
        Some("42501" | "PGRST301" | "PGRST302") => {
            return BackendError::Unauthorized(message)
        }
        _ => {}
    }

    if status == 401 || status == 403 {
        return BackendError::Unauthorized(message);
    }

    match classify_message(&message) {
        MessageKind::NotProvisioned => BackendError::NotProvisioned {
            name: resource.to_string(),
        },
        MessageKind::MissingColumn(column) => BackendError::MissingColumn { column },
        MessageKind::Other => {
            let detail = [parsed.details.as_deref(), parsed.hint.as_deref()]
                .into_iter()
                .flatten()
                .filter(|s| !s.trim().is_empty())
                .collect::<Vec<_>>()
                .join("; ");
            if detail.is_empty() {
                BackendError::Transient(format!("HTTP {status}: {message}"))
            } else {
                BackendError::Transient(format!("HTTP {status}: {message} ({detail})"))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::{TimeZone, Utc};

    use super::*;

    // -- classify_error ------------------------------------------------------

    #[test]
    fn missing_function_code_is_not_provisioned() {
        let body = r#"{"code":"PGRST202","message":"Could not find the function public.search_site(limit_count, offset_count, q, types) in the schema cache","details":null,"hint":null}"#;
        assert_eq!(
            classify_error(404, body, "search_site"),
            BackendError::NotProvisioned { name: "search_site".into() }
        );
    }

    #[test]
    fn missing_column_code_names_the_column() {
        let body = r#"{"code":"42703","message":"column moments.video_url does not exist"}"#;
        assert_eq!(
            classify_error(400, body, "moments"),
            BackendError::MissingColumn { column: "video_url".into() }
        );
    }

    #[test]
    fn message_shim_applies_without_a_code() {
        let body = "function public.search_site(q => text) does not exist";
        assert_matches!(
            classify_error(500, body, "search_site"),
            BackendError::NotProvisioned { .. }
        );
    }

    #[test]
    fn auth_failures_are_unauthorized() {
        let body = r#"{"code":"PGRST301","message":"JWT expired"}"#;
        assert_matches!(classify_error(401, body, "cases"), BackendError::Unauthorized(_));
        assert_matches!(classify_error(403, "nope", "cases"), BackendError::Unauthorized(_));
    }

    #[test]
    fn everything_else_is_transient_with_details() {
        let body = r#"{"code":"57014","message":"canceling statement due to statement timeout","details":"slow","hint":null}"#;
        assert_eq!(
            classify_error(500, body, "cases"),
            BackendError::Transient(
                "HTTP 500: canceling statement due to statement timeout (slow)".into()
            )
        );
    }

    // -- request params ------------------------------------------------------

    #[test]
    fn record_query_filters_orders_and_limits() {
        let query = RecordQuery {
            collection: "case_comments",
            fields: "id, case_id, body",
            since: Utc.with_ymd_and_hms(2026, 1, 28, 10, 0, 0).unwrap(),
            limit: 30,
            exclude_deleted: true,
        };
        assert_eq!(
            record_query_params(&query),
            vec![
                ("select", "id,case_id,body".to_string()),
                ("created_at", "gt.2026-01-28T10:00:00.000Z".to_string()),
                ("order", "created_at.desc".to_string()),
                ("limit", "30".to_string()),
                ("deleted_at", "is.null".to_string()),
            ]
        );
    }

    #[test]
    fn id_lookup_quotes_ids() {
        let lookup = IdLookup {
            collection: "cases",
            fields: "id, title, board",
            ids: vec!["1".into(), "a\"b".into()],
        };
        let params = id_lookup_params(&lookup);
        assert_eq!(params[1], ("id", r#"in.("1","a\"b")"#.to_string()));
    }

    // -- configuration -------------------------------------------------------

    #[tokio::test]
    async fn unconfigured_backend_never_sends() {
        let config = ClientConfig::from_lookup(|_| None).unwrap();
        let backend = SupabaseBackend::new(&config);
        assert!(!backend.is_configured());
        let request = SearchRequest::page("x", 0, &kidneysphere_core::search::all_types());
        assert_eq!(
            backend.search_site(&request).await,
            Err(BackendError::NotConfigured)
        );
    }

    #[tokio::test]
    async fn signed_out_user_needs_no_request() {
        let config = ClientConfig::from_lookup(|key| match key {
            "SUPABASE_URL" => Some("http://127.0.0.1:9".into()),
            "SUPABASE_ANON_KEY" => Some("anon".into()),
            _ => None,
        })
        .unwrap();
        let backend = SupabaseBackend::new(&config);
        assert_eq!(backend.current_user().await, Ok(None));
    }
}

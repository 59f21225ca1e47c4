//! Unified site search constants, types, and helpers.
//!
//! This module lives in `core` (zero internal deps) so the aggregator, the
//! HTTP backend, and the CLI all agree on page size, type names, and the
//! wire shape of the `search_site` remote procedure.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Rows requested per page. A page with fewer rows is the last page.
pub const PAGE_SIZE: usize = 20;

/// Debounce window for keystroke-driven searches, in milliseconds.
pub const DEFAULT_DEBOUNCE_MS: u64 = 260;

/// Maximum number of query terms used for highlighting.
pub const MAX_HIGHLIGHT_TERMS: usize = 6;

/// Maximum number of tags shown in a result's meta line.
pub const MAX_META_TAGS: usize = 3;

/// Name of the server-side full-text search procedure.
pub const SEARCH_PROCEDURE: &str = "search_site";

/// Placeholder title for rows without one.
pub const UNTITLED: &str = "(untitled)";

// ---------------------------------------------------------------------------
// Search types
// ---------------------------------------------------------------------------

/// A category of searchable content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    Article,
    Case,
    Moment,
    Event,
    Research,
    Person,
}

impl SearchType {
    /// Every type, in display order.
    pub const ALL: [SearchType; 6] = [
        Self::Article,
        Self::Case,
        Self::Moment,
        Self::Event,
        Self::Research,
        Self::Person,
    ];

    /// Wire name used by the search procedure.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Article => "article",
            Self::Case => "case",
            Self::Moment => "moment",
            Self::Event => "event",
            Self::Research => "research",
            Self::Person => "person",
        }
    }

    /// Human-readable label for filter pills and result chips.
    pub fn label(self) -> &'static str {
        match self {
            Self::Article => "Articles",
            Self::Case => "Case discussions",
            Self::Moment => "Moments",
            Self::Event => "Events",
            Self::Research => "Clinical research",
            Self::Person => "Experts & partners",
        }
    }

    /// Short explanation of what the type covers.
    pub fn help(self) -> &'static str {
        match self {
            Self::Article => "Published articles",
            Self::Case => "Requires sign-in",
            Self::Moment => "Public moments",
            Self::Event => "Public events",
            Self::Research => "Public projects",
            Self::Person => "About-page profiles",
        }
    }

    /// Whether results of this type are only returned to signed-in users.
    pub fn requires_login(self) -> bool {
        matches!(self, Self::Case)
    }
}

impl fmt::Display for SearchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == needle)
            .ok_or_else(|| CoreError::UnknownVariant {
                kind: "search type",
                value: s.to_string(),
            })
    }
}

/// The full type set.
pub fn all_types() -> BTreeSet<SearchType> {
    SearchType::ALL.into_iter().collect()
}

/// Type filter to send to the search procedure.
///
/// Returns `None` when every type is active so the backend skips the filter
/// clause entirely.
pub fn type_filter(active: &BTreeSet<SearchType>) -> Option<Vec<SearchType>> {
    if active.len() == SearchType::ALL.len() {
        None
    } else {
        Some(active.iter().copied().collect())
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Arguments of the `search_site` remote procedure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchRequest {
    pub q: String,
    pub limit_count: usize,
    pub offset_count: usize,
    /// `None` serializes as `null`, meaning "no type filter".
    pub types: Option<Vec<SearchType>>,
}

impl SearchRequest {
    /// Build a request for one page at `offset`.
    pub fn page(query: &str, offset: usize, active: &BTreeSet<SearchType>) -> Self {
        Self {
            q: query.to_string(),
            limit_count: PAGE_SIZE,
            offset_count: offset,
            types: type_filter(active),
        }
    }
}

/// Free-form extras attached to a search row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchExtra {
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub board: Option<String>,
}

/// One row returned by the search procedure.
///
/// The shape is fixed regardless of the source record kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Raw type discriminator; kept as text so unknown server-side types
    /// survive a round trip.
    #[serde(rename = "type", default)]
    pub result_type: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub snippet: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
    #[serde(default, deserialize_with = "deserialize_extra")]
    pub extra: SearchExtra,
}

fn deserialize_extra<'de, D>(deserializer: D) -> Result<SearchExtra, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<SearchExtra>::deserialize(deserializer)?.unwrap_or_default())
}

impl SearchResult {
    /// Parsed type, if the discriminator is a known one.
    pub fn kind(&self) -> Option<SearchType> {
        self.result_type.parse().ok()
    }

    /// Label for the type chip; unknown types fall back to the raw text.
    pub fn type_label(&self) -> &str {
        match self.kind() {
            Some(t) => t.label(),
            None => self.result_type.trim(),
        }
    }

    /// Trimmed title, or a placeholder.
    pub fn display_title(&self) -> &str {
        non_empty(self.title.as_deref()).unwrap_or(UNTITLED)
    }

    /// Trimmed link target, or `#`.
    pub fn display_url(&self) -> &str {
        non_empty(self.url.as_deref()).unwrap_or("#")
    }

    /// Trimmed board name from the extras, if any.
    pub fn board(&self) -> Option<&str> {
        non_empty(self.extra.board.as_deref())
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

// ---------------------------------------------------------------------------
// Query helpers
// ---------------------------------------------------------------------------

/// Normalize raw search box contents.
pub fn normalize_query(raw: &str) -> String {
    raw.trim().to_string()
}

/// Split a query into at most [`MAX_HIGHLIGHT_TERMS`] whitespace-separated terms.
pub fn split_terms(query: &str) -> Vec<&str> {
    query
        .split_whitespace()
        .take(MAX_HIGHLIGHT_TERMS)
        .collect()
}

/// `true` when a page of `row_count` rows is the final page.
///
/// The search procedure does not report a total count, so end of results is
/// inferred from a short page.
pub fn is_last_page(row_count: usize) -> bool {
    row_count < PAGE_SIZE
}

/// Scope hint shown under the search box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchHint {
    /// No query yet.
    Prompt,
    /// Every type is active.
    AllContent,
    /// A subset of types is active; labels joined by ` / `.
    Scope(String),
    /// Signed-out users get no case results.
    CasesRequireLogin,
}

impl SearchHint {
    /// Compute the hint for a query and type filter.
    pub fn for_state(query: &str, active: &BTreeSet<SearchType>) -> Self {
        if query.trim().is_empty() {
            return Self::Prompt;
        }
        match type_filter(active) {
            None => Self::AllContent,
            Some(types) => Self::Scope(
                types
                    .iter()
                    .map(|t| t.label())
                    .collect::<Vec<_>>()
                    .join(" / "),
            ),
        }
    }
}

impl fmt::Display for SearchHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Prompt => f.write_str("Type a keyword to start searching."),
            Self::AllContent => f.write_str("Scope: all content"),
            Self::Scope(labels) => write!(f, "Scope: {labels}"),
            Self::CasesRequireLogin => f.write_str(
                "Note: case discussions require sign-in; no case results are returned while signed out.",
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -- type_filter ---------------------------------------------------------

    #[test]
    fn all_types_selected_sends_no_filter() {
        assert_eq!(type_filter(&all_types()), None);
    }

    #[test]
    fn subset_sends_explicit_list_in_display_order() {
        let active: BTreeSet<_> = [SearchType::Person, SearchType::Article].into();
        assert_eq!(
            type_filter(&active),
            Some(vec![SearchType::Article, SearchType::Person])
        );
    }

    // -- SearchRequest -------------------------------------------------------

    #[test]
    fn request_serializes_null_types_when_unfiltered() {
        let req = SearchRequest::page("IgA", 40, &all_types());
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["q"], "IgA");
        assert_eq!(json["limit_count"], 20);
        assert_eq!(json["offset_count"], 40);
        assert!(json["types"].is_null());
    }

    #[test]
    fn request_serializes_lowercase_type_names() {
        let active: BTreeSet<_> = [SearchType::Case].into();
        let json = serde_json::to_value(SearchRequest::page("x", 0, &active)).unwrap();
        assert_eq!(json["types"], serde_json::json!(["case"]));
    }

    // -- SearchType ----------------------------------------------------------

    #[test]
    fn search_type_parses_case_insensitively() {
        assert_eq!(" Moment ".parse::<SearchType>().unwrap(), SearchType::Moment);
        assert!("video".parse::<SearchType>().is_err());
    }

    #[test]
    fn only_cases_require_login() {
        let gated: Vec<_> = SearchType::ALL
            .into_iter()
            .filter(|t| t.requires_login())
            .collect();
        assert_eq!(gated, vec![SearchType::Case]);
    }

    // -- SearchResult --------------------------------------------------------

    #[test]
    fn result_tolerates_missing_and_null_fields() {
        let row: SearchResult =
            serde_json::from_str(r#"{"type":"podcast","title":"  ","extra":null}"#).unwrap();
        assert_eq!(row.kind(), None);
        assert_eq!(row.type_label(), "podcast");
        assert_eq!(row.display_title(), UNTITLED);
        assert_eq!(row.display_url(), "#");
        assert!(row.extra.tags.is_empty());
        assert!(row.created_at.is_none());
    }

    #[test]
    fn result_reads_extra_board_and_tags() {
        let row: SearchResult = serde_json::from_str(
            r#"{"type":"case","title":"IgA","url":"case.html?id=1",
                "created_at":"2026-02-11T08:00:00+00:00",
                "extra":{"tags":["a","b"],"board":" glom "}}"#,
        )
        .unwrap();
        assert_eq!(row.kind(), Some(SearchType::Case));
        assert_eq!(row.board(), Some("glom"));
        assert_eq!(row.extra.tags, vec!["a", "b"]);
        assert!(row.created_at.is_some());
    }

    // -- split_terms / is_last_page ------------------------------------------

    #[test]
    fn split_terms_caps_at_six() {
        assert_eq!(split_terms("a b c d e f g h").len(), 6);
        assert!(split_terms("   ").is_empty());
    }

    #[test]
    fn full_page_is_not_last() {
        assert!(!is_last_page(20));
        assert!(is_last_page(7));
        assert!(is_last_page(0));
    }

    // -- SearchHint ----------------------------------------------------------

    #[test]
    fn hint_prompts_on_empty_query() {
        assert_eq!(SearchHint::for_state("  ", &all_types()), SearchHint::Prompt);
    }

    #[test]
    fn hint_lists_selected_labels() {
        let active: BTreeSet<_> = [SearchType::Event, SearchType::Article].into();
        assert_eq!(
            SearchHint::for_state("dialysis", &active),
            SearchHint::Scope("Articles / Events".into())
        );
        assert_eq!(
            SearchHint::for_state("dialysis", &all_types()),
            SearchHint::AllContent
        );
    }
}

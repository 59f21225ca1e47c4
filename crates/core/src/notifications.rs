//! Notification categories, source rows, and the merged feed item type.
//!
//! Each category is fed by one or more source collections. Rows from every
//! source are turned into [`NotificationItem`]s and merged newest first by
//! [`merge_by_recency`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::display::{snippet, SNIPPET_CHARS};
use crate::error::CoreError;
use crate::types::{deserialize_id, deserialize_opt_id, RecordId, Timestamp};

// ---------------------------------------------------------------------------
// Source collections
// ---------------------------------------------------------------------------

/// Top-level case discussion posts.
pub const CASES_COLLECTION: &str = "cases";

/// Replies under case discussions.
pub const CASE_COMMENTS_COLLECTION: &str = "case_comments";

/// Community moments feed.
pub const MOMENTS_COLLECTION: &str = "moments";

/// Columns read for new cases.
pub const CASE_FIELDS: &str = "id, title, summary, board, created_at, author_name";

/// Columns read for new case replies.
pub const CASE_REPLY_FIELDS: &str = "id, case_id, author_name, body, created_at";

/// Columns read when enriching replies with their parent case.
pub const CASE_META_FIELDS: &str = "id, title, board";

/// Row limit for new cases.
pub const CASES_LIMIT: usize = 20;

/// Row limit for new case replies.
pub const CASE_REPLIES_LIMIT: usize = 30;

/// Row limit for new moments.
pub const MOMENTS_LIMIT: usize = 20;

/// Column sets tried in order for the moments query.
///
/// Older deployments lack `video_url` and/or `deleted_at`; the next candidate
/// is only tried when the store reports one of those columns missing.
pub const MOMENT_FIELD_CANDIDATES: &[(&str, bool)] = &[
    ("id, created_at, author_name, content, images, video_url, deleted_at", true),
    ("id, created_at, author_name, content, images, deleted_at", true),
    ("id, created_at, author_name, content, images, video_url", false),
    ("id, created_at, author_name, content, images", false),
];

/// Columns whose absence triggers the next moments candidate.
pub const OPTIONAL_MOMENT_COLUMNS: &[&str] = &["video_url", "deleted_at"];

/// Title used when a case or a reply's parent has none.
pub const UNTITLED_CASE: &str = "Untitled case";

/// Author shown for moments without one.
pub const ANONYMOUS: &str = "Anonymous";

// ---------------------------------------------------------------------------
// Category
// ---------------------------------------------------------------------------

/// A notification category with its own watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Cases,
    Moments,
}

impl Category {
    /// Every category, in display order.
    pub const ALL: [Category; 2] = [Self::Cases, Self::Moments];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cases => "cases",
            Self::Moments => "moments",
        }
    }

    /// Key under which the category's watermark is stored on the device.
    pub fn storage_key(self) -> &'static str {
        match self {
            Self::Cases => "ks_seen_cases",
            Self::Moments => "ks_seen_moments",
        }
    }

    /// Noun used in empty-state and error text.
    pub fn label(self) -> &'static str {
        match self {
            Self::Cases => "cases / replies",
            Self::Moments => "moments",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cases" | "case" => Ok(Self::Cases),
            "moments" | "moment" => Ok(Self::Moments),
            _ => Err(CoreError::UnknownVariant {
                kind: "notification category",
                value: s.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Boards and links
// ---------------------------------------------------------------------------

/// Board keys that are sections of the case discussion board.
const CASE_SECTION_KEYS: &[&str] = &["glom", "tx", "icu", "peds", "rare", "path"];

/// Community fallback label for rows without a board.
const COMMUNITY_LABEL: &str = "Community";

/// Human-readable board name; unknown keys are shown as-is.
pub fn board_label(board: Option<&str>) -> String {
    let key = board.map(|b| b.trim().to_ascii_lowercase()).unwrap_or_default();
    let label = match key.as_str() {
        "glom" => "Glomerular & interstitial disease",
        "tx" => "Transplant nephrology",
        "icu" => "Critical care & dialysis",
        "peds" => "Pediatric nephrology",
        "rare" => "Rare kidney disease",
        "path" => "Renal pathology",
        "research" => "Research discussion",
        "literature" => "Literature club",
        "english" => "International (English)",
        "" => COMMUNITY_LABEL,
        _ => return key,
    };
    label.to_string()
}

/// Link to a case inside its board, highlighting the post.
pub fn case_href(board: Option<&str>, case_id: &str) -> String {
    let key = board.map(|b| b.trim().to_ascii_lowercase()).unwrap_or_default();
    let highlight = if case_id.is_empty() {
        String::new()
    } else {
        format!("&highlight={}", encode_component(case_id))
    };
    if CASE_SECTION_KEYS.contains(&key.as_str()) {
        format!("board.html?c=case&s={}{highlight}", encode_component(&key))
    } else if !key.is_empty() {
        format!("board.html?c={}{highlight}", encode_component(&key))
    } else if !case_id.is_empty() {
        format!("case.html?id={}", encode_component(case_id))
    } else {
        "community.html".to_string()
    }
}

/// Link to a reply anchor on its case page.
pub fn reply_href(case_id: &str, reply_id: &str) -> String {
    format!(
        "case.html?id={}#comment-{}",
        encode_component(case_id),
        encode_component(reply_id)
    )
}

/// Link to a single moment.
pub fn moment_href(moment_id: &str) -> String {
    format!("moments.html?id={}", encode_component(moment_id))
}

/// Percent-encode everything outside the URI unreserved set.
fn encode_component(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Source rows
// ---------------------------------------------------------------------------

/// A row from `cases`.
#[derive(Debug, Clone, Deserialize)]
pub struct CaseRow {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: RecordId,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub board: Option<String>,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
    #[serde(default)]
    pub author_name: Option<String>,
}

/// A row from `case_comments`.
#[derive(Debug, Clone, Deserialize)]
pub struct CaseReplyRow {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: RecordId,
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    pub case_id: Option<RecordId>,
    #[serde(default)]
    pub author_name: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
}

/// Parent case fields used to enrich a reply.
#[derive(Debug, Clone, Deserialize)]
pub struct CaseMeta {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: RecordId,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub board: Option<String>,
}

/// A row from `moments`.
#[derive(Debug, Clone, Deserialize)]
pub struct MomentRow {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: RecordId,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
    #[serde(default)]
    pub author_name: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub images: Option<Vec<Option<String>>>,
    #[serde(default)]
    pub video_url: Option<String>,
}

// ---------------------------------------------------------------------------
// Feed items
// ---------------------------------------------------------------------------

/// A new top-level post.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostItem {
    pub id: RecordId,
    pub title: String,
    pub summary: String,
    pub board: Option<String>,
    pub board_label: Option<String>,
    pub created_at: Option<Timestamp>,
    pub author: Option<String>,
    pub href: String,
}

/// A new reply under a post.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplyItem {
    pub id: RecordId,
    pub parent_id: Option<RecordId>,
    /// Parent title when the enrichment lookup found the parent.
    pub parent_title: Option<String>,
    pub board: Option<String>,
    pub board_label: Option<String>,
    pub body: String,
    pub created_at: Option<Timestamp>,
    pub author: Option<String>,
    pub href: String,
}

/// A new moment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MomentItem {
    pub id: RecordId,
    pub author: String,
    pub content: String,
    pub first_image: Option<String>,
    pub has_video: bool,
    pub created_at: Option<Timestamp>,
    pub href: String,
}

/// One entry of a category feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationItem {
    Post(PostItem),
    Reply(ReplyItem),
    Moment(MomentItem),
}

fn clean(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl NotificationItem {
    /// Build a post item from a `cases` row.
    pub fn from_case(row: CaseRow) -> Self {
        let board = clean(row.board.as_deref());
        Self::Post(PostItem {
            href: case_href(board.as_deref(), &row.id),
            board_label: board.as_deref().map(|b| board_label(Some(b))),
            title: clean(row.title.as_deref()).unwrap_or_else(|| UNTITLED_CASE.to_string()),
            summary: snippet(row.summary.as_deref().unwrap_or_default(), SNIPPET_CHARS),
            author: clean(row.author_name.as_deref()),
            created_at: row.created_at,
            board,
            id: row.id,
        })
    }

    /// Build a reply item, enriched with its parent when known.
    ///
    /// A missing parent never drops the reply; the item simply carries no
    /// parent title or board.
    pub fn from_reply(row: CaseReplyRow, parent: Option<&CaseMeta>) -> Self {
        let board = parent.and_then(|p| clean(p.board.as_deref()));
        let case_id = row.case_id.clone().unwrap_or_default();
        Self::Reply(ReplyItem {
            href: reply_href(&case_id, &row.id),
            parent_title: parent.and_then(|p| clean(p.title.as_deref())),
            board_label: board.as_deref().map(|b| board_label(Some(b))),
            board,
            body: snippet(row.body.as_deref().unwrap_or_default(), SNIPPET_CHARS),
            author: clean(row.author_name.as_deref()),
            created_at: row.created_at,
            parent_id: row.case_id,
            id: row.id,
        })
    }

    /// Build a moment item from a `moments` row.
    pub fn from_moment(row: MomentRow) -> Self {
        let first_image = row
            .images
            .as_ref()
            .and_then(|imgs| imgs.first())
            .and_then(|img| clean(img.as_deref()));
        Self::Moment(MomentItem {
            href: moment_href(&row.id),
            author: clean(row.author_name.as_deref()).unwrap_or_else(|| ANONYMOUS.to_string()),
            content: snippet(row.content.as_deref().unwrap_or_default(), SNIPPET_CHARS),
            has_video: clean(row.video_url.as_deref()).is_some(),
            first_image,
            created_at: row.created_at,
            id: row.id,
        })
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Post(p) => &p.id,
            Self::Reply(r) => &r.id,
            Self::Moment(m) => &m.id,
        }
    }

    pub fn created_at(&self) -> Option<Timestamp> {
        match self {
            Self::Post(p) => p.created_at,
            Self::Reply(r) => r.created_at,
            Self::Moment(m) => m.created_at,
        }
    }

    pub fn href(&self) -> &str {
        match self {
            Self::Post(p) => &p.href,
            Self::Reply(r) => &r.href,
            Self::Moment(m) => &m.href,
        }
    }

    /// Headline for list display.
    pub fn headline(&self) -> String {
        match self {
            Self::Post(p) => format!("New post: {}", p.title),
            Self::Reply(r) => format!(
                "New reply: {}",
                r.parent_title.as_deref().unwrap_or(UNTITLED_CASE)
            ),
            Self::Moment(m) => m.author.clone(),
        }
    }
}

/// Merge items from several sources, newest first.
///
/// Items without a timestamp sort after every dated item. The sort is stable,
/// so equal timestamps keep their source order.
pub fn merge_by_recency<I>(sources: I) -> Vec<NotificationItem>
where
    I: IntoIterator<Item = Vec<NotificationItem>>,
{
    let mut merged: Vec<NotificationItem> = sources.into_iter().flatten().collect();
    merged.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
    merged
}

/// Explanation shown above the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationHint {
    /// At least one category has no stored watermark on this device.
    FirstUse,
    /// All categories use this device's last mark-read time.
    SinceLastRead,
}

impl fmt::Display for NotificationHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FirstUse => f.write_str(
                "First visit on this device: counting from your account creation time. \
                 Use \"mark all read\" to skip the history.",
            ),
            Self::SinceLastRead => {
                f.write_str("Counting from the last time you marked read on this device.")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

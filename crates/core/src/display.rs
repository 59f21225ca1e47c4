//! Time and text formatting shared by the search and notification views.
//!
//! Dates are shown in Beijing time (UTC+8), the site's display zone.

use chrono::{FixedOffset, Offset, Utc};

use crate::types::Timestamp;

/// Offset of the display zone from UTC, in seconds.
const DISPLAY_OFFSET_SECS: i32 = 8 * 3600;

/// Default snippet length, in characters.
pub const SNIPPET_CHARS: usize = 120;

/// Separator between meta-line fields.
pub const META_SEPARATOR: &str = " · ";

fn display_zone() -> FixedOffset {
    // 8h is always in range.
    FixedOffset::east_opt(DISPLAY_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

/// `YYYY-MM-DD HH:MM` in the display zone.
pub fn format_datetime(ts: &Timestamp) -> String {
    ts.with_timezone(&display_zone())
        .format("%Y-%m-%d %H:%M")
        .to_string()
}

/// `YYYY-MM-DD` in the display zone.
pub fn format_date(ts: &Timestamp) -> String {
    ts.with_timezone(&display_zone())
        .format("%Y-%m-%d")
        .to_string()
}

/// Coarse "time ago" text relative to `now`.
///
/// Falls back to a calendar date after a week. Future timestamps read as
/// "just now".
pub fn relative_time(ts: &Timestamp, now: &Timestamp) -> String {
    let secs = (*now - *ts).num_seconds();
    if secs < 60 {
        return "just now".to_string();
    }
    let mins = secs / 60;
    if mins < 60 {
        return format!("{mins} min ago");
    }
    let hours = mins / 60;
    if hours < 24 {
        return format!("{hours} h ago");
    }
    let days = hours / 24;
    if days < 7 {
        return format!("{days} d ago");
    }
    format_date(ts)
}

/// Trim `text` and cut it to `max_chars` characters, appending `…` when cut.
pub fn snippet(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(max_chars).collect();
    out.push('…');
    out
}

/// Join the non-empty parts with [`META_SEPARATOR`].
pub fn join_meta<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    parts
        .into_iter()
        .filter_map(|p| {
            let p = p.as_ref().trim();
            (!p.is_empty()).then(|| p.to_string())
        })
        .collect::<Vec<_>>()
        .join(META_SEPARATOR)
}

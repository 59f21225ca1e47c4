//! HTML escaping and query-term highlighting for result snippets.
//!
//! Matching runs against the raw text and every segment is escaped on the
//! way out, so markup in the snippet can never reach the output unescaped
//! and a term can never match inside an entity such as `&amp;`.

use regex::RegexBuilder;

use crate::search::split_terms;

/// Opening tag wrapped around a matched term.
pub const MARK_OPEN: &str = "<mark>";

/// Closing tag wrapped around a matched term.
pub const MARK_CLOSE: &str = "</mark>";

/// Escape the five HTML-special characters.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

/// Escape `text` and wrap case-insensitive matches of the query terms in
/// `<mark>`.
///
/// Terms are applied longest first; a shorter term never matches inside a
/// region already claimed by a longer one.
pub fn highlight(text: &str, query: &str) -> String {
    let raw = text.trim();
    if raw.is_empty() {
        return String::new();
    }

    let mut terms = split_terms(query);
    if terms.is_empty() {
        return escape_html(raw);
    }
    terms.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()));

    let mut claimed: Vec<(usize, usize)> = Vec::new();
    for term in terms {
        let Ok(re) = RegexBuilder::new(&regex::escape(term))
            .case_insensitive(true)
            .build()
        else {
            continue;
        };
        for m in re.find_iter(raw) {
            let overlaps = claimed
                .iter()
                .any(|&(start, end)| m.start() < end && start < m.end());
            if !overlaps {
                claimed.push((m.start(), m.end()));
            }
        }
    }
    claimed.sort_unstable();

    let mut out = String::with_capacity(raw.len() + claimed.len() * 13);
    let mut cursor = 0;
    for (start, end) in claimed {
        out.push_str(&escape_html(&raw[cursor..start]));
        out.push_str(MARK_OPEN);
        out.push_str(&escape_html(&raw[start..end]));
        out.push_str(MARK_CLOSE);
        cursor = end;
    }
    out.push_str(&escape_html(&raw[cursor..]));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_covers_all_special_characters() {
        assert_eq!(
            escape_html(r#"<a href="x">Tom & Jerry's</a>"#),
            "&lt;a href=&quot;x&quot;&gt;Tom &amp; Jerry&#39;s&lt;/a&gt;"
        );
    }

    #[test]
    fn markup_in_snippet_is_escaped_and_term_marked_once() {
        let out = highlight("<b>IgA</b> nephropathy", "IgA");
        assert_eq!(out, "&lt;b&gt;<mark>IgA</mark>&lt;/b&gt; nephropathy");
        assert!(!out.contains("<b>"));
        assert_eq!(out.matches("<mark>").count(), 1);
    }

    #[test]
    fn matching_is_case_insensitive_and_keeps_original_case() {
        assert_eq!(
            highlight("IgA and iga", "IGA"),
            "<mark>IgA</mark> and <mark>iga</mark>"
        );
    }

    #[test]
    fn longer_terms_win_and_shorter_terms_do_not_nest() {
        let out = highlight("nephropathy", "nephro nephropathy");
        assert_eq!(out, "<mark>nephropathy</mark>");
    }

    #[test]
    fn terms_never_match_inside_entities() {
        let out = highlight("salt & water", "amp");
        assert_eq!(out, "salt &amp; water");
    }

    #[test]
    fn special_characters_in_query_are_literal() {
        assert_eq!(highlight("a < b", "<"), "a <mark>&lt;</mark> b");
        assert_eq!(highlight("x.y", "."), "x<mark>.</mark>y");
    }

    #[test]
    fn empty_query_only_escapes() {
        assert_eq!(highlight(" <i>x</i> ", "  "), "&lt;i&gt;x&lt;/i&gt;");
        assert_eq!(highlight("   ", "x"), "");
    }

    #[test]
    fn multibyte_text_is_sliced_on_char_boundaries() {
        assert_eq!(highlight("肾移植内科讨论", "移植"), "肾<mark>移植</mark>内科讨论");
    }
}

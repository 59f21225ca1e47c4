//! The `q` query parameter that mirrors the search box.
//!
//! Keeping the query in the page URL makes searches shareable and
//! bookmarkable: it is read once on load and rewritten on every search.

use reqwest::Url;

/// Query parameter holding the search text.
pub const QUERY_PARAM: &str = "q";

/// Read the trimmed search query from a page URL.
///
/// Returns an empty string when the URL is unparseable or has no `q`.
pub fn query_from_url(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| {
            u.query_pairs()
                .find(|(k, _)| k == QUERY_PARAM)
                .map(|(_, v)| v.trim().to_string())
        })
        .unwrap_or_default()
}

/// Rewrite `url` so its `q` parameter holds `query`.
///
/// An empty query removes the parameter. Other parameters keep their order.
pub fn set_query_param(url: &mut Url, query: &str) {
    let query = query.trim();
    let others: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != QUERY_PARAM)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    url.set_query(None);
    if others.is_empty() && query.is_empty() {
        return;
    }
    let mut pairs = url.query_pairs_mut();
    for (k, v) in &others {
        pairs.append_pair(k, v);
    }
    if !query.is_empty() {
        pairs.append_pair(QUERY_PARAM, query);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_and_trims_q() {
        assert_eq!(query_from_url("https://site/search.html?q=%20IgA%20"), "IgA");
        assert_eq!(query_from_url("https://site/search.html"), "");
        assert_eq!(query_from_url("not a url"), "");
    }

    #[test]
    fn writes_q_and_keeps_other_params() {
        let mut url = Url::parse("https://site/search.html?tab=all").unwrap();
        set_query_param(&mut url, "IgA nephropathy");
        assert_eq!(query_from_url(url.as_str()), "IgA nephropathy");
        assert!(url.as_str().contains("tab=all"));
    }

    #[test]
    fn empty_query_removes_param() {
        let mut url = Url::parse("https://site/search.html?q=old").unwrap();
        set_query_param(&mut url, "  ");
        assert_eq!(url.as_str(), "https://site/search.html");
    }

    #[test]
    fn replacing_q_does_not_duplicate_it() {
        let mut url = Url::parse("https://site/search.html?q=old").unwrap();
        set_query_param(&mut url, "new");
        assert_eq!(url.query(), Some("q=new"));
    }
}

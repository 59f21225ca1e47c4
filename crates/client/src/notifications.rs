//! "Unread since last seen" notification aggregator.
//!
//! For each [`Category`] the aggregator resolves a per-device watermark,
//! reads the category's source collections for rows created after it, and
//! merges them into one feed, newest first. Categories are refreshed
//! concurrently and fail independently.
//!
//! Watermarks only move on an explicit [`mark_read`](NotificationAggregator::mark_read).

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use futures::future::join_all;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

use kidneysphere_core::backend::{BackendError, IdLookup, RecordQuery, SiteBackend};
use kidneysphere_core::notifications::{
    merge_by_recency, CaseMeta, CaseReplyRow, CaseRow, Category, MomentRow, NotificationHint,
    NotificationItem, CASES_COLLECTION, CASES_LIMIT, CASE_COMMENTS_COLLECTION, CASE_FIELDS,
    CASE_META_FIELDS, CASE_REPLIES_LIMIT, CASE_REPLY_FIELDS, MOMENTS_COLLECTION, MOMENTS_LIMIT,
    MOMENT_FIELD_CANDIDATES, OPTIONAL_MOMENT_COLUMNS,
};
use kidneysphere_core::types::{RecordId, Timestamp};
use kidneysphere_core::watermark::{
    format_watermark, resolve_watermark, StoreError, Watermark, WatermarkStore,
};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("Notification backend is not configured")]
    NotConfigured,

    /// Notifications are per account; a signed-out caller must sign in.
    #[error("Sign in to see notifications")]
    NotSignedIn,

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// Feeds
// ---------------------------------------------------------------------------

/// One category's unread items.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryFeed {
    pub category: Category,
    pub watermark: Watermark,
    /// Newest first.
    pub items: Vec<NotificationItem>,
    /// Set when the category's primary source failed.
    pub error: Option<BackendError>,
}

impl CategoryFeed {
    pub fn count(&self) -> usize {
        self.items.len()
    }

    pub fn first_use(&self) -> bool {
        self.watermark.first_use
    }
}

/// Both category feeds plus the explanation shown above them.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationSnapshot {
    pub hint: NotificationHint,
    /// In [`Category::ALL`] order.
    pub feeds: Vec<CategoryFeed>,
}

impl NotificationSnapshot {
    pub fn feed(&self, category: Category) -> Option<&CategoryFeed> {
        self.feeds.iter().find(|f| f.category == category)
    }

    pub fn total_unread(&self) -> usize {
        self.feeds.iter().map(CategoryFeed::count).sum()
    }
}

fn hint_for(feeds: &[CategoryFeed]) -> NotificationHint {
    if feeds.iter().any(CategoryFeed::first_use) {
        NotificationHint::FirstUse
    } else {
        NotificationHint::SinceLastRead
    }
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

/// Notification aggregator for one signed-in view.
pub struct NotificationAggregator<B, S> {
    backend: B,
    store: S,
    /// Source of per-category request generations.
    next_generation: AtomicU64,
    /// Latest applied feed and its generation, per category.
    applied: Mutex<HashMap<Category, (u64, CategoryFeed)>>,
}

impl<B: SiteBackend, S: WatermarkStore> NotificationAggregator<B, S> {
    pub fn new(backend: B, store: S) -> Self {
        Self {
            backend,
            store,
            next_generation: AtomicU64::new(0),
            applied: Mutex::new(HashMap::new()),
        }
    }

    fn next_generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    // ---- watermarks ----

    /// Effective watermark for `category`.
    ///
    /// Without a stored value the signed-in account's creation time is used,
    /// or the Unix epoch when that is unknown. A failed session lookup is
    /// returned as [`NotificationError::Backend`].
    pub async fn get_watermark(&self, category: Category) -> Result<Watermark, NotificationError> {
        let stored = resolve_watermark(category, self.read_stored(category).as_deref(), None);
        if !stored.first_use {
            return Ok(stored);
        }
        let created_at = self
            .backend
            .current_user()
            .await?
            .and_then(|u| u.created_at);
        Ok(resolve_watermark(category, None, created_at.as_deref()))
    }

    fn read_stored(&self, category: Category) -> Option<String> {
        match self.store.get(category.storage_key()) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(category = %category, error = %e, "Watermark unreadable, treating as unset");
                None
            }
        }
    }

    fn resolve(&self, category: Category, account_created_at: Option<&str>) -> Watermark {
        let stored = self.read_stored(category);
        resolve_watermark(category, stored.as_deref(), account_created_at)
    }

    /// Mark everything in `category` as read as of now.
    ///
    /// The other category's watermark is untouched. Calling it twice is
    /// harmless.
    pub async fn mark_read(&self, category: Category) -> Result<Watermark, NotificationError> {
        self.mark_read_at(category, Utc::now()).await
    }

    /// Mark every category as read.
    pub async fn mark_all_read(&self) -> Result<Vec<Watermark>, NotificationError> {
        let now = Utc::now();
        let mut marks = Vec::with_capacity(Category::ALL.len());
        for category in Category::ALL {
            marks.push(self.mark_read_at(category, now).await?);
        }
        Ok(marks)
    }

    async fn mark_read_at(
        &self,
        category: Category,
        now: Timestamp,
    ) -> Result<Watermark, NotificationError> {
        self.store
            .set(category.storage_key(), &format_watermark(&now))?;
        let watermark = Watermark {
            category,
            since: now,
            first_use: false,
        };
        tracing::info!(category = %category, since = %format_watermark(&now), "Marked read");

        // Anything older than the new watermark is read now.
        let generation = self.next_generation();
        self.apply(
            generation,
            CategoryFeed {
                category,
                watermark,
                items: Vec::new(),
                error: None,
            },
        )
        .await;
        Ok(watermark)
    }

    // ---- refresh ----

    /// Refresh every category concurrently.
    pub async fn refresh(&self) -> Result<NotificationSnapshot, NotificationError> {
        let created_at = self.signed_in_account().await?;
        let generations: Vec<u64> = Category::ALL.iter().map(|_| self.next_generation()).collect();

        let feeds = join_all(
            Category::ALL
                .into_iter()
                .map(|category| self.load_category(category, created_at.as_deref())),
        )
        .await;

        for (generation, feed) in generations.into_iter().zip(feeds) {
            self.apply(generation, feed).await;
        }
        Ok(self.snapshot().await)
    }

    /// Refresh a single category.
    pub async fn refresh_category(
        &self,
        category: Category,
    ) -> Result<CategoryFeed, NotificationError> {
        let created_at = self.signed_in_account().await?;
        let generation = self.next_generation();
        let feed = self.load_category(category, created_at.as_deref()).await;
        Ok(self.apply(generation, feed).await)
    }

    /// Latest applied feeds.
    ///
    /// Categories never loaded show up empty with their current watermark.
    pub async fn snapshot(&self) -> NotificationSnapshot {
        let applied = self.applied.lock().await;
        let feeds: Vec<CategoryFeed> = Category::ALL
            .into_iter()
            .map(|category| match applied.get(&category) {
                Some((_, feed)) => feed.clone(),
                None => CategoryFeed {
                    category,
                    watermark: self.resolve(category, None),
                    items: Vec::new(),
                    error: None,
                },
            })
            .collect();
        NotificationSnapshot {
            hint: hint_for(&feeds),
            feeds,
        }
    }

    /// Creation time of the signed-in account.
    async fn signed_in_account(&self) -> Result<Option<String>, NotificationError> {
        if !self.backend.is_configured() {
            return Err(NotificationError::NotConfigured);
        }
        match self.backend.current_user().await? {
            Some(user) => Ok(user.created_at),
            None => Err(NotificationError::NotSignedIn),
        }
    }

    /// Store `feed` unless a newer generation was applied already.
    ///
    /// Returns the feed now current for the category.
    async fn apply(&self, generation: u64, feed: CategoryFeed) -> CategoryFeed {
        let mut applied = self.applied.lock().await;
        if let Some((current, existing)) = applied.get(&feed.category) {
            if *current > generation {
                tracing::debug!(
                    category = %feed.category,
                    generation,
                    current = *current,
                    "Discarding stale notification feed"
                );
                return existing.clone();
            }
        }
        applied.insert(feed.category, (generation, feed.clone()));
        feed
    }

    async fn load_category(&self, category: Category, account_created_at: Option<&str>) -> CategoryFeed {
        let watermark = self.resolve(category, account_created_at);
        let (items, error) = match category {
            Category::Cases => self.load_cases(watermark.since).await,
            Category::Moments => match self.load_moments(watermark.since).await {
                Ok(items) => (items, None),
                Err(e) => (Vec::new(), Some(e)),
            },
        };
        if let Some(e) = &error {
            tracing::warn!(category = %category, error = %e, "Notification category failed");
        } else {
            tracing::debug!(category = %category, count = items.len(), "Notification category loaded");
        }
        CategoryFeed {
            category,
            watermark,
            items,
            error,
        }
    }

    // ---- cases ----

    /// New posts and new replies. A posts failure becomes the category
    /// error; a replies failure only drops the replies.
    async fn load_cases(&self, since: Timestamp) -> (Vec<NotificationItem>, Option<BackendError>) {
        let posts_query = RecordQuery {
            collection: CASES_COLLECTION,
            fields: CASE_FIELDS,
            since,
            limit: CASES_LIMIT,
            exclude_deleted: false,
        };
        let replies_query = RecordQuery {
            collection: CASE_COMMENTS_COLLECTION,
            fields: CASE_REPLY_FIELDS,
            since,
            limit: CASE_REPLIES_LIMIT,
            exclude_deleted: true,
        };
        let (posts, replies) = tokio::join!(
            self.backend.query_new_records(&posts_query),
            self.backend.query_new_records(&replies_query),
        );

        let (posts, error) = match posts {
            Ok(rows) => (decode_rows::<CaseRow>(CASES_COLLECTION, rows), None),
            Err(e) => (Vec::new(), Some(e)),
        };
        let replies = match replies {
            Ok(rows) => decode_rows::<CaseReplyRow>(CASE_COMMENTS_COLLECTION, rows),
            Err(e) => {
                tracing::warn!(error = %e, "Case replies unavailable, showing posts only");
                Vec::new()
            }
        };

        let parents = self.load_parents(&replies).await;
        let post_items = posts.into_iter().map(NotificationItem::from_case).collect();
        let reply_items = replies
            .into_iter()
            .map(|row| {
                let parent = row.case_id.as_ref().and_then(|id| parents.get(id));
                NotificationItem::from_reply(row, parent)
            })
            .collect();

        (merge_by_recency([post_items, reply_items]), error)
    }

    /// Parent case title and board for each reply, keyed by case id.
    ///
    /// Lookup failures leave the map empty.
    async fn load_parents(&self, replies: &[CaseReplyRow]) -> HashMap<RecordId, CaseMeta> {
        let ids: BTreeSet<RecordId> = replies
            .iter()
            .filter_map(|r| r.case_id.clone())
            .filter(|id| !id.is_empty())
            .collect();
        if ids.is_empty() {
            return HashMap::new();
        }

        let lookup = IdLookup {
            collection: CASES_COLLECTION,
            fields: CASE_META_FIELDS,
            ids: ids.into_iter().collect(),
        };
        match self.backend.fetch_by_ids(&lookup).await {
            Ok(rows) => decode_rows::<CaseMeta>(CASES_COLLECTION, rows)
                .into_iter()
                .map(|meta| (meta.id.clone(), meta))
                .collect(),
            Err(e) => {
                tracing::debug!(error = %e, "Parent case lookup failed");
                HashMap::new()
            }
        }
    }

    // ---- moments ----

    /// New moments, walking column-set candidates for older schemas.
    async fn load_moments(&self, since: Timestamp) -> Result<Vec<NotificationItem>, BackendError> {
        let mut last_error = None;
        for &(fields, exclude_deleted) in MOMENT_FIELD_CANDIDATES {
            let query = RecordQuery {
                collection: MOMENTS_COLLECTION,
                fields,
                since,
                limit: MOMENTS_LIMIT,
                exclude_deleted,
            };
            match self.backend.query_new_records(&query).await {
                Ok(rows) => {
                    let items = decode_rows::<MomentRow>(MOMENTS_COLLECTION, rows)
                        .into_iter()
                        .map(NotificationItem::from_moment)
                        .collect();
                    return Ok(merge_by_recency([items]));
                }
                Err(BackendError::MissingColumn { column })
                    if OPTIONAL_MOMENT_COLUMNS.contains(&column.as_str()) =>
                {
                    tracing::debug!(column = %column, fields, "Moments column missing, trying next column set");
                    last_error = Some(BackendError::MissingColumn { column });
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(|| BackendError::Transient("no moments query succeeded".into())))
    }
}

/// Decode rows, skipping (and logging) any that do not fit.
fn decode_rows<T: DeserializeOwned>(collection: &str, rows: Vec<serde_json::Value>) -> Vec<T> {
    rows.into_iter()
        .filter_map(|row| match serde_json::from_value::<T>(row) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                tracing::warn!(collection, error = %e, "Skipping malformed row");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn watermark(category: Category, first_use: bool) -> Watermark {
        Watermark {
            category,
            since: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            first_use,
        }
    }

    fn feed(category: Category, first_use: bool) -> CategoryFeed {
        CategoryFeed {
            category,
            watermark: watermark(category, first_use),
            items: Vec::new(),
            error: None,
        }
    }

    #[test]
    fn hint_is_first_use_when_any_category_is_new_on_device() {
        assert_eq!(
            hint_for(&[feed(Category::Cases, false), feed(Category::Moments, true)]),
            NotificationHint::FirstUse
        );
        assert_eq!(
            hint_for(&[feed(Category::Cases, false), feed(Category::Moments, false)]),
            NotificationHint::SinceLastRead
        );
    }

    #[test]
    fn malformed_rows_are_skipped() {
        let rows = vec![
            serde_json::json!({ "id": "1", "title": "ok" }),
            serde_json::json!({ "title": "no id" }),
            serde_json::json!({ "id": 2 }),
        ];
        let decoded = decode_rows::<CaseRow>("cases", rows);
        let ids: Vec<_> = decoded.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
    }
}

//! Per-device "last seen" watermarks.
//!
//! A watermark is the boundary after which records count as new for one
//! notification category. It lives on the device, keyed per category, and is
//! only advanced by an explicit mark-read. When none is stored the account
//! creation time is used instead of "now", so a first visit shows existing
//! history rather than an empty inbox.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::notifications::Category;
use crate::types::{parse_timestamp, Timestamp};

/// Errors from a watermark store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Watermark store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Watermark store is corrupt: {0}")]
    Corrupt(String),
}

/// Client-local key/value persistence for watermarks.
///
/// Values are RFC 3339 timestamp strings.
pub trait WatermarkStore: Send + Sync {
    /// Read the raw value stored under `key`.
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

impl<T: WatermarkStore + ?Sized> WatermarkStore for Arc<T> {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        (**self).set(key, value)
    }
}

/// Volatile store for tests and one-shot runs.
#[derive(Debug, Default)]
pub struct MemoryWatermarkStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryWatermarkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WatermarkStore for MemoryWatermarkStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let values = self
            .values
            .lock()
            .map_err(|_| StoreError::Corrupt("lock poisoned".into()))?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| StoreError::Corrupt("lock poisoned".into()))?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// A resolved watermark for one category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watermark {
    pub category: Category,
    pub since: Timestamp,
    /// No watermark was stored on this device; `since` is the fallback.
    pub first_use: bool,
}

/// Resolve the effective watermark from the stored value and the account
/// creation time.
///
/// A missing or unparseable stored value falls back to the account creation
/// time; an unparseable creation time falls back to the Unix epoch.
pub fn resolve_watermark(
    category: Category,
    stored: Option<&str>,
    account_created_at: Option<&str>,
) -> Watermark {
    if let Some(since) = stored.and_then(parse_timestamp) {
        return Watermark {
            category,
            since,
            first_use: false,
        };
    }
    let since = account_created_at
        .and_then(parse_timestamp)
        .unwrap_or(Timestamp::UNIX_EPOCH);
    Watermark {
        category,
        since,
        first_use: true,
    }
}

/// Serialize a watermark for storage.
pub fn format_watermark(ts: &Timestamp) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

//! Device-local watermark file.
//!
//! Watermarks are kept in a small JSON object (`{"ks_seen_cases": "..."}`)
//! inside the state directory. Writes go to a temporary file that is then
//! renamed over the original, so a crash never leaves a half-written file.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use kidneysphere_core::watermark::{StoreError, WatermarkStore};

/// File name inside the state directory.
pub const WATERMARK_FILE_NAME: &str = "watermarks.json";

/// [`WatermarkStore`] backed by a JSON file.
pub struct FileWatermarkStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl FileWatermarkStore {
    /// Store at `<state_dir>/watermarks.json`. Nothing is created until the
    /// first write.
    pub fn in_dir(state_dir: &Path) -> Self {
        Self::at(state_dir.join(WATERMARK_FILE_NAME))
    }

    /// Store at an explicit file path.
    pub fn at(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<BTreeMap<String, String>, StoreError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&raw).map_err(|e| {
            StoreError::Corrupt(format!("{}: {e}", self.path.display()))
        })
    }

    fn write_map(&self, map: &BTreeMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(map)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl WatermarkStore for FileWatermarkStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        Ok(self.read_map()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut map = match self.read_map() {
            Ok(map) => map,
            Err(StoreError::Corrupt(reason)) => {
                tracing::warn!(path = %self.path.display(), reason = %reason, "Replacing corrupt watermark file");
                BTreeMap::new()
            }
            Err(e) => return Err(e),
        };
        map.insert(key.to_string(), value.to_string());
        self.write_map(&map)?;
        tracing::debug!(key, value, "Watermark stored");
        Ok(())
    }
}

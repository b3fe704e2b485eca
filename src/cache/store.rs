//! Key-value store implementations.
//!
//! Entries carry a cache timestamp and an optional TTL. Expiry is enforced
//! by the store: an expired entry is invisible to `get` and is dropped on
//! the next write. Entries without a TTL never expire (trading calendars,
//! confirmed prices, confirmed market-closed days).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache document corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// A single cached entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub value: serde_json::Value,
    pub cached_at: DateTime<Utc>,
    /// TTL in seconds; `None` means the entry never expires.
    pub ttl_secs: Option<u64>,
}

impl CacheEntry {
    /// Whether the entry is still valid at `now`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        match self.ttl_secs {
            None => true,
            Some(secs) => {
                let age = now.signed_duration_since(self.cached_at);
                age.num_seconds() >= 0 && (age.num_seconds() as u64) < secs
            }
        }
    }

    fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }
}

/// Minimal key-value cache interface.
pub trait KvStore {
    /// Fetch a valid (unexpired) entry. Expired entries behave as absent.
    fn get(&self, key: &str) -> Option<CacheEntry>;

    /// Insert an entry. `ttl` of `None` caches forever.
    fn put(&mut self, key: &str, value: serde_json::Value, ttl: Option<Duration>);

    /// All keys currently held, including expired ones not yet swept.
    fn keys(&self) -> Vec<String>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory store for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: BTreeMap<String, CacheEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a raw entry with an explicit timestamp. Used by tests to
    /// construct aged entries.
    pub fn put_raw(&mut self, key: &str, entry: CacheEntry) {
        self.entries.insert(key.to_string(), entry);
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Option<CacheEntry> {
        self.entries.get(key).filter(|e| e.is_valid()).cloned()
    }

    fn put(&mut self, key: &str, value: serde_json::Value, ttl: Option<Duration>) {
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                cached_at: Utc::now(),
                ttl_secs: ttl.map(|t| t.as_secs()),
            },
        );
    }

    fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// On-disk cache document.
///
/// The whole store is one JSON file, re-read and re-written on every update.
/// A single writer process is assumed; there is no file locking.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: BTreeMap<String, CacheEntry>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    entries: BTreeMap<String, CacheEntry>,
    #[serde(default)]
    updated: Option<DateTime<Utc>>,
}

impl JsonFileStore {
    /// Open a store backed by `path`. A missing file starts empty; a corrupt
    /// file is logged and discarded rather than aborting the run.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let entries = match Self::load_document(&path) {
            Ok(doc) => doc.entries,
            Err(StoreError::Io(_)) => BTreeMap::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "discarding unreadable cache document");
                BTreeMap::new()
            }
        };
        Self { path, entries }
    }

    fn load_document(path: &Path) -> Result<Document, StoreError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn write_document(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let doc = Document {
            entries: self.entries.clone(),
            updated: Some(Utc::now()),
        };
        let content = serde_json::to_string_pretty(&doc)?;
        fs::write(&self.path, content)?;
        Ok(())
    }

    /// Drop expired entries. Called before each persist so stale temporary
    /// failures do not accumulate in the document.
    fn sweep(&mut self) {
        let now = Utc::now();
        self.entries.retain(|_, e| e.is_valid_at(now));
    }
}

impl KvStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<CacheEntry> {
        self.entries.get(key).filter(|e| e.is_valid()).cloned()
    }

    fn put(&mut self, key: &str, value: serde_json::Value, ttl: Option<Duration>) {
        // Read-modify-write: pick up entries written since open, then merge
        // ours on top.
        if let Ok(doc) = Self::load_document(&self.path) {
            for (k, v) in doc.entries {
                self.entries.entry(k).or_insert(v);
            }
        }

        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                cached_at: Utc::now(),
                ttl_secs: ttl.map(|t| t.as_secs()),
            },
        );
        self.sweep();

        if let Err(e) = self.write_document() {
            warn!(path = %self.path.display(), error = %e, "cache persist failed");
        }
    }

    fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    #[test]
    fn test_memory_roundtrip() {
        let mut store = MemoryStore::new();
        store.put("k", json!({"price": 42}), None);

        let entry = store.get("k").unwrap();
        assert_eq!(entry.value["price"], 42);
        assert_eq!(store.len(), 1);
        assert!(store.get("missing").is_none());
    }

    #[test]
    fn test_permanent_entry_never_expires() {
        let mut store = MemoryStore::new();
        store.put_raw(
            "k",
            CacheEntry {
                value: json!(1),
                cached_at: Utc::now() - ChronoDuration::days(3650),
                ttl_secs: None,
            },
        );
        assert!(store.get("k").is_some());
    }

    #[test]
    fn test_ttl_expiry() {
        let mut store = MemoryStore::new();
        store.put_raw(
            "fresh",
            CacheEntry {
                value: json!(1),
                cached_at: Utc::now() - ChronoDuration::minutes(30),
                ttl_secs: Some(3600),
            },
        );
        store.put_raw(
            "stale",
            CacheEntry {
                value: json!(1),
                cached_at: Utc::now() - ChronoDuration::minutes(90),
                ttl_secs: Some(3600),
            },
        );

        assert!(store.get("fresh").is_some());
        assert!(store.get("stale").is_none());
    }

    #[test]
    fn test_file_store_roundtrip() {
        let dir = std::env::temp_dir().join("leaps-backtest-store-test");
        let path = dir.join("cache.json");
        let _ = fs::remove_file(&path);

        let mut store = JsonFileStore::open(&path);
        store.put("calendar:GOOG:2020", json!({"days": 253}), None);

        // A fresh handle sees the persisted entry.
        let reopened = JsonFileStore::open(&path);
        let entry = reopened.get("calendar:GOOG:2020").unwrap();
        assert_eq!(entry.value["days"], 253);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_file_store_missing_file_is_empty() {
        let store = JsonFileStore::open("/nonexistent/dir/never-created.json");
        assert!(store.is_empty());
    }
}

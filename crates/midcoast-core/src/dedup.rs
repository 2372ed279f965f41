//! At-most-once processing ledger for scraped items.
//!
//! Each scraper owns one ledger file. Concurrent writers to the same file are
//! not supported: the last `flush` wins and entries from the other writer are
//! lost. Callers must give every scraper instance its own path.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::util::write_json_atomic;

/// Persistence seam for the dedup ledger.
///
/// `mark_processed` only updates memory; nothing is durable until `flush`.
pub trait DedupStore: Send + Sync {
    fn is_processed(&self, item_id: &str) -> bool;

    fn mark_processed(
        &mut self,
        item_id: &str,
        metadata: serde_json::Map<String, serde_json::Value>,
    );

    fn flush(&mut self) -> Result<(), AppError>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A single ledger record. Created once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    #[serde(skip)]
    pub item_id: String,
    #[serde(rename = "timestamp")]
    pub processed_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// JSON-file ledger: `{item_id: {timestamp, metadata}}`.
#[derive(Debug)]
pub struct DedupCache {
    path: PathBuf,
    entries: BTreeMap<String, CacheEntry>,
}

impl DedupCache {
    /// Open the ledger at `path`.
    ///
    /// A missing file starts an empty ledger. An unreadable or corrupt file is
    /// logged and also starts empty; it is overwritten on the next flush.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match Self::load(&path) {
            Ok(Some(entries)) => {
                tracing::info!(path = %path.display(), items = entries.len(), "Loaded dedup cache");
                entries
            }
            Ok(None) => BTreeMap::new(),
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Failed to load dedup cache, starting empty");
                BTreeMap::new()
            }
        };
        Self { path, entries }
    }

    fn load(path: &Path) -> Result<Option<BTreeMap<String, CacheEntry>>, AppError> {
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(path)?;
        let mut entries: BTreeMap<String, CacheEntry> = serde_json::from_str(&text)?;
        for (id, entry) in entries.iter_mut() {
            entry.item_id = id.clone();
        }
        Ok(Some(entries))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, item_id: &str) -> Option<&CacheEntry> {
        self.entries.get(item_id)
    }
}

impl DedupStore for DedupCache {
    fn is_processed(&self, item_id: &str) -> bool {
        self.entries.contains_key(item_id)
    }

    fn mark_processed(
        &mut self,
        item_id: &str,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) {
        if self.entries.contains_key(item_id) {
            return;
        }
        self.entries.insert(
            item_id.to_string(),
            CacheEntry {
                item_id: item_id.to_string(),
                processed_at: Utc::now(),
                metadata,
            },
        );
    }

    fn flush(&mut self) -> Result<(), AppError> {
        write_json_atomic(&self.path, &self.entries)
            .map_err(|e| AppError::CacheError(format!("{}: {e}", self.path.display())))?;
        tracing::info!(path = %self.path.display(), items = self.entries.len(), "Saved dedup cache");
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(url: &str) -> serde_json::Map<String, serde_json::Value> {
        let mut m = serde_json::Map::new();
        m.insert("url".into(), url.into());
        m
    }

    #[test]
    fn missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DedupCache::open(dir.path().join("processed_items.json"));
        assert!(cache.is_empty());
        assert!(!cache.is_processed("123"));
    }

    #[test]
    fn mark_is_not_durable_until_flush() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("processed_items.json");

        let mut cache = DedupCache::open(&path);
        cache.mark_processed("123", meta("https://example.com/123"));
        assert!(cache.is_processed("123"));
        assert!(!path.exists());

        cache.flush().unwrap();
        let reopened = DedupCache::open(&path);
        assert!(reopened.is_processed("123"));
        let entry = reopened.get("123").unwrap();
        assert_eq!(entry.item_id, "123");
        assert_eq!(entry.metadata["url"], "https://example.com/123");
    }

    #[test]
    fn ledger_file_uses_timestamp_and_metadata_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache/processed_items.json");

        let mut cache = DedupCache::open(&path);
        cache.mark_processed("a1", meta("u"));
        cache.flush().unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(raw["a1"]["timestamp"].is_string());
        assert_eq!(raw["a1"]["metadata"]["url"], "u");
        assert!(raw["a1"].get("item_id").is_none());
    }

    #[test]
    fn entries_are_never_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = DedupCache::open(dir.path().join("c.json"));
        cache.mark_processed("x", meta("first"));
        cache.mark_processed("x", meta("second"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("x").unwrap().metadata["url"], "first");
    }

    #[test]
    fn corrupt_file_is_logged_and_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("processed_items.json");
        std::fs::write(&path, "{not json").unwrap();

        let mut cache = DedupCache::open(&path);
        assert!(cache.is_empty());

        cache.mark_processed("fresh", serde_json::Map::new());
        cache.flush().unwrap();
        assert!(DedupCache::open(&path).is_processed("fresh"));
    }
}

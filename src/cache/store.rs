// Cache store for reading and writing cached API data.
// Handles JSON serialization, TTL checking, and filesystem operations.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::Result;

use super::paths::entry_path;

/// One cached payload with the time it was written.
///
/// Freshness is decided by the reader: the TTL is supplied at read time,
/// so one entry can serve callers with different freshness requirements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub payload: Value,
    pub written_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Create a new entry stamped with the current time.
    pub fn new(key: impl Into<String>, payload: Value) -> Self {
        Self {
            key: key.into(),
            payload,
            written_at: Utc::now(),
        }
    }

    /// Check whether this entry may be served at `now` under `ttl`.
    /// A zero TTL never trusts the cache.
    pub fn is_fresh_at(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        if ttl.is_zero() {
            return false;
        }

        let age = now
            .signed_duration_since(self.written_at)
            .to_std()
            .unwrap_or(Duration::ZERO);

        age < ttl
    }
}

/// Pluggable key/value cache with read-time TTL.
///
/// `get` reports a miss for absent, stale or unreadable entries; callers
/// never see an error from the cache. `set` is best-effort and returns the
/// stored value so it can be chained.
pub trait CacheStore: Send + Sync {
    /// Read `key` as of `now`.
    fn get_at(&self, key: &str, ttl: Duration, now: DateTime<Utc>) -> Option<Value>;

    /// Persist `value` under `key`, regardless of any TTL.
    fn set(&self, key: &str, value: Value) -> Value;

    /// Read `key` as of the current time.
    fn get(&self, key: &str, ttl: Duration) -> Option<Value> {
        self.get_at(key, ttl, Utc::now())
    }
}

/// Filesystem-backed store: one JSON file per key under a root directory.
#[derive(Debug, Clone)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read the raw entry for a key, if one exists.
    pub fn read_entry(&self, key: &str) -> Result<Option<CacheEntry>> {
        let path = entry_path(&self.root, key);
        if !path.exists() {
            return Ok(None);
        }

        let contents = fs::read_to_string(&path)?;
        let entry: CacheEntry = serde_json::from_str(&contents)?;
        Ok(Some(entry))
    }

    /// Write an entry to disk atomically.
    pub fn write_entry(&self, entry: &CacheEntry) -> Result<()> {
        let path = entry_path(&self.root, &entry.key);

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string(entry)?;

        // Write atomically via temp file
        let temp_path = path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        fs::rename(&temp_path, &path)?;

        Ok(())
    }

    /// Delete the entry for a key.
    pub fn delete(&self, key: &str) -> Result<()> {
        let path = entry_path(&self.root, key);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Delete the whole cache tree.
    pub fn clear(&self) -> Result<()> {
        if self.root.exists() {
            fs::remove_dir_all(&self.root)?;
        }
        Ok(())
    }
}

impl CacheStore for DiskStore {
    fn get_at(&self, key: &str, ttl: Duration, now: DateTime<Utc>) -> Option<Value> {
        if ttl.is_zero() {
            return None;
        }

        match self.read_entry(key) {
            Ok(Some(entry)) if entry.is_fresh_at(ttl, now) => {
                debug!(key, "cache hit");
                Some(entry.payload)
            }
            Ok(_) => {
                debug!(key, "cache miss");
                None
            }
            Err(e) => {
                debug!(key, error = %e, "unreadable cache entry");
                None
            }
        }
    }

    fn set(&self, key: &str, value: Value) -> Value {
        let entry = CacheEntry::new(key, value);
        if let Err(e) = self.write_entry(&entry) {
            warn!(key, error = %e, "failed to write cache entry");
        }
        entry.payload
    }
}

/// In-process store, used when the disk cache is disabled and in tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .lock()
            .map(|e| e.contains_key(key))
            .unwrap_or(false)
    }
}

impl CacheStore for MemoryStore {
    fn get_at(&self, key: &str, ttl: Duration, now: DateTime<Utc>) -> Option<Value> {
        let entries = self.entries.lock().ok()?;
        entries
            .get(key)
            .filter(|entry| entry.is_fresh_at(ttl, now))
            .map(|entry| entry.payload.clone())
    }

    fn set(&self, key: &str, value: Value) -> Value {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_string(), CacheEntry::new(key, value.clone()));
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    const HOUR: Duration = Duration::from_secs(60 * 60);

    #[test]
    fn test_get_after_set_returns_value() {
        let temp_dir = TempDir::new().unwrap();
        let store = DiskStore::new(temp_dir.path());

        let value = json!({"ok": 1, "name": "Gregarious Grange"});
        let returned = store.set("streets/LA5101", value.clone());

        assert_eq!(returned, value);
        assert_eq!(store.get("streets/LA5101", HOUR), Some(value));
        assert!(temp_dir.path().join("streets/LA5101.json").exists());
    }

    #[test]
    fn test_zero_ttl_is_always_a_miss() {
        let temp_dir = TempDir::new().unwrap();
        let store = DiskStore::new(temp_dir.path());

        store.set("subways", json!(["LA1", "LA2"]));
        assert_eq!(store.get("subways", Duration::ZERO), None);

        let memory = MemoryStore::new();
        memory.set("subways", json!(["LA1"]));
        assert_eq!(memory.get("subways", Duration::ZERO), None);
    }

    #[test]
    fn test_ttl_boundary_with_simulated_clock() {
        let temp_dir = TempDir::new().unwrap();
        let store = DiskStore::new(temp_dir.path());
        let ttl = Duration::from_secs(300);

        store.set("auctions/all", json!({"a": 1}));
        let written_at = store.read_entry("auctions/all").unwrap().unwrap().written_at;

        let just_before = written_at + chrono::Duration::seconds(299);
        let at_ttl = written_at + chrono::Duration::seconds(300);
        let after = written_at + chrono::Duration::seconds(301);

        assert_eq!(store.get_at("auctions/all", ttl, just_before), Some(json!({"a": 1})));
        assert_eq!(store.get_at("auctions/all", ttl, at_ttl), None);
        assert_eq!(store.get_at("auctions/all", ttl, after), None);
    }

    #[test]
    fn test_memory_store_ttl_boundary() {
        let store = MemoryStore::new();
        store.set("k", json!(7));
        let now = Utc::now();

        assert_eq!(store.get_at("k", HOUR, now), Some(json!(7)));
        assert_eq!(store.get_at("k", HOUR, now + chrono::Duration::hours(1)), None);
    }

    #[test]
    fn test_missing_and_corrupt_entries_are_misses() {
        let temp_dir = TempDir::new().unwrap();
        let store = DiskStore::new(temp_dir.path());

        assert_eq!(store.get("nope", HOUR), None);

        fs::write(temp_dir.path().join("broken.json"), "{ not json").unwrap();
        assert_eq!(store.get("broken", HOUR), None);
    }

    #[test]
    fn test_clear_and_rebuild() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("cache");
        let store = DiskStore::new(&root);

        store.set("skills/alchemy_1", json!({"name": "Alchemy I"}));
        store.clear().unwrap();
        assert!(!root.exists());
        assert_eq!(store.get("skills/alchemy_1", HOUR), None);

        store.set("skills/alchemy_1", json!({"name": "Alchemy I"}));
        assert!(store.get("skills/alchemy_1", HOUR).is_some());
    }

    #[test]
    fn test_delete_entry() {
        let temp_dir = TempDir::new().unwrap();
        let store = DiskStore::new(temp_dir.path());

        store.set("players/me", json!({"player_tsid": "P1"}));
        store.delete("players/me").unwrap();
        assert!(store.read_entry("players/me").unwrap().is_none());
    }
}

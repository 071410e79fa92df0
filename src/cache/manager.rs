//! Typed cache over a key-value backend
//!
//! [`CacheStore`] stores [`CacheEntry`] envelopes under their
//! [`CacheKey`], reads them back by direct lookup, and mirrors every write
//! into a durable snapshot file.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::key::CacheKey;
use super::snapshot::SnapshotWriter;
use super::store::KeyValueStore;
use crate::clock::Clock;
use crate::error::CacheError;

/// A cached payload with the metadata needed to judge its freshness
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The key the entry was stored under
    pub key: CacheKey,
    /// Vendor response body, stored verbatim
    pub payload: String,
    /// When the payload was fetched
    pub inserted_at: DateTime<Utc>,
    /// How long the payload stays usable
    #[serde(with = "ttl_seconds")]
    pub ttl: Duration,
}

impl CacheEntry {
    /// Whether the entry is still usable at `now`
    ///
    /// Fresh while `now - inserted_at <= ttl`, independent of whether the
    /// backend has evicted it yet.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now - self.inserted_at <= self.ttl
    }
}

/// Serializes a TTL as whole seconds
mod ttl_seconds {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ttl: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(ttl.num_seconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = i64::deserialize(deserializer)?;
        Duration::try_seconds(secs)
            .ok_or_else(|| serde::de::Error::custom(format!("ttl out of range: {}", secs)))
    }
}

/// Cache of vendor payloads keyed by location and day
///
/// Lookups go straight to the backend by key; nothing here scans the
/// namespace except [`keys`](Self::keys), which exists for listings.
#[derive(Clone)]
pub struct CacheStore {
    backend: Arc<dyn KeyValueStore>,
    snapshots: Option<SnapshotWriter>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("snapshots", &self.snapshots)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl CacheStore {
    /// Creates a cache on `backend` with no snapshot directory
    pub fn new(backend: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            snapshots: None,
            clock,
        }
    }

    /// Also writes a snapshot file for every stored payload
    pub fn with_snapshots(mut self, snapshots: SnapshotWriter) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    /// The clock entries are timestamped with
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn snapshots(&self) -> Option<&SnapshotWriter> {
        self.snapshots.as_ref()
    }

    /// Looks up the entry stored under `key`
    ///
    /// Returns the entry as stored; callers decide on freshness with
    /// [`CacheEntry::is_fresh`].
    pub fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        let Some(raw) = self.backend.get(&key.to_string())? else {
            return Ok(None);
        };
        let entry: CacheEntry = serde_json::from_str(&raw)?;
        Ok(Some(entry))
    }

    /// Whether a fresh entry exists for `key`
    pub fn contains(&self, key: &CacheKey) -> Result<bool, CacheError> {
        Ok(self
            .get(key)?
            .is_some_and(|entry| entry.is_fresh(self.clock.now())))
    }

    /// Stores `payload` under `key` and writes its snapshot
    ///
    /// Both writes are attempted even if the first fails; the returned
    /// error is the backend's if it failed, otherwise the snapshot's.
    pub fn set(
        &self,
        key: &CacheKey,
        payload: &str,
        ttl: Duration,
    ) -> Result<CacheEntry, CacheError> {
        let entry = CacheEntry {
            key: key.clone(),
            payload: payload.to_string(),
            inserted_at: self.clock.now(),
            ttl,
        };

        let stored = self.put(&entry);
        let snapshot = match &self.snapshots {
            Some(writer) => writer.write(key, payload).map(Some),
            None => Ok(None),
        };

        stored?;
        if let Some(path) = snapshot? {
            tracing::info!(key = %key, path = %path.display(), "saved snapshot");
        }
        Ok(entry)
    }

    /// Writes an entry to the backend as-is, without a snapshot
    pub fn put(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        let json = serde_json::to_string(entry)?;
        let ttl = entry.ttl.to_std().unwrap_or(std::time::Duration::ZERO);
        self.backend
            .set_with_expiry(&entry.key.to_string(), &json, ttl)
    }

    /// Lists cached keys that start with `prefix`
    pub fn keys(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
        self.backend.scan(prefix)
    }

    /// Path the snapshot for `key` is (or would be) written to
    pub fn snapshot_path(&self, key: &CacheKey) -> Option<PathBuf> {
        self.snapshots.as_ref().map(|writer| writer.path_for(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::{FileStore, MemoryStore};
    use crate::clock::ManualClock;
    use chrono::{NaiveDate, TimeZone};
    use std::fs;
    use tempfile::TempDir;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 10, 9, 0, 0).unwrap(),
        ))
    }

    fn key() -> CacheKey {
        CacheKey::new("London,UK", NaiveDate::from_ymd_opt(2024, 6, 10).unwrap())
    }

    fn create_test_cache() -> (CacheStore, Arc<ManualClock>, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let clock = clock();
        let cache = CacheStore::new(
            Arc::new(FileStore::with_dir(temp_dir.path().join("store"))),
            clock.clone(),
        )
        .with_snapshots(SnapshotWriter::new(temp_dir.path().join("snapshots")));
        (cache, clock, temp_dir)
    }

    #[test]
    fn test_set_then_get_returns_entry() {
        let (cache, clock, _temp_dir) = create_test_cache();

        let stored = cache
            .set(&key(), r#"{"address":"London,UK"}"#, Duration::days(15))
            .expect("Write should succeed");
        let read = cache.get(&key()).unwrap().expect("Entry should exist");

        assert_eq!(read, stored);
        assert_eq!(read.inserted_at, clock.now());
        assert_eq!(read.payload, r#"{"address":"London,UK"}"#);
        assert!(cache.contains(&key()).unwrap());
    }

    #[test]
    fn test_get_missing_key() {
        let (cache, _clock, _temp_dir) = create_test_cache();
        assert!(cache.get(&key()).unwrap().is_none());
        assert!(!cache.contains(&key()).unwrap());
    }

    #[test]
    fn test_set_writes_snapshot() {
        let (cache, _clock, temp_dir) = create_test_cache();

        cache.set(&key(), "{\"days\":[]}", Duration::days(1)).unwrap();

        let path = temp_dir.path().join("snapshots").join("london,uk-2024-06-10.json");
        assert_eq!(cache.snapshot_path(&key()), Some(path.clone()));
        assert_eq!(fs::read_to_string(path).unwrap(), "{\"days\":[]}");
    }

    #[test]
    fn test_snapshot_failure_still_stores_entry() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("blocker");
        fs::write(&blocker, "").unwrap();
        let cache = CacheStore::new(Arc::new(MemoryStore::new()), clock())
            .with_snapshots(SnapshotWriter::new(&blocker));

        let result = cache.set(&key(), "{}", Duration::days(1));

        assert!(matches!(result, Err(CacheError::Io(_))));
        assert!(cache.get(&key()).unwrap().is_some());
    }

    #[test]
    fn test_entry_freshness_follows_clock_not_backend() {
        let (cache, clock, _temp_dir) = create_test_cache();
        let ttl = Duration::hours(2);
        cache.set(&key(), "{}", ttl).unwrap();

        clock.advance(Duration::hours(2));
        assert!(cache.contains(&key()).unwrap(), "fresh at exactly ttl");

        clock.advance(Duration::seconds(1));
        // Still physically present in the file store...
        assert!(cache.get(&key()).unwrap().is_some());
        // ...but no longer usable.
        assert!(!cache.contains(&key()).unwrap());
    }

    #[test]
    fn test_overwrite_keeps_latest_payload() {
        let (cache, _clock, _temp_dir) = create_test_cache();
        cache.set(&key(), "first", Duration::days(1)).unwrap();
        cache.set(&key(), "second", Duration::days(1)).unwrap();

        assert_eq!(cache.get(&key()).unwrap().unwrap().payload, "second");
    }

    #[test]
    fn test_keys_lists_by_prefix() {
        let (cache, _clock, _temp_dir) = create_test_cache();
        let other = CacheKey::new("Paris,FR", key().date());
        cache.set(&key(), "{}", Duration::days(1)).unwrap();
        cache.set(&other, "{}", Duration::days(1)).unwrap();

        assert_eq!(cache.keys("paris").unwrap(), vec!["paris,fr|2024-06-10".to_string()]);
        assert_eq!(cache.keys("").unwrap().len(), 2);
    }

    #[test]
    fn test_entry_serialization_roundtrip() {
        let entry = CacheEntry {
            key: key(),
            payload: "{\"temp\":20.5}".to_string(),
            inserted_at: Utc.with_ymd_and_hms(2024, 6, 10, 9, 0, 0).unwrap(),
            ttl: Duration::days(15),
        };

        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"ttl\":1296000"));
        let back: CacheEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }
}

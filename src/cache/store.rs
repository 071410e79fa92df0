//! Key-value backends the cache sits on
//!
//! [`KeyValueStore`] is the minimal surface the gateway needs from a storage
//! engine: keyed get, set with expiry, existence check and a prefix scan for
//! operator listings. Two backends ship with the crate: [`MemoryStore`] for
//! a single process and [`FileStore`], which keeps one JSON file per key in
//! an XDG-compliant cache directory.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::CacheError;

/// Storage engine behind the cache
///
/// Implementations must make `set` atomic from a reader's point of view: a
/// concurrent `get` sees either the old value or the new one.
pub trait KeyValueStore: Send + Sync {
    /// Returns the value stored under `key`, unless it is absent or expired
    fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Stores `value` under `key`, replacing any previous value, to expire
    /// after `ttl`
    fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    fn exists(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.get(key)?.is_some())
    }

    /// Lists live keys starting with `prefix`
    ///
    /// Walks the whole namespace; meant for listings, not lookups.
    fn scan(&self, prefix: &str) -> Result<Vec<String>, CacheError>;

    /// Checks that the backend is usable
    fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

/// In-process store with lazy expiry
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, MemoryValue>>,
}

#[derive(Debug, Clone)]
struct MemoryValue {
    value: String,
    expires_at: Instant,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries held, expired ones included
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        Ok(self
            .entries
            .read()
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.value.clone()))
    }

    fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let now = Instant::now();
        let expires_at = now.checked_add(ttl).unwrap_or_else(|| far_future(now));
        self.entries.write().insert(
            key.to_string(),
            MemoryValue {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    fn scan(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .read()
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && entry.expires_at > now)
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

/// Roughly a century ahead, for TTLs too large to add to an `Instant`
fn far_future(now: Instant) -> Instant {
    now + Duration::from_secs(100 * 365 * 24 * 60 * 60)
}

/// Wrapper stored on disk for each key
#[derive(Debug, Serialize, Deserialize)]
struct FileEntry {
    /// The key, kept so scans need not decode file names
    key: String,
    /// The stored value
    value: String,
    /// When the value was written
    stored_at: DateTime<Utc>,
    /// When the value stops being returned
    expires_at: DateTime<Utc>,
}

/// Store that persists each key as a JSON file
///
/// Files live in `~/.cache/wxgate/store/` on Linux (or the platform's
/// equivalent) unless a directory is given. Writes go to a temporary file
/// that is renamed into place, so readers never see a partial entry.
#[derive(Debug, Clone)]
pub struct FileStore {
    /// Directory where entry files are stored
    dir: PathBuf,
}

impl FileStore {
    /// Creates a FileStore in the XDG-compliant cache directory
    ///
    /// Returns `None` if the cache directory cannot be determined (e.g., no
    /// home directory).
    pub fn new() -> Option<Self> {
        let project_dirs = ProjectDirs::from("", "", "wxgate")?;
        Some(Self::with_dir(project_dirs.cache_dir().join("store")))
    }

    /// Creates a FileStore rooted at a custom directory
    pub fn with_dir(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file holding `key`
    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", encode_file_stem(key)))
    }

    fn ensure_dir(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.dir)
    }

    /// Reads an entry file; a missing file is `Ok(None)`
    fn read_entry(path: &Path) -> Result<Option<FileEntry>, CacheError> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Deletes an expired entry file
    fn evict(path: &Path) {
        match fs::remove_file(path) {
            Ok(()) => tracing::debug!(path = %path.display(), "evicted expired cache entry"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "could not evict expired cache entry")
            }
        }
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let path = self.entry_path(key);
        let Some(entry) = Self::read_entry(&path)? else {
            return Ok(None);
        };
        if Utc::now() >= entry.expires_at {
            Self::evict(&path);
            return Ok(None);
        }
        Ok(Some(entry.value))
    }

    fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.ensure_dir()?;

        let now = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let entry = FileEntry {
            key: key.to_string(),
            value: value.to_string(),
            stored_at: now,
            expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        };
        let json = serde_json::to_string_pretty(&entry)?;

        write_atomically(&self.entry_path(key), json.as_bytes())?;
        Ok(())
    }

    fn scan(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let now = Utc::now();
        let mut keys = Vec::new();
        for dir_entry in read_dir {
            let path = dir_entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            // Unreadable files are skipped rather than failing the listing.
            if let Ok(Some(entry)) = Self::read_entry(&path) {
                if now >= entry.expires_at {
                    Self::evict(&path);
                } else if entry.key.starts_with(prefix) {
                    keys.push(entry.key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn ping(&self) -> Result<(), CacheError> {
        self.ensure_dir()?;
        let metadata = fs::metadata(&self.dir)?;
        if metadata.permissions().readonly() {
            return Err(CacheError::Backend(format!(
                "cache directory {} is read-only",
                self.dir.display()
            )));
        }
        Ok(())
    }
}

/// Distinguishes temp files of concurrent writers within one process
static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Writes `contents` to a sibling temp file and renames it over `path`
pub(crate) fn write_atomically(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = path.with_file_name(format!(
        ".{}.{}-{}.tmp",
        file_name,
        std::process::id(),
        TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    let mut file = fs::File::create(&tmp_path)?;
    file.write_all(contents)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp_path, path).inspect_err(|_| {
        let _ = fs::remove_file(&tmp_path);
    })
}

/// Maps a key to a file stem without collisions
///
/// ASCII letters, digits, `-` and `_` pass through; every other byte becomes
/// `%XX`.
fn encode_file_stem(key: &str) -> String {
    let mut stem = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            stem.push(byte as char);
        } else {
            stem.push_str(&format!("%{:02X}", byte));
        }
    }
    stem
}

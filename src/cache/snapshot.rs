//! Durable per-key snapshots of fetched payloads
//!
//! Each successful fetch is also written verbatim to
//! `<snapshot dir>/<location>-<date>.json`, so an operator can inspect past
//! fetches even after the cache backend has been cleared.

use std::fs;
use std::path::{Path, PathBuf};

use crate::cache::key::CacheKey;
use crate::cache::store::write_atomically;
use crate::error::CacheError;

#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    dir: PathBuf,
}

impl SnapshotWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where the snapshot for `key` lives
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.snapshot_file_name())
    }

    /// Writes `payload` as the snapshot for `key`, replacing an older one
    pub fn write(&self, key: &CacheKey, payload: &str) -> Result<PathBuf, CacheError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);
        write_atomically(&path, payload.as_bytes())?;
        Ok(path)
    }

    /// Reads back the snapshot for `key`, if one was written
    pub fn read(&self, key: &CacheKey) -> Result<Option<String>, CacheError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(payload) => Ok(Some(payload)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

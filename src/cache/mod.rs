//! Cache of vendor payloads
//!
//! Payloads are cached per normalized location and calendar day, on top of
//! a pluggable key-value backend, and mirrored into durable snapshot files
//! so fetched data survives the backend being cleared.

mod key;
mod manager;
mod snapshot;
mod store;

pub use key::{normalize_location, CacheKey};
pub use manager::{CacheEntry, CacheStore};
pub use snapshot::SnapshotWriter;
pub use store::{FileStore, KeyValueStore, MemoryStore};

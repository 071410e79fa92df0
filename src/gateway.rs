//! Request orchestration: cache first, then a throttled vendor call
//!
//! For each query the orchestrator walks the same path:
//!
//! 1. validate the query (no cache or network access on failure)
//! 2. derive today's cache key and look it up directly
//! 3. on a fresh hit, return the cached payload
//! 4. on a miss, wait for a slot in the rate window and call the vendor
//! 5. classify the outcome; only successes are cached and snapshotted
//!
//! Nothing is retried here. A caller that wants another attempt calls
//! [`RequestOrchestrator::handle`] again, which re-checks the cache and
//! re-enters the rate window.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::cache::{CacheKey, CacheStore};
use crate::clock::Clock;
use crate::config::{ConfigError, GatewayConfig};
use crate::error::{CacheError, GatewayError};
use crate::fetch::{ExternalFetcher, FetchError, VendorRequest};
use crate::query::Query;
use crate::throttle::RateWindow;

/// Where a response's payload came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    /// A fresh cache entry for today
    Cache,
    /// A vendor call made for this request
    Vendor,
}

/// A payload handed back to the caller
#[derive(Debug)]
pub struct WeatherResponse {
    /// Key the payload is cached under
    pub key: CacheKey,
    /// Vendor response body, byte-for-byte
    pub payload: String,
    pub source: ResponseSource,
    /// When the payload was fetched from the vendor
    pub fetched_at: DateTime<Utc>,
    /// Set when a fetched payload could not be cached or snapshotted
    ///
    /// The payload itself is still valid in that case.
    pub persist_error: Option<CacheError>,
}

/// The decision core of the gateway
pub struct RequestOrchestrator {
    config: GatewayConfig,
    cache: CacheStore,
    window: Arc<RateWindow>,
    fetcher: Arc<dyn ExternalFetcher>,
}

impl std::fmt::Debug for RequestOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestOrchestrator")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}

impl RequestOrchestrator {
    /// Creates an orchestrator with its own rate window sized from `config`
    pub fn new(
        config: GatewayConfig,
        cache: CacheStore,
        fetcher: Arc<dyn ExternalFetcher>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let window = Arc::new(RateWindow::new(config.max_calls, config.period));
        Ok(Self {
            config,
            cache,
            window,
            fetcher,
        })
    }

    /// Shares an existing rate window, e.g. between orchestrators that must
    /// draw from one vendor budget
    pub fn with_rate_window(mut self, window: Arc<RateWindow>) -> Self {
        self.window = window;
        self
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn rate_window(&self) -> &Arc<RateWindow> {
        &self.window
    }

    /// Answers a query from the cache or, failing that, from the vendor
    pub async fn handle(&self, query: &Query) -> Result<WeatherResponse, GatewayError> {
        let target = query.validate()?;

        let now = self.clock().now();
        let key = CacheKey::for_target(&target, now.date_naive());

        match self.cache.get(&key) {
            Ok(Some(entry)) if entry.is_fresh(now) => {
                tracing::info!(key = %key, "serving from cache");
                return Ok(WeatherResponse {
                    key,
                    payload: entry.payload,
                    source: ResponseSource::Cache,
                    fetched_at: entry.inserted_at,
                    persist_error: None,
                });
            }
            Ok(Some(entry)) => {
                tracing::debug!(key = %key, inserted_at = %entry.inserted_at, "cache entry expired");
            }
            Ok(None) => {
                tracing::debug!(key = %key, "cache miss");
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "unreadable cache entry, treating as miss");
            }
        }

        let request =
            VendorRequest::build(&self.config.base_url, &target, query, &self.config.api_key);

        self.window.acquire().await;
        tracing::info!(request = %request, "fetching from vendor");

        let payload = self.fetcher.fetch(&request).await.map_err(|e| {
            let err = classify(e);
            tracing::warn!(key = %key, error = %err, "vendor request failed");
            err
        })?;

        let (fetched_at, persist_error) =
            match self.cache.set(&key, &payload, self.config.ttl_chrono()) {
                Ok(entry) => (entry.inserted_at, None),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "could not persist fetched payload");
                    (self.clock().now(), Some(e))
                }
            };

        Ok(WeatherResponse {
            key,
            payload,
            source: ResponseSource::Vendor,
            fetched_at,
            persist_error,
        })
    }

    /// Lists cached keys for operators
    pub fn cached_keys(&self, prefix: &str) -> Result<Vec<String>, GatewayError> {
        Ok(self.cache.keys(prefix)?)
    }

    fn clock(&self) -> &Arc<dyn Clock> {
        self.cache.clock()
    }
}

/// Maps a fetcher failure onto the gateway's error taxonomy
///
/// 4xx is the caller's problem; every other non-success status is treated
/// as a vendor failure.
fn classify(err: FetchError) -> GatewayError {
    match err {
        FetchError::Network(message) => GatewayError::Network(message),
        FetchError::Status { status, body } if (400..500).contains(&status) => {
            GatewayError::Client { status, body }
        }
        FetchError::Status { status, body } => GatewayError::Server { status, body },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{KeyValueStore, MemoryStore, SnapshotWriter};
    use crate::clock::ManualClock;
    use crate::error::ValidationError;
    use crate::query::DateBound;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use tempfile::TempDir;

    /// Fetcher that replays scripted outcomes and records requests
    #[derive(Default)]
    struct ScriptedFetcher {
        outcomes: Mutex<VecDeque<Result<String, FetchError>>>,
        requests: Mutex<Vec<String>>,
    }

    impl ScriptedFetcher {
        fn new(outcomes: Vec<Result<String, FetchError>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.requests.lock().len()
        }
    }

    #[async_trait]
    impl ExternalFetcher for ScriptedFetcher {
        async fn fetch(&self, request: &VendorRequest) -> Result<String, FetchError> {
            self.requests.lock().push(request.url().to_string());
            self.outcomes
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(FetchError::Network("no scripted outcome".to_string())))
        }
    }

    struct Harness {
        gateway: RequestOrchestrator,
        fetcher: Arc<ScriptedFetcher>,
        clock: Arc<ManualClock>,
        store: Arc<MemoryStore>,
        _temp_dir: TempDir,
    }

    fn harness(outcomes: Vec<Result<String, FetchError>>) -> Harness {
        let temp_dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 10, 9, 0, 0).unwrap(),
        ));
        let store = Arc::new(MemoryStore::new());
        let cache = CacheStore::new(store.clone(), clock.clone())
            .with_snapshots(SnapshotWriter::new(temp_dir.path()));
        let fetcher = ScriptedFetcher::new(outcomes);
        let gateway = RequestOrchestrator::new(
            GatewayConfig::with_api_key("KEY"),
            cache,
            fetcher.clone(),
        )
        .unwrap();

        Harness {
            gateway,
            fetcher,
            clock,
            store,
            _temp_dir: temp_dir,
        }
    }

    const PAYLOAD: &str = r#"{"address":"London,UK","days":[{"temp":17.9}]}"#;

    #[tokio::test]
    async fn test_second_query_same_day_is_served_from_cache() {
        let h = harness(vec![Ok(PAYLOAD.to_string())]);

        let first = h.gateway.handle(&Query::for_location("London,UK")).await.unwrap();
        let second = h.gateway.handle(&Query::for_location(" london, uk ")).await.unwrap();

        assert_eq!(h.fetcher.calls(), 1);
        assert_eq!(first.source, ResponseSource::Vendor);
        assert_eq!(second.source, ResponseSource::Cache);
        assert_eq!(first.payload.as_bytes(), second.payload.as_bytes());
        assert_eq!(first.key, second.key);
        assert!(first.persist_error.is_none());
    }

    #[tokio::test]
    async fn test_range_bounds_share_todays_entry() {
        let h = harness(vec![Ok(PAYLOAD.to_string())]);

        h.gateway.handle(&Query::for_location("London,UK")).await.unwrap();
        let ranged = Query::for_location("LONDON,UK")
            .with_start("2024-06-01".parse::<DateBound>().unwrap())
            .with_end("2024-06-05".parse::<DateBound>().unwrap());
        let response = h.gateway.handle(&ranged).await.unwrap();

        assert_eq!(response.source, ResponseSource::Cache);
        assert_eq!(h.fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_refetched() {
        let h = harness(vec![Ok("old".to_string()), Ok("new".to_string())]);
        let query = Query::for_location("London,UK");
        h.gateway.handle(&query).await.unwrap();

        // Rewind the stored entry's insertion time past the TTL while the
        // backend still holds it.
        let key = CacheKey::new("London,UK", h.clock.today());
        let mut entry = h.gateway.cache().get(&key).unwrap().unwrap();
        entry.inserted_at -= Duration::days(16);
        h.gateway.cache().put(&entry).unwrap();
        assert!(h.gateway.cache().get(&key).unwrap().is_some());

        let response = h.gateway.handle(&query).await.unwrap();

        assert_eq!(response.source, ResponseSource::Vendor);
        assert_eq!(response.payload, "new");
        assert_eq!(h.fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_new_day_uses_new_key() {
        let h = harness(vec![Ok("monday".to_string()), Ok("tuesday".to_string())]);
        let query = Query::for_location("London,UK");

        let monday = h.gateway.handle(&query).await.unwrap();
        h.clock.advance(Duration::days(1));
        let tuesday = h.gateway.handle(&query).await.unwrap();

        assert_ne!(monday.key, tuesday.key);
        assert_eq!(tuesday.payload, "tuesday");
        assert_eq!(h.fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_reversed_dates_fail_before_cache_or_network() {
        let h = harness(vec![Ok(PAYLOAD.to_string())]);
        let query = Query::for_location("London,UK")
            .with_start("2024-06-10".parse::<DateBound>().unwrap())
            .with_end("2024-06-01".parse::<DateBound>().unwrap());

        let err = h.gateway.handle(&query).await.unwrap_err();

        assert!(matches!(
            err,
            GatewayError::Validation(ValidationError::DateOrder { .. })
        ));
        assert_eq!(h.fetcher.calls(), 0);
        assert!(h.store.is_empty());
        assert!(h.gateway.rate_window().is_empty());
    }

    #[tokio::test]
    async fn test_client_and_server_errors_are_not_cached() {
        let h = harness(vec![
            Err(FetchError::Status {
                status: 404,
                body: "not found".to_string(),
            }),
            Err(FetchError::Status {
                status: 500,
                body: "boom".to_string(),
            }),
        ]);
        let query = Query::for_location("London,UK");

        let client = h.gateway.handle(&query).await.unwrap_err();
        assert!(matches!(client, GatewayError::Client { status: 404, .. }));

        let server = h.gateway.handle(&query).await.unwrap_err();
        assert!(matches!(server, GatewayError::Server { status: 500, .. }));

        assert!(h.store.is_empty());
        let key = CacheKey::new("London,UK", h.clock.today());
        assert!(h.gateway.cache().snapshots().unwrap().read(&key).unwrap().is_none());
        // Each failed attempt still spent a slot of the vendor budget.
        assert_eq!(h.gateway.rate_window().len(), 2);
    }

    #[tokio::test]
    async fn test_network_error_is_surfaced() {
        let h = harness(vec![Err(FetchError::Network("connection refused".to_string()))]);

        let err = h
            .gateway
            .handle(&Query::for_location("London,UK"))
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::Network(ref m) if m == "connection refused"));
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn test_unexpected_status_is_a_server_error() {
        let h = harness(vec![Err(FetchError::Status {
            status: 304,
            body: String::new(),
        })]);

        let err = h
            .gateway
            .handle(&Query::for_location("London,UK"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(304));
        assert!(matches!(err, GatewayError::Server { .. }));
    }

    #[tokio::test]
    async fn test_persist_failure_does_not_fail_request() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = CacheStore::new(Arc::new(MemoryStore::new()), clock)
            .with_snapshots(SnapshotWriter::new(&blocker));
        let fetcher = ScriptedFetcher::new(vec![Ok(PAYLOAD.to_string())]);
        let gateway =
            RequestOrchestrator::new(GatewayConfig::with_api_key("KEY"), cache, fetcher).unwrap();

        let response = gateway.handle(&Query::for_location("London,UK")).await.unwrap();

        assert_eq!(response.payload, PAYLOAD);
        assert!(matches!(response.persist_error, Some(CacheError::Io(_))));
    }

    #[tokio::test]
    async fn test_corrupt_cache_entry_is_treated_as_miss() {
        let h = harness(vec![Ok(PAYLOAD.to_string())]);
        let key = CacheKey::new("London,UK", h.clock.today());
        h.store
            .set_with_expiry(&key.to_string(), "not an entry", std::time::Duration::from_secs(60))
            .unwrap();

        let response = h.gateway.handle(&Query::for_location("London,UK")).await.unwrap();

        assert_eq!(response.source, ResponseSource::Vendor);
        assert_eq!(h.gateway.cache().get(&key).unwrap().unwrap().payload, PAYLOAD);
    }

    #[tokio::test]
    async fn test_request_carries_key_and_range() {
        let h = harness(vec![Ok(PAYLOAD.to_string())]);
        let query = Query::for_coordinates(51.5, -0.12)
            .with_start("2024-06-01".parse::<DateBound>().unwrap());

        h.gateway.handle(&query).await.unwrap();

        let requests = h.fetcher.requests.lock();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].contains("/timeline/51.5,-0.12/2024-06-01?key=KEY"));
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = CacheStore::new(Arc::new(MemoryStore::new()), clock);
        let result = RequestOrchestrator::new(
            GatewayConfig::default(),
            cache,
            ScriptedFetcher::new(Vec::new()),
        );
        assert_eq!(result.unwrap_err().field, "api_key");
    }
}

//! Gateway configuration
//!
//! The core takes every tunable as an explicit value. Filling these in from
//! flags or the environment is the CLI's job.

use std::fmt;
use std::time::Duration;

use reqwest::Url;
use thiserror::Error;

use crate::fetch::VISUAL_CROSSING_BASE_URL;

/// Default vendor budget: calls per window
pub const DEFAULT_MAX_CALLS: usize = 10;

/// Default window length
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(10);

/// Default lifetime of a cached payload (15 days)
pub const DEFAULT_TTL: Duration = Duration::from_secs(15 * 24 * 60 * 60);

/// A configuration value that cannot be used
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ConfigError {
    pub field: &'static str,
    pub message: String,
}

impl ConfigError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Everything the gateway core needs to run
#[derive(Clone)]
pub struct GatewayConfig {
    /// Vendor calls allowed per `period`
    pub max_calls: usize,
    /// Length of the rolling rate window
    pub period: Duration,
    /// How long a fetched payload stays usable
    pub ttl: Duration,
    /// Vendor API key
    pub api_key: String,
    /// Vendor endpoint the location path is appended to
    pub base_url: Url,
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("max_calls", &self.max_calls)
            .field("period", &self.period)
            .field("ttl", &self.ttl)
            .field("api_key", &"***")
            .field("base_url", &self.base_url.as_str())
            .finish()
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_calls: DEFAULT_MAX_CALLS,
            period: DEFAULT_PERIOD,
            ttl: DEFAULT_TTL,
            api_key: String::new(),
            base_url: default_base_url(),
        }
    }
}

/// The Visual Crossing timeline endpoint
pub fn default_base_url() -> Url {
    Url::parse(VISUAL_CROSSING_BASE_URL).expect("built-in base URL is valid")
}

impl GatewayConfig {
    /// Default limits with the given API key
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Default::default()
        }
    }

    /// Checks the values are usable, returning the first problem found
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_calls == 0 {
            return Err(ConfigError::new("max_calls", "must be at least 1"));
        }
        if self.period.is_zero() {
            return Err(ConfigError::new("period", "must be longer than zero"));
        }
        if self.ttl.is_zero() {
            return Err(ConfigError::new("ttl", "must be longer than zero"));
        }
        if chrono::Duration::from_std(self.ttl).is_err() {
            return Err(ConfigError::new("ttl", "is too large"));
        }
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::new("api_key", "must be provided"));
        }
        if self.base_url.cannot_be_a_base() {
            return Err(ConfigError::new(
                "base_url",
                format!("{} cannot take a path", self.base_url),
            ));
        }
        if !matches!(self.base_url.scheme(), "http" | "https") {
            return Err(ConfigError::new(
                "base_url",
                format!("unsupported scheme {}", self.base_url.scheme()),
            ));
        }
        Ok(())
    }

    /// The TTL as a calendar duration
    pub fn ttl_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX)
    }
}

//! Error taxonomy for the gateway
//!
//! Every failure a caller can see is a [`GatewayError`]; the variants map
//! one-to-one onto the categories a caller has to tell apart (bad query,
//! transport failure, vendor 4xx, vendor 5xx, cache/persistence trouble).

use thiserror::Error;

use crate::query::DateBound;

/// A query that is malformed or self-contradictory
///
/// Raised before the cache or the network is touched.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// Neither a location nor a coordinate pair was given
    #[error("either a location or a latitude,longitude pair must be provided")]
    MissingTarget,

    /// Both a location and a coordinate pair were given
    #[error("provide a location or a latitude,longitude pair, not both")]
    AmbiguousTarget,

    /// The location string is empty after trimming
    #[error("location must not be blank")]
    BlankLocation,

    /// Coordinates are not finite or fall outside the valid ranges
    #[error("invalid coordinates {lat},{lon}: latitude must be within -90..=90 and longitude within -180..=180")]
    InvalidCoordinates { lat: f64, lon: f64 },

    /// The start of the date range lies after its end
    #[error("start date {start} should not be after end date {end}")]
    DateOrder { start: DateBound, end: DateBound },
}

/// Failure to read, encode or persist cached data
#[derive(Debug, Error)]
pub enum CacheError {
    /// The entry envelope could not be encoded or decoded
    #[error("cache serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem failure in a file-backed store or snapshot
    #[error("cache I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The key-value backend refused the operation
    #[error("cache backend unavailable: {0}")]
    Backend(String),
}

/// Top-level error returned by [`crate::gateway::RequestOrchestrator`]
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The query was rejected before any cache or network access
    #[error("invalid query: {0}")]
    Validation(#[from] ValidationError),

    /// The vendor could not be reached
    #[error("network error: {0}")]
    Network(String),

    /// The vendor rejected the request (bad key, unknown location, ...)
    #[error("client error {status}: {body}")]
    Client { status: u16, body: String },

    /// The vendor failed to serve the request
    #[error("server error {status}: {body}")]
    Server { status: u16, body: String },

    /// Reading or writing cached data failed
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl GatewayError {
    /// HTTP status reported by the vendor, if the failure carried one
    pub fn status(&self) -> Option<u16> {
        match self {
            GatewayError::Client { status, .. } | GatewayError::Server { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }
}

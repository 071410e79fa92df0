//! wxgate library
//!
//! A local gateway in front of the Visual Crossing weather API: queries are
//! validated, answered from a day-keyed cache when possible, and otherwise
//! fetched through a sliding-window rate limiter and cached for later.

pub mod cache;
pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod fetch;
pub mod gateway;
pub mod query;
pub mod throttle;

pub use config::GatewayConfig;
pub use error::{CacheError, GatewayError, ValidationError};
pub use gateway::{RequestOrchestrator, ResponseSource, WeatherResponse};
pub use query::{DateBound, IncludeField, Query};

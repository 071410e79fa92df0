//! Command-line interface parsing for wxgate
//!
//! This module handles parsing of CLI arguments using clap, validating the
//! location, coordinate, date and field arguments before they are turned
//! into a [`Query`] and a [`GatewayConfig`] for the gateway core.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use reqwest::Url;
use thiserror::Error;

use crate::config::{default_base_url, GatewayConfig};
use crate::error::ValidationError;
use crate::query::{Coordinates, DateBound, IncludeField, Query};

/// Error types for CLI argument parsing
#[derive(Debug, Error)]
pub enum CliError {
    /// The location is not in `City,Country` form
    #[error("The entry you provided is not in right format: '{0}'. Schema: London,UK")]
    InvalidLocation(String),

    /// More than one location was packed into the argument
    #[error("You can provide one location at a time: '{0}'")]
    MultipleLocations(String),

    /// The coordinate pair could not be read
    #[error("Invalid coordinates: '{0}'. Both values should be numbers, schema: 51.5072,-0.1276")]
    InvalidCoordinates(String),

    /// The extra field name is not recognized
    #[error("Invalid include field: '{0}'. Valid fields: tempmax, tempmin, temp, datetime, degreedays")]
    InvalidInclude(String),

    /// Neither `--location` nor `--latlon` was given
    #[error("Either --location or --latlon must be provided")]
    MissingTarget,

    /// A numeric limit was zero
    #[error("{0} must be greater than zero")]
    ZeroLimit(&'static str),

    /// The assembled query is contradictory, e.g. a reversed date range
    #[error("{0}")]
    InvalidQuery(#[from] ValidationError),
}

/// wxgate - cached, rate-limited access to the Visual Crossing weather API
#[derive(Parser, Debug)]
#[command(name = "wxgate")]
#[command(about = "Fetch weather data through a local cache and rate limiter")]
#[command(version)]
pub struct Cli {
    /// Location to get weather data for
    ///
    /// Example: --location London,UK
    #[arg(short, long, value_parser = parse_location_arg, conflicts_with = "latlon")]
    pub location: Option<String>,

    /// Latitude and longitude instead of a named location
    ///
    /// Example: --latlon 51.5072,-0.1276
    #[arg(long, alias = "latitude", value_name = "LAT,LON", value_parser = parse_latlon_arg, allow_hyphen_values = true)]
    pub latlon: Option<Coordinates>,

    /// First date of the range: YYYY-MM-DD, YYYY-MM-DDTHH:MM:SS or Unix timestamp
    #[arg(short, long)]
    pub start: Option<DateBound>,

    /// Last date of the range: YYYY-MM-DD, YYYY-MM-DDTHH:MM:SS or Unix timestamp
    #[arg(short, long)]
    pub end: Option<DateBound>,

    /// Extra data to request; may be repeated
    ///
    /// Valid fields: tempmax, tempmin, temp, datetime, degreedays
    #[arg(short, long, value_name = "FIELD", value_parser = parse_include_arg)]
    pub include: Vec<IncludeField>,

    /// Vendor API key
    #[arg(long, env = "WXGATE_API_KEY", hide_env_values = true, default_value = "")]
    pub api_key: String,

    /// Maximum vendor calls per rate window
    #[arg(long, default_value_t = 10)]
    pub max_calls: usize,

    /// Length of the rate window in seconds
    #[arg(long, default_value_t = 10)]
    pub period_secs: u64,

    /// Days a fetched payload stays cached
    #[arg(long, default_value_t = 15)]
    pub ttl_days: u64,

    /// Override the vendor endpoint
    #[arg(long, value_name = "URL")]
    pub base_url: Option<Url>,

    /// Directory for the cache store (defaults to the user cache directory)
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Directory snapshot files are written to
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub snapshot_dir: PathBuf,

    /// List cached keys, optionally only those starting with a prefix
    #[arg(long, value_name = "PREFIX")]
    pub list_cached: Option<Option<String>>,
}

/// What the binary has been asked to do
#[derive(Debug, Clone)]
pub enum Command {
    /// Fetch weather data for a query
    Fetch(Query),
    /// Print cached keys with the given prefix
    ListCached(String),
}

/// Everything derived from CLI arguments for one run
#[derive(Debug, Clone)]
pub struct Invocation {
    pub command: Command,
    pub config: GatewayConfig,
    pub cache_dir: Option<PathBuf>,
    pub snapshot_dir: PathBuf,
}

/// Parses a `City,Country` location argument.
///
/// # Returns
/// * `Ok(String)` with the location as given
/// * `Err(CliError)` if there is no comma or more than one
pub fn parse_location_arg(s: &str) -> Result<String, CliError> {
    match s.split(',').count() {
        1 => Err(CliError::InvalidLocation(s.to_string())),
        2 if s.split(',').all(|part| !part.trim().is_empty()) => Ok(s.to_string()),
        2 => Err(CliError::InvalidLocation(s.to_string())),
        _ => Err(CliError::MultipleLocations(s.to_string())),
    }
}

/// Parses a `lat,lon` argument into coordinates.
pub fn parse_latlon_arg(s: &str) -> Result<Coordinates, CliError> {
    let parts: Vec<&str> = s.split(',').collect();
    match parts.as_slice() {
        [lat, lon] => {
            let lat = lat.trim().parse::<f64>();
            let lon = lon.trim().parse::<f64>();
            match (lat, lon) {
                (Ok(lat), Ok(lon)) => Ok(Coordinates::new(lat, lon)),
                _ => Err(CliError::InvalidCoordinates(s.to_string())),
            }
        }
        [_] => Err(CliError::InvalidCoordinates(s.to_string())),
        _ => Err(CliError::MultipleLocations(s.to_string())),
    }
}

/// Parses an include field name.
pub fn parse_include_arg(s: &str) -> Result<IncludeField, CliError> {
    IncludeField::from_name(s).ok_or_else(|| CliError::InvalidInclude(s.to_string()))
}

impl Invocation {
    /// Creates an Invocation from parsed CLI arguments.
    ///
    /// # Returns
    /// * `Ok(Invocation)` with the command and gateway settings
    /// * `Err(CliError)` if no target was given, a limit is zero or the
    ///   query does not validate
    pub fn from_cli(cli: &Cli) -> Result<Self, CliError> {
        if cli.max_calls == 0 {
            return Err(CliError::ZeroLimit("--max-calls"));
        }
        if cli.period_secs == 0 {
            return Err(CliError::ZeroLimit("--period-secs"));
        }
        if cli.ttl_days == 0 {
            return Err(CliError::ZeroLimit("--ttl-days"));
        }

        let command = match &cli.list_cached {
            Some(prefix) => Command::ListCached(prefix.clone().unwrap_or_default()),
            None => {
                let mut query = match (&cli.location, cli.latlon) {
                    (Some(location), _) => Query::for_location(location.clone()),
                    (None, Some(coordinates)) => {
                        Query::for_coordinates(coordinates.lat, coordinates.lon)
                    }
                    (None, None) => return Err(CliError::MissingTarget),
                };
                query.start = cli.start;
                query.end = cli.end;
                query.include = cli.include.iter().copied().collect();
                query.validate()?;
                Command::Fetch(query)
            }
        };

        let config = GatewayConfig {
            max_calls: cli.max_calls,
            period: Duration::from_secs(cli.period_secs),
            ttl: Duration::from_secs(cli.ttl_days.saturating_mul(24 * 60 * 60)),
            api_key: cli.api_key.clone(),
            base_url: cli.base_url.clone().unwrap_or_else(default_base_url),
        };

        Ok(Invocation {
            command,
            config,
            cache_dir: cli.cache_dir.clone(),
            snapshot_dir: cli.snapshot_dir.clone(),
        })
    }
}

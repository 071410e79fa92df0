//! Weather queries and the values they are built from
//!
//! A [`Query`] is what callers hand to the gateway. It is immutable once
//! built; the `with_*` methods consume and return it.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use thiserror::Error;

use crate::error::ValidationError;

/// Date formats accepted for range bounds, besides Unix timestamps
const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// One end of a requested date range
///
/// The vendor accepts calendar dates, local date-times and Unix timestamps
/// in the request path. Bounds compare by the UTC instant they denote, with
/// a bare date meaning midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateBound {
    /// `YYYY-MM-DD`
    Date(NaiveDate),
    /// `YYYY-MM-DDTHH:MM:SS`
    DateTime(NaiveDateTime),
    /// Seconds since the Unix epoch
    Timestamp(i64),
}

/// The string could not be read as a [`DateBound`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid date format: {0}. Valid formats are YYYY-MM-DD or YYYY-MM-DDTHH:MM:SS or Unix timestamp")]
pub struct DateParseError(pub String);

impl DateBound {
    /// The instant this bound denotes, used for ordering
    ///
    /// Timestamps outside chrono's range saturate to its limits.
    pub fn instant(&self) -> NaiveDateTime {
        match self {
            DateBound::Date(date) => date.and_time(NaiveTime::MIN),
            DateBound::DateTime(datetime) => *datetime,
            DateBound::Timestamp(secs) => match DateTime::<Utc>::from_timestamp(*secs, 0) {
                Some(datetime) => datetime.naive_utc(),
                None if *secs < 0 => NaiveDateTime::MIN,
                None => NaiveDateTime::MAX,
            },
        }
    }
}

impl FromStr for DateBound {
    type Err = DateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(date) = NaiveDate::parse_from_str(s, DATE_FORMAT) {
            return Ok(DateBound::Date(date));
        }
        if let Ok(datetime) = NaiveDateTime::parse_from_str(s, DATETIME_FORMAT) {
            return Ok(DateBound::DateTime(datetime));
        }
        s.parse::<i64>()
            .map(DateBound::Timestamp)
            .map_err(|_| DateParseError(s.to_string()))
    }
}

impl fmt::Display for DateBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DateBound::Date(date) => write!(f, "{}", date.format(DATE_FORMAT)),
            DateBound::DateTime(datetime) => write!(f, "{}", datetime.format(DATETIME_FORMAT)),
            DateBound::Timestamp(secs) => write!(f, "{}", secs),
        }
    }
}

/// A latitude/longitude pair in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.lat, self.lon)
    }
}

/// Extra fields that can be requested from the vendor
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IncludeField {
    TempMax,
    TempMin,
    Temp,
    DateTime,
    DegreeDays,
}

impl IncludeField {
    /// All fields, in the order they are listed to users
    pub const ALL: [IncludeField; 5] = [
        IncludeField::TempMax,
        IncludeField::TempMin,
        IncludeField::Temp,
        IncludeField::DateTime,
        IncludeField::DegreeDays,
    ];

    /// Name used by the vendor's `elements` parameter
    pub fn as_str(&self) -> &'static str {
        match self {
            IncludeField::TempMax => "tempmax",
            IncludeField::TempMin => "tempmin",
            IncludeField::Temp => "temp",
            IncludeField::DateTime => "datetime",
            IncludeField::DegreeDays => "degreedays",
        }
    }

    /// Parses a field name, case-insensitively
    ///
    /// `tempax` is accepted as a legacy spelling of `tempmax`.
    pub fn from_name(s: &str) -> Option<Self> {
        let s = s.trim().to_lowercase();
        if s == "tempax" {
            return Some(IncludeField::TempMax);
        }
        Self::ALL.into_iter().find(|field| field.as_str() == s)
    }
}

/// What a validated query is about
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Target<'a> {
    Place(&'a str),
    Point(Coordinates),
}

impl Target<'_> {
    /// The string used both in the vendor URL and as the cache key's location
    pub fn as_location(&self) -> String {
        match self {
            Target::Place(place) => place.trim().to_string(),
            Target::Point(coordinates) => coordinates.to_string(),
        }
    }
}

/// A request for weather data
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Query {
    pub location: Option<String>,
    pub coordinates: Option<Coordinates>,
    pub start: Option<DateBound>,
    pub end: Option<DateBound>,
    pub include: BTreeSet<IncludeField>,
}

impl Query {
    /// A query for a named place such as `London,UK`
    pub fn for_location(location: impl Into<String>) -> Self {
        Self {
            location: Some(location.into()),
            ..Default::default()
        }
    }

    /// A query for a latitude/longitude pair
    pub fn for_coordinates(lat: f64, lon: f64) -> Self {
        Self {
            coordinates: Some(Coordinates::new(lat, lon)),
            ..Default::default()
        }
    }

    pub fn with_start(mut self, start: DateBound) -> Self {
        self.start = Some(start);
        self
    }

    pub fn with_end(mut self, end: DateBound) -> Self {
        self.end = Some(end);
        self
    }

    pub fn with_include(mut self, field: IncludeField) -> Self {
        self.include.insert(field);
        self
    }

    /// Checks the query and returns what it targets
    ///
    /// Exactly one of `location` and `coordinates` must be present, and a
    /// complete date range must not run backwards.
    pub fn validate(&self) -> Result<Target<'_>, ValidationError> {
        let target = match (&self.location, &self.coordinates) {
            (None, None) => return Err(ValidationError::MissingTarget),
            (Some(_), Some(_)) => return Err(ValidationError::AmbiguousTarget),
            (Some(location), None) => {
                if location.trim().is_empty() {
                    return Err(ValidationError::BlankLocation);
                }
                Target::Place(location)
            }
            (None, Some(coordinates)) => {
                if !coordinates.is_valid() {
                    return Err(ValidationError::InvalidCoordinates {
                        lat: coordinates.lat,
                        lon: coordinates.lon,
                    });
                }
                Target::Point(*coordinates)
            }
        };

        if let (Some(start), Some(end)) = (self.start, self.end) {
            if start.instant() > end.instant() {
                return Err(ValidationError::DateOrder { start, end });
            }
        }

        Ok(target)
    }
}

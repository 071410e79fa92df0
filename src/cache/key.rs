//! Deterministic cache keys
//!
//! One key covers "today's data for this location": the normalized location
//! joined with the calendar date. Date-range bounds and extra fields are
//! not part of the key: every query for a place on a given day shares a
//! single fetch.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::query::{Query, Target};

/// Separator between the location and the date inside a key
const KEY_SEPARATOR: char = '|';

/// A cache key of the form `<normalized location>|<YYYY-MM-DD>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    location: String,
    date: NaiveDate,
}

impl CacheKey {
    /// Builds the key for a validated query target on the given day
    pub fn for_target(target: &Target<'_>, today: NaiveDate) -> Self {
        Self::new(&target.as_location(), today)
    }

    /// Validates a query and derives its key for the given day
    pub fn for_query(query: &Query, today: NaiveDate) -> Result<Self, ValidationError> {
        let target = query.validate()?;
        Ok(Self::for_target(&target, today))
    }

    /// Builds a key from a raw location string, normalizing it
    pub fn new(location: &str, date: NaiveDate) -> Self {
        Self {
            location: normalize_location(location),
            date,
        }
    }

    /// The normalized location part
    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// File name for the durable snapshot of this key: `<location>-<date>.json`
    ///
    /// Letters, digits, `,`, `.` and `-` are kept; every other byte of the
    /// location becomes `%XX`, so distinct keys never share a file.
    pub fn snapshot_file_name(&self) -> String {
        let mut name = String::with_capacity(self.location.len() + 16);
        for c in self.location.chars() {
            if c.is_alphanumeric() || matches!(c, ',' | '.' | '-') {
                name.push(c);
            } else {
                let mut buf = [0u8; 4];
                for byte in c.encode_utf8(&mut buf).bytes() {
                    name.push_str(&format!("%{:02X}", byte));
                }
            }
        }
        format!("{}-{}.json", name, self.date.format("%Y-%m-%d"))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.location,
            KEY_SEPARATOR,
            self.date.format("%Y-%m-%d")
        )
    }
}

/// Canonical form of a location string
///
/// Each comma-separated part is trimmed, runs of whitespace inside it are
/// collapsed to one space, and the result is lowercased.
pub fn normalize_location(location: &str) -> String {
    location
        .split(',')
        .map(|part| part.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect::<Vec<_>>()
        .join(",")
        .to_lowercase()
}

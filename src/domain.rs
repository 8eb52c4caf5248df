//! ==============================================================================
//! domain.rs - readings and timestamp normalization
//! ==============================================================================
//!
//! purpose:
//!     turns raw records fetched from the history api into typed readings.
//!     recvTime strings are read as utc and resolved into the display zone
//!     before anything compares or stores them.
//!
//! relationships:
//!     - used by: sth.rs (produces RawRecord), poller.rs (parse_batch)
//!     - used by: series.rs (Reading is the unit of accumulation)
//!
//! ==============================================================================

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use thiserror::Error;

/// fractional-seconds form, tried first
const FORMAT_FRACTIONAL: &str = "%Y-%m-%d %H:%M:%S%.f";
/// whole-seconds fallback
const FORMAT_SECONDS: &str = "%Y-%m-%d %H:%M:%S";

/// one fetched record before parsing
#[derive(Clone, Debug, PartialEq)]
pub struct RawRecord {
    /// measurement as reported upstream (attrValue)
    pub value: String,
    /// receive time as reported upstream (recvTime)
    pub recv_time: String,
}

impl RawRecord {
    pub fn new(value: impl Into<String>, recv_time: impl Into<String>) -> Self {
        Self { value: value.into(), recv_time: recv_time.into() }
    }
}

/// one (timestamp, value) sample from a sensor
#[derive(Clone, Debug, PartialEq)]
pub struct Reading {
    pub timestamp: DateTime<Tz>,
    pub value: f64,
}

#[derive(Debug, Error, PartialEq)]
pub enum SeriesError {
    #[error("invalid timestamp {0:?}: expected YYYY-MM-DD HH:MM:SS[.ffffff]")]
    InvalidTimestamp(String),
    #[error("invalid value {0:?}: not a number")]
    InvalidValue(String),
}

/// parse a utc recvTime string and resolve it in `tz`
///
/// `2024-01-01T12:00:00.000Z` is accepted too: the `T` separator and the
/// trailing `Z` are normalized away before parsing.
pub fn parse_timestamp(raw: &str, tz: Tz) -> Result<DateTime<Tz>, SeriesError> {
    let normalized = raw.trim().replace('T', " ").replace('Z', "");

    let naive = NaiveDateTime::parse_from_str(&normalized, FORMAT_FRACTIONAL)
        .or_else(|_| NaiveDateTime::parse_from_str(&normalized, FORMAT_SECONDS))
        .map_err(|_| SeriesError::InvalidTimestamp(raw.to_string()))?;

    Ok(Utc.from_utc_datetime(&naive).with_timezone(&tz))
}

/// parse a whole fetched batch; the first bad record fails all of it
pub fn parse_batch(records: &[RawRecord], tz: Tz) -> Result<Vec<Reading>, SeriesError> {
    records
        .iter()
        .map(|r| {
            let value = r
                .value
                .trim()
                .parse::<f64>()
                .map_err(|_| SeriesError::InvalidValue(r.value.clone()))?;
            let timestamp = parse_timestamp(&r.recv_time, tz)?;
            Ok(Reading { timestamp, value })
        })
        .collect()
}

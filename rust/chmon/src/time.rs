//! Time window parsing and the end-of-minute widening applied to zoom selections.

use crate::error::{Result, ServiceError};
use chrono::{DateTime, NaiveDateTime, Timelike, Utc};

/// Literal format ClickHouse accepts for `DateTime` parameters.
pub const STORE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeWindow {
    /// Parses optional `start`/`end` request values. Blank values count as absent.
    pub fn parse(start: Option<&str>, end: Option<&str>) -> Result<Self> {
        Ok(Self {
            start: parse_optional(start)?,
            end: parse_optional(end)?,
        })
    }

    /// The end bound to compile into the statement, after widening a
    /// single-instant selection to the whole minute.
    pub fn effective_end(&self) -> Option<DateTime<Utc>> {
        normalize_end(self.start, self.end)
    }
}

/// Widens `end` to second 59 of its minute when `start` and `end` are the
/// same instant; any other combination returns `end` untouched.
pub fn normalize_end(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    match (start, end) {
        (Some(start), Some(end)) if start == end => Some(
            end.with_nanosecond(0)
                .and_then(|ts| ts.with_second(59))
                .unwrap_or(end),
        ),
        _ => end,
    }
}

pub fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.format(STORE_TIMESTAMP_FORMAT).to_string()
}

fn parse_optional(raw: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => parse_datetime(value).map(Some),
    }
}

pub fn parse_datetime(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc));
        }
    }
    Err(ServiceError::InvalidRequest(format!(
        "invalid time literal '{value}'"
    )))
}

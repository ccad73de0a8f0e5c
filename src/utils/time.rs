// src/utils/time.rs

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

use crate::error::AppError;

/// Which end of a date range a date-only value stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    Start,
    End,
}

/// Parses an RFC 3339 timestamp or a bare `YYYY-MM-DD` date. A bare date
/// means the start of that day (UTC) for `Bound::Start` and its last
/// instant for `Bound::End`.
pub fn parse_iso_bound(name: &str, value: &str, bound: Bound) -> Result<DateTime<Utc>, AppError> {
    let value = value.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }

    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| {
        AppError::BadRequest(format!("{name} must be an ISO 8601 date or timestamp"))
    })?;

    let time = match bound {
        Bound::Start => NaiveTime::MIN,
        Bound::End => NaiveTime::from_hms_milli_opt(23, 59, 59, 999).unwrap_or(NaiveTime::MIN),
    };
    Ok(date.and_time(time).and_utc())
}

//! Date helpers: lenient parsing with a process-wide memo, unix timestamp
//! rendering in a fixed offset, and midnight-UTC timestamps.
//!
//! Strings without an offset are interpreted as UTC.

use std::{
    collections::HashMap,
    sync::{LazyLock, Mutex, MutexGuard, PoisonError},
};

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime};
use thiserror::Error;
use tracing::trace;

#[derive(Debug, Error)]
pub enum DateError {
    #[error("unrecognized date string: '{0}'")]
    Unrecognized(String),
    #[error("invalid utc offset: {0} seconds")]
    InvalidOffset(i32),
    #[error("timestamp out of range: {0}")]
    TimestampOutOfRange(i64),
}

/// Days between 0001-01-01 (day 1) and 1970-01-01 in the proleptic Gregorian calendar.
const UNIX_EPOCH_DAYS_FROM_CE: i64 = 719_163;
const SECONDS_PER_DAY: i64 = 86_400;

const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%z",
    "%Y-%m-%d %H:%M:%S%.f%z",
];

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%B %d, %Y",
    "%d %B %Y",
];

static PARSED_DATES: LazyLock<DateCache> = LazyLock::new(DateCache::default);

/// Memo of previously parsed date strings, keyed by the exact input.
///
/// Failed parses are not remembered.
#[derive(Debug, Default)]
pub struct DateCache {
    entries: Mutex<HashMap<String, DateTime<FixedOffset>>>,
}

impl DateCache {
    pub fn parse(&self, input: &str) -> Result<DateTime<FixedOffset>, DateError> {
        if let Some(hit) = self.lock().get(input) {
            trace!(input, "date cache hit");
            return Ok(*hit);
        }
        let parsed = parse_uncached(input)?;
        self.lock().insert(input.to_string(), parsed);
        Ok(parsed)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, DateTime<FixedOffset>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The process-wide cache behind [`parse_date`].
pub fn parsed_dates() -> &'static DateCache {
    &PARSED_DATES
}

/// Parse a date string, serving repeats from the process-wide cache.
pub fn parse_date(input: &str) -> Result<DateTime<FixedOffset>, DateError> {
    PARSED_DATES.parse(input)
}

fn parse_uncached(input: &str) -> Result<DateTime<FixedOffset>, DateError> {
    let s = input.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt);
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Ok(dt);
    }
    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Ok(dt);
        }
    }
    for fmt in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(naive.and_utc().fixed_offset());
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(date.and_time(chrono::NaiveTime::MIN).and_utc().fixed_offset());
        }
    }

    Err(DateError::Unrecognized(input.to_string()))
}

/// Express the unix timestamp `ts` in the fixed offset `offset_secs` east of UTC.
pub fn parse_utc_timestamp(ts: i64, offset_secs: i32) -> Result<DateTime<FixedOffset>, DateError> {
    let tz = FixedOffset::east_opt(offset_secs).ok_or(DateError::InvalidOffset(offset_secs))?;
    let utc = DateTime::from_timestamp(ts, 0).ok_or(DateError::TimestampOutOfRange(ts))?;
    Ok(utc.with_timezone(&tz))
}

/// Unix timestamp of midnight UTC on the calendar date of `date`.
///
/// Time of day and any offset carried by `date` are ignored.
pub fn datetime_to_timestamp(date: &impl Datelike) -> i64 {
    (i64::from(date.num_days_from_ce()) - UNIX_EPOCH_DAYS_FROM_CE) * SECONDS_PER_DAY
}

pub fn date_string_to_timestamp(input: &str) -> Result<i64, DateError> {
    let parsed = parse_date(input)?;
    Ok(datetime_to_timestamp(&parsed))
}

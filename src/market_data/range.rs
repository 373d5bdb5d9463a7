//! Requested date windows.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};

use crate::error::{ServiceError, ServiceResult};

/// Inclusive time window for a series request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> ServiceResult<Self> {
        if start > end {
            return Err(ServiceError::invalid(format!(
                "start {} is after end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Parse request bounds. Accepts `YYYY-MM-DD` or integer epoch seconds.
    /// A calendar end date covers the whole day.
    pub fn parse(start: &str, end: &str) -> ServiceResult<Self> {
        let start = parse_bound(start, false)?;
        let end = parse_bound(end, true)?;
        Self::new(start, end)
    }

    /// The `days` calendar days up to and including `end`.
    pub fn trailing_days(end: NaiveDate, days: i64) -> Self {
        let start = end - Duration::days(days);
        Self {
            start: start.and_time(NaiveTime::MIN).and_utc(),
            end: end_of_day(end),
        }
    }

    pub fn start_ts(&self) -> i64 {
        self.start.timestamp()
    }

    pub fn end_ts(&self) -> i64 {
        self.end.timestamp()
    }

    pub fn contains(&self, other: &DateRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn contains_ts(&self, ts: i64) -> bool {
        self.start_ts() <= ts && ts <= self.end_ts()
    }
}

fn end_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_hms_opt(23, 59, 59)
        .map(|dt| dt.and_utc())
        .unwrap_or_else(|| date.and_time(NaiveTime::MIN).and_utc())
}

fn parse_bound(raw: &str, end_of_range: bool) -> ServiceResult<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(if end_of_range {
            end_of_day(date)
        } else {
            date.and_time(NaiveTime::MIN).and_utc()
        });
    }
    if let Ok(secs) = raw.parse::<i64>() {
        if let Some(ts) = Utc.timestamp_opt(secs, 0).single() {
            return Ok(ts);
        }
    }
    Err(ServiceError::invalid(format!("invalid date: {:?}", raw)))
}

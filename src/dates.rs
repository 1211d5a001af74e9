//! Local-calendar date helpers.
//!
//! Every date that is compared against booked dates or used as a lookup key
//! goes through `to_local_date_key` / `parse_local_date_key`. Keys are built
//! from the calendar components of the date itself, never from a UTC
//! conversion, so a day picked late in the evening stays the same day.

use chrono::{DateTime, Datelike, Local, NaiveDate, TimeZone};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DateKeyError {
    #[error("expected YYYY-MM-DD, got {0:?}")]
    Format(String),
    #[error("{0} is not a calendar date")]
    OutOfRange(String),
}

/// `YYYY-MM-DD` from the date's own year/month/day.
pub fn to_local_date_key(date: NaiveDate) -> String {
    format!("{:04}-{:02}-{:02}", date.year(), date.month(), date.day())
}

/// Key for a zoned instant, using the calendar day in that instant's zone.
pub fn local_date_key<Tz: TimeZone>(at: &DateTime<Tz>) -> String {
    to_local_date_key(at.date_naive())
}

pub fn parse_local_date_key(s: &str) -> Result<NaiveDate, DateKeyError> {
    let bytes = s.as_bytes();
    let shape_ok = bytes.len() == 10
        && bytes[4] == b'-'
        && bytes[7] == b'-'
        && bytes.iter().enumerate().all(|(i, b)| i == 4 || i == 7 || b.is_ascii_digit());
    if !shape_ok {
        return Err(DateKeyError::Format(s.to_owned()));
    }

    let num = |r: std::ops::Range<usize>| -> Result<u32, DateKeyError> {
        s[r].parse::<u32>().map_err(|_| DateKeyError::Format(s.to_owned()))
    };
    let (y, m, d) = (num(0..4)?, num(5..7)?, num(8..10)?);

    NaiveDate::from_ymd_opt(y as i32, m, d).ok_or_else(|| DateKeyError::OutOfRange(s.to_owned()))
}

/// Nights between check-in and check-out. Zero when either side is missing.
pub fn nights_between(check_in: Option<NaiveDate>, check_out: Option<NaiveDate>) -> i64 {
    match (check_in, check_out) {
        (Some(a), Some(b)) => (b - a).num_days().max(0),
        _ => 0,
    }
}

/// `a` falls on an earlier local calendar day than `b`.
pub fn is_strictly_before<A: TimeZone, B: TimeZone>(a: &DateTime<A>, b: &DateTime<B>) -> bool {
    a.date_naive() < b.date_naive()
}

pub fn is_same_day<A: TimeZone, B: TimeZone>(a: &DateTime<A>, b: &DateTime<B>) -> bool {
    a.date_naive() == b.date_naive()
}

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

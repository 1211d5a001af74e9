//! Booked-date data for one villa over a two-month window.

pub mod gate;

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::ops::Bound::Excluded;

use crate::calendar::YearMonth;
use crate::dates::parse_local_date_key;

// ─── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AvailabilityError {
    #[error("network error: {0}")]
    Network(String),
    #[error("villa {0} not found")]
    NotFound(String),
    #[error("unexpected response: {0}")]
    Decode(String),
}

// ─── BookedDateSet ────────────────────────────────────────────────────────────

/// Dates a villa is already reserved on, for one query window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookedDateSet {
    dates: BTreeSet<NaiveDate>,
}

impl BookedDateSet {
    /// Build from `YYYY-MM-DD` keys. Keys that do not parse are dropped.
    pub fn from_keys<'a>(keys: impl IntoIterator<Item = &'a str>) -> Self {
        let dates = keys.into_iter().filter_map(|k| match parse_local_date_key(k) {
            Ok(d)  => Some(d),
            Err(e) => { tracing::warn!("ignoring booked date: {e}"); None }
        }).collect();
        Self { dates }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.dates.contains(&date)
    }

    /// Any booked date in the open interval `(from, to)`.
    pub fn any_strictly_between(&self, from: NaiveDate, to: NaiveDate) -> bool {
        from < to && self.dates.range((Excluded(from), Excluded(to))).next().is_some()
    }

    pub fn len(&self)      -> usize { self.dates.len() }
    pub fn is_empty(&self) -> bool  { self.dates.is_empty() }

    pub fn iter(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.dates.iter().copied()
    }

    fn union(mut self, other: Self) -> Self {
        self.dates.extend(other.dates);
        self
    }
}

// ─── Source ───────────────────────────────────────────────────────────────────

/// The booked-dates query, injected so tests can substitute a fake.
#[async_trait]
pub trait BookedDatesSource: Send + Sync {
    /// Booked `YYYY-MM-DD` keys for a villa in one calendar month.
    async fn booked_dates(
        &self, villa_id: &str, year: i32, month: u32,
    ) -> Result<Vec<String>, AvailabilityError>;
}

/// Booked dates for `window` and the month after it, unioned.
pub async fn load_booked_dates(
    source:   &dyn BookedDatesSource,
    villa_id: &str,
    window:   YearMonth,
) -> Result<BookedDateSet, AvailabilityError> {
    let next = window.next();
    let (current, following) = tokio::try_join!(
        source.booked_dates(villa_id, window.year(), window.month()),
        source.booked_dates(villa_id, next.year(), next.month()),
    )?;

    let current   = BookedDateSet::from_keys(current.iter().map(String::as_str));
    let following = BookedDateSet::from_keys(following.iter().map(String::as_str));
    Ok(current.union(following))
}

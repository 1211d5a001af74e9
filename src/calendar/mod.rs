use chrono::{Datelike, Days, Months, NaiveDate};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::availability::BookedDateSet;
use crate::dates::to_local_date_key;
use crate::selection::Selection;

/// Cells per month grid: six full weeks, so the layout height never changes.
pub const GRID_CELLS: usize = 42;

// ─── Month arithmetic ─────────────────────────────────────────────────────────

/// A calendar month, stored as its first day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct YearMonth(NaiveDate);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("expected YYYY-MM, got {0:?}")]
pub struct MonthParseError(String);

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(Self)
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self(date.with_day(1).unwrap_or(date))
    }

    pub fn year(self)  -> i32 { self.0.year() }
    pub fn month(self) -> u32 { self.0.month() }
    pub fn first_day(self) -> NaiveDate { self.0 }

    pub fn next(self) -> Self { Self(self.0 + Months::new(1)) }
    pub fn prev(self) -> Self { Self(self.0 - Months::new(1)) }

    pub fn days_in_month(self) -> u32 {
        days_in_month(self.year(), self.month())
    }

    pub fn contains(self, date: NaiveDate) -> bool {
        date.year() == self.year() && date.month() == self.month()
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year(), self.month())
    }
}

impl FromStr for YearMonth {
    type Err = MonthParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || MonthParseError(s.to_owned());
        let (y, m) = s.split_once('-').ok_or_else(err)?;
        if y.len() != 4 || m.len() != 2 {
            return Err(err());
        }
        let year: i32 = y.parse().map_err(|_| err())?;
        let month: u32 = m.parse().map_err(|_| err())?;
        YearMonth::new(year, month).ok_or_else(err)
    }
}

/// 0 for an invalid month.
pub fn days_in_month(year: i32, month: u32) -> u32 {
    let Some(first) = NaiveDate::from_ymd_opt(year, month, 1) else { return 0 };
    first.checked_add_months(Months::new(1))
        .map(|next| (next - first).num_days() as u32)
        .unwrap_or(0)
}

pub fn month_name(m: u32) -> &'static str {
    match m {
        1=>"January", 2=>"February", 3=>"March",    4=>"April",
        5=>"May",     6=>"June",     7=>"July",      8=>"August",
        9=>"September",10=>"October",11=>"November",12=>"December",
        _=>"???",
    }
}

// ─── Grid ─────────────────────────────────────────────────────────────────────

/// One rendered grid cell. Derived fresh for every frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarDay {
    pub date:             NaiveDate,
    pub date_key:         String,
    pub is_current_month: bool,
    pub is_today:         bool,
    pub is_past:          bool,
    pub is_booked:        bool,
    pub is_selected:      bool,
    pub is_in_range:      bool,
    pub is_check_in:      bool,
    pub is_check_out:     bool,
}

impl CalendarDay {
    /// Whether a click on this cell may touch the selection at all.
    pub fn is_selectable(&self) -> bool {
        self.is_current_month && !self.is_past && !self.is_booked
    }
}

/// Build the Sunday-first 6×7 grid for `month`.
///
/// With only a check-in chosen, a `hovered` date after it is treated as a
/// provisional check-out for highlighting. The selection itself is untouched.
pub fn build_month_grid(
    month:    YearMonth,
    booked:   &BookedDateSet,
    selection: &Selection,
    hovered:  Option<NaiveDate>,
    today:    NaiveDate,
) -> [CalendarDay; GRID_CELLS] {
    let first  = month.first_day();
    let offset = first.weekday().num_days_from_sunday() as u64;
    let start  = first - Days::new(offset);

    let check_in  = selection.check_in();
    let check_out = selection.check_out();
    let range_end = match (check_in, check_out, hovered) {
        (Some(_), Some(out), _)             => Some(out),
        (Some(cin), None, Some(h)) if h > cin => Some(h),
        _                                    => None,
    };

    std::array::from_fn(|i| {
        let date         = start + Days::new(i as u64);
        let is_check_in  = check_in == Some(date);
        let is_check_out = check_out == Some(date);
        let is_in_range  = match (check_in, range_end) {
            (Some(a), Some(b)) => a <= date && date <= b,
            _                  => false,
        };
        CalendarDay {
            date,
            date_key:         to_local_date_key(date),
            is_current_month: month.contains(date),
            is_today:         date == today,
            is_past:          date < today,
            is_booked:        booked.contains(date),
            is_selected:      is_check_in || is_check_out,
            is_in_range,
            is_check_in,
            is_check_out,
        }
    })
}

/// Weeks of a grid, for row-wise rendering.
pub fn weeks(grid: &[CalendarDay; GRID_CELLS]) -> impl Iterator<Item = &[CalendarDay]> {
    grid.chunks(7)
}

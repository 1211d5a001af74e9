//! Check-in / check-out selection and the two-click protocol.

use chrono::NaiveDate;
use serde::Serialize;

use crate::availability::BookedDateSet;
use crate::calendar::CalendarDay;
use crate::dates::{nights_between, to_local_date_key};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionState {
    Empty,
    PartialStart,
    Complete,
}

/// What a click did. Only used for logging and the status line; no click is
/// ever an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickOutcome {
    /// Past, booked or outside the displayed month.
    Ignored,
    Started,
    /// Clicked on or before the current check-in, or after a complete range.
    Restarted,
    Completed,
    /// The range would cross a booked night; the click became a new check-in.
    RejectedOverlap,
}

/// A confirmed stay, ready to be submitted as a booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stay {
    pub check_in:  String,
    pub check_out: String,
    pub nights:    i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    check_in:  Option<NaiveDate>,
    check_out: Option<NaiveDate>,
}

impl Selection {
    /// Pre-seed from outside input. Past dates and a check-out that is not
    /// after the check-in are dropped.
    pub fn seeded(check_in: Option<NaiveDate>, check_out: Option<NaiveDate>, today: NaiveDate) -> Self {
        let check_in = check_in.filter(|d| *d >= today);
        let check_out = match check_in {
            Some(cin) => check_out.filter(|d| *d > cin),
            None      => None,
        };
        Self { check_in, check_out }
    }

    pub fn check_in(&self)  -> Option<NaiveDate> { self.check_in }
    pub fn check_out(&self) -> Option<NaiveDate> { self.check_out }

    pub fn state(&self) -> SelectionState {
        match (self.check_in, self.check_out) {
            (Some(_), Some(_)) => SelectionState::Complete,
            (Some(_), None)    => SelectionState::PartialStart,
            _                  => SelectionState::Empty,
        }
    }

    pub fn nights(&self) -> i64 {
        nights_between(self.check_in, self.check_out)
    }

    pub fn click(&mut self, day: &CalendarDay, booked: &BookedDateSet) -> ClickOutcome {
        if !day.is_selectable() {
            return ClickOutcome::Ignored;
        }
        let d = day.date;

        let outcome = match (self.state(), self.check_in) {
            (SelectionState::PartialStart, Some(c)) if d > c => {
                if booked.any_strictly_between(c, d) {
                    self.restart(d);
                    ClickOutcome::RejectedOverlap
                } else {
                    self.check_out = Some(d);
                    ClickOutcome::Completed
                }
            }
            (SelectionState::Empty, _) => {
                self.restart(d);
                ClickOutcome::Started
            }
            _ => {
                self.restart(d);
                ClickOutcome::Restarted
            }
        };
        tracing::debug!("click {} -> {outcome:?}", day.date_key);
        outcome
    }

    pub fn clear(&mut self) {
        self.check_in  = None;
        self.check_out = None;
    }

    /// Hand out the stay and reset. Only a complete range confirms.
    pub fn confirm(&mut self) -> Option<Stay> {
        let (Some(cin), Some(cout)) = (self.check_in, self.check_out) else {
            return None;
        };
        let stay = Stay {
            check_in:  to_local_date_key(cin),
            check_out: to_local_date_key(cout),
            nights:    self.nights(),
        };
        self.clear();
        Some(stay)
    }

    /// Re-check the selection against freshly loaded booked dates.
    /// A booked endpoint drops the whole selection; a booked night inside
    /// the span drops only the check-out. Returns true if anything changed.
    pub fn reconcile(&mut self, booked: &BookedDateSet) -> bool {
        let before = self.clone();
        let endpoint_booked = [self.check_in, self.check_out]
            .into_iter()
            .flatten()
            .any(|d| booked.contains(d));

        if endpoint_booked {
            self.clear();
        } else if let (Some(cin), Some(cout)) = (self.check_in, self.check_out) {
            if booked.any_strictly_between(cin, cout) {
                self.check_out = None;
            }
        }
        *self != before
    }

    fn restart(&mut self, d: NaiveDate) {
        self.check_in  = Some(d);
        self.check_out = None;
    }
}

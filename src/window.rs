//! Time windows: the precise second-level filter and the coarse day bounds
//! handed to day-granularity mail searches.

use chrono::{DateTime, Days, NaiveDate, Utc};

use crate::error::{FetchError, Result};

/// `true` iff `since <= received_at <= until`.
pub fn in_window(received_at: DateTime<Utc>, since: DateTime<Utc>, until: DateTime<Utc>) -> bool {
    since <= received_at && received_at <= until
}

/// An inclusive UTC interval `[since, until]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    since: DateTime<Utc>,
    until: DateTime<Utc>,
}

impl TimeWindow {
    /// Build a window, rejecting reversed bounds.
    pub fn new(since: DateTime<Utc>, until: DateTime<Utc>) -> Result<Self> {
        if since > until {
            return Err(FetchError::InvalidWindow { since, until });
        }
        Ok(Self { since, until })
    }

    pub fn since(&self) -> DateTime<Utc> {
        self.since
    }

    pub fn until(&self) -> DateTime<Utc> {
        self.until
    }

    pub fn contains(&self, received_at: DateTime<Utc>) -> bool {
        in_window(received_at, self.since, self.until)
    }

    /// `(since_day, before_day)`: the first day to search (inclusive) and the
    /// day after `until` (exclusive). Every instant in the window falls on a
    /// day in `since_day..before_day`.
    pub fn day_bounds(&self) -> (NaiveDate, NaiveDate) {
        let since_day = self.since.date_naive();
        let until_day = self.until.date_naive();
        let before_day = until_day.checked_add_days(Days::new(1)).unwrap_or(until_day);
        (since_day, before_day)
    }
}

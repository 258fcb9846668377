//! Billing periods and time windows

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{EngineError, EngineResult};

/// A billing month (calendar year + month)
///
/// Every tariff resolution and obligation evaluation is keyed by a billing
/// month; the type validates the month number once at construction so the
/// derived calendar helpers cannot fail.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct BillingMonth {
    year: i32,
    month: u32,
}

impl BillingMonth {
    /// Create a billing month, validating `month` is 1..=12
    pub fn new(year: i32, month: u32) -> EngineResult<Self> {
        if !(1..=12).contains(&month) {
            return Err(EngineError::Validation(format!(
                "billing month must be 1..=12, got {month}"
            )));
        }
        Ok(Self { year, month })
    }

    /// The calendar year
    pub fn year(&self) -> i32 {
        self.year
    }

    /// The month number (1..=12)
    pub fn month(&self) -> u32 {
        self.month
    }

    /// First day of the month
    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).expect("validated month")
    }

    /// The following billing month
    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    /// Last day of the month
    pub fn last_day(&self) -> NaiveDate {
        self.next().first_day().pred_opt().expect("valid date")
    }

    /// The month as a UTC time window [first day 00:00, next month 00:00)
    pub fn utc_window(&self) -> TimeWindow {
        let start = self
            .first_day()
            .and_hms_opt(0, 0, 0)
            .expect("valid time")
            .and_utc();
        let end = self
            .next()
            .first_day()
            .and_hms_opt(0, 0, 0)
            .expect("valid time")
            .and_utc();
        TimeWindow::bounded(start, end)
    }

    /// The 1-based contract year this month falls in, counted from `anchor`
    ///
    /// Months before the anchor date are a validation error: there is no
    /// "contract year zero" to price against.
    pub fn contract_year(&self, anchor: NaiveDate) -> EngineResult<u32> {
        let day = self.first_day();
        let mut years = day.year() - anchor.year();
        if (day.month(), day.day()) < (anchor.month(), anchor.day()) {
            years -= 1;
        }
        if years < 0 {
            return Err(EngineError::Validation(format!(
                "billing month {self} precedes the escalation anchor {anchor}"
            )));
        }
        Ok(years as u32 + 1)
    }
}

impl fmt::Display for BillingMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// A half-open time window with an optional end (ongoing occurrences)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Start of the window (inclusive)
    pub start: DateTime<Utc>,
    /// End of the window (exclusive); `None` means still ongoing
    pub end: Option<DateTime<Utc>>,
}

impl TimeWindow {
    /// A window with both bounds
    pub fn bounded(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    /// A window that has started and not yet ended
    pub fn open_ended(start: DateTime<Utc>) -> Self {
        Self { start, end: None }
    }

    /// Whether this window overlaps another
    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        let self_ends_after = match self.end {
            Some(end) => end > other.start,
            None => true,
        };
        let other_ends_after = match other.end {
            Some(end) => end > self.start,
            None => true,
        };
        self_ends_after && other_ends_after
    }
}

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use super::CalendarDate;

/// Earliest date seen across all completed scans. Unset until the first
/// scan that finds any open day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark(Option<CalendarDate>);

impl Watermark {
    pub fn unset() -> Self {
        Watermark(None)
    }

    pub fn at(date: CalendarDate) -> Self {
        Watermark(Some(date))
    }

    pub fn get(&self) -> Option<CalendarDate> {
        self.0
    }

    pub fn is_set(&self) -> bool {
        self.0.is_some()
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(date) => write!(f, "{}", date),
            None => f.write_str("unset"),
        }
    }
}

/// Outcome of one scan, consumed within the cycle that produced it.
#[derive(Debug)]
pub enum ScanResult {
    Dates(BTreeSet<CalendarDate>),
    Empty,
}

impl ScanResult {
    pub fn from_dates(dates: BTreeSet<CalendarDate>) -> Self {
        if dates.is_empty() {
            ScanResult::Empty
        } else {
            ScanResult::Dates(dates)
        }
    }

    pub fn earliest(&self) -> Option<CalendarDate> {
        match self {
            ScanResult::Dates(dates) => dates.first().copied(),
            ScanResult::Empty => None,
        }
    }
}

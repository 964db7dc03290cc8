use chrono::Month;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

use crate::models::CalendarDate;
use crate::scraper::{BrowserSession, Locator};
use crate::utils::error::{AppError, Result};

/// Hard bound on calendar paging, in case the widget never disables "next".
pub const MAX_MONTHS: usize = 24;

pub mod selectors {
    pub const HEADER: &str = ".ui-datepicker-title";
    pub const DAY_LINKS: &str = ".ui-datepicker-calendar a";
    pub const NEXT_BUTTON: &str = ".ui-datepicker-next";
    pub const DISABLED_CLASS: &str = "ui-state-disabled";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extraction {
    pub dates: BTreeSet<CalendarDate>,
    pub months_scanned: usize,
    /// Paging stopped at [`MAX_MONTHS`] rather than at a disabled "next".
    pub hit_cap: bool,
}

pub struct CalendarExtractor {
    page_turn_delay: Duration,
    max_months: usize,
    header_regex: Regex,
}

impl CalendarExtractor {
    pub fn new(page_turn_delay: Duration) -> Self {
        Self {
            page_turn_delay,
            max_months: MAX_MONTHS,
            header_regex: Regex::new(r"^\s*([A-Za-z]+)\.?\s+(\d{4})\s*$").expect("static regex"),
        }
    }

    /// Walks the open widget month by month, collecting every clickable day.
    pub async fn extract(&self, session: &dyn BrowserSession) -> Result<Extraction> {
        let header_locator = Locator::css(selectors::HEADER);
        let days_locator = Locator::css(selectors::DAY_LINKS);
        let next_locator = Locator::css(selectors::NEXT_BUTTON);

        let mut dates = BTreeSet::new();
        let mut months_scanned = 0;
        let mut reached_end = false;

        while months_scanned < self.max_months {
            let header = session
                .find_element(&header_locator)
                .await?
                .ok_or_else(|| AppError::ExtractionFailure(format!("calendar header {} not found", selectors::HEADER)))?;
            let (year, month) = self.parse_header(&session.read_text(&header).await?)?;

            let mut found = 0;
            for link in session.find_elements(&days_locator).await? {
                let text = session.read_text(&link).await?;
                dates.insert(day_in_month(year, month, &text)?);
                found += 1;
            }
            months_scanned += 1;
            tracing::debug!(year, month, open_days = found, "calendar month scanned");

            let next = session
                .find_element(&next_locator)
                .await?
                .ok_or_else(|| AppError::ExtractionFailure(format!("next-month control {} not found", selectors::NEXT_BUTTON)))?;
            let class = session.read_attribute(&next, "class").await?.unwrap_or_default();
            if class.split_whitespace().any(|c| c == selectors::DISABLED_CLASS) {
                reached_end = true;
                break;
            }

            if months_scanned < self.max_months {
                session.force_click(&next).await?;
                tokio::time::sleep(self.page_turn_delay).await;
            }
        }

        if !reached_end {
            tracing::debug!(months_scanned, "calendar paging stopped at the month cap");
        }

        Ok(Extraction {
            dates,
            months_scanned,
            hit_cap: !reached_end,
        })
    }

    /// Parses a widget title such as `"March 2027"` into (year, month).
    pub fn parse_header(&self, text: &str) -> Result<(i32, u32)> {
        let captures = self
            .header_regex
            .captures(text)
            .ok_or_else(|| AppError::ExtractionFailure(format!("unexpected calendar header '{}'", text.trim())))?;

        let month: Month = captures[1]
            .parse()
            .map_err(|_| AppError::ExtractionFailure(format!("unknown month name '{}'", &captures[1])))?;
        let year: i32 = captures[2]
            .parse()
            .map_err(|_| AppError::ExtractionFailure(format!("bad year in header '{}'", text.trim())))?;

        Ok((year, month.number_from_month()))
    }
}

fn day_in_month(year: i32, month: u32, text: &str) -> Result<CalendarDate> {
    let day: u32 = text
        .trim()
        .parse()
        .map_err(|_| AppError::ExtractionFailure(format!("day link '{}' is not a number", text.trim())))?;
    CalendarDate::from_ymd(year, month, day)
        .ok_or_else(|| AppError::ExtractionFailure(format!("{}-{:02}-{:02} is not a valid date", year, month, day)))
}

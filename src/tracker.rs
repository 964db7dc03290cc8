use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::models::{CalendarDate, Watermark};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    /// No selectable day anywhere in the calendar.
    NoneOpen,
    /// Strictly earlier than anything seen before.
    Improved(CalendarDate),
    NotImproved,
}

/// Decide whether this scan beat the watermark.
///
/// Equal dates are not an improvement, so a stable calendar never alerts
/// twice for the same day.
pub fn evaluate(candidates: &BTreeSet<CalendarDate>, watermark: Watermark) -> (Watermark, Verdict) {
    let Some(&earliest) = candidates.first() else {
        return (watermark, Verdict::NoneOpen);
    };

    match watermark.get() {
        Some(best) if earliest >= best => (watermark, Verdict::NotImproved),
        _ => (Watermark::at(earliest), Verdict::Improved(earliest)),
    }
}

//! Period resolution
//!
//! Turns a plan's `Period` into an inclusive date span. Relative periods are
//! anchored on a reference date; a month named without a year picks the most
//! recent year the dataset has that month in.

use crate::models::Period;
use chrono::{Datelike, Duration, NaiveDate};
use std::collections::BTreeSet;

const MONTH_NAMES: [&str; 12] = [
    "January", "February", "March", "April", "May", "June", "July", "August",
    "September", "October", "November", "December",
];

pub fn month_name(month: u32) -> &'static str {
    MONTH_NAMES
        .get(month.saturating_sub(1) as usize)
        .copied()
        .unwrap_or("Unknown")
}

/// First and last day of a calendar month.
pub fn month_bounds(year: i32, month: u32) -> Option<(NaiveDate, NaiveDate)> {
    let start = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    Some((start, next - Duration::days(1)))
}

fn year_bounds(year: i32) -> Option<(NaiveDate, NaiveDate)> {
    Some((
        NaiveDate::from_ymd_opt(year, 1, 1)?,
        NaiveDate::from_ymd_opt(year, 12, 31)?,
    ))
}

/// Spoken form of a date, e.g. "January 5, 2024".
pub fn spoken_date(date: NaiveDate) -> String {
    format!("{} {}, {}", month_name(date.month()), date.day(), date.year())
}

/// Reference date plus the (year, month) pairs present in a dataset.
#[derive(Debug, Clone)]
pub struct Calendar {
    reference: NaiveDate,
    year_months: BTreeSet<(i32, u32)>,
}

impl Calendar {
    pub fn new(reference: NaiveDate, dates: impl IntoIterator<Item = NaiveDate>) -> Self {
        Self {
            reference,
            year_months: dates.into_iter().map(|d| (d.year(), d.month())).collect(),
        }
    }

    pub fn reference(&self) -> NaiveDate {
        self.reference
    }

    /// Year a bare month name refers to.
    pub fn year_for_month(&self, month: u32) -> i32 {
        self.year_months
            .iter()
            .rev()
            .find(|(_, m)| *m == month)
            .or_else(|| self.year_months.iter().next_back())
            .map(|(y, _)| *y)
            .unwrap_or_else(|| self.reference.year())
    }

    /// Number of calendar months the dataset spans, first to last inclusive.
    pub fn dataset_months(&self) -> usize {
        match (self.year_months.iter().next(), self.year_months.iter().next_back()) {
            (Some(first), Some(last)) => months_between(*first, *last),
            _ => 0,
        }
    }

    /// Inclusive span of a period. `None` only for dates outside chrono's range.
    pub fn span(&self, period: &Period) -> Option<(NaiveDate, NaiveDate)> {
        let today = self.reference;
        match period {
            Period::Month { month, year } => {
                let year = year.unwrap_or_else(|| self.year_for_month(*month));
                month_bounds(year, *month)
            }
            Period::Year { year } => year_bounds(*year),
            Period::Range { start, end } => Some((*start, *end)),
            Period::LastDays { days } => {
                let back = i64::from(days.saturating_sub(1));
                Some((today.checked_sub_signed(Duration::days(back))?, today))
            }
            Period::ThisMonth => month_bounds(today.year(), today.month()),
            Period::LastMonth => {
                let (year, month) = if today.month() == 1 {
                    (today.year() - 1, 12)
                } else {
                    (today.year(), today.month() - 1)
                };
                month_bounds(year, month)
            }
            Period::ThisYear => year_bounds(today.year()),
            Period::LastYear => year_bounds(today.year() - 1),
        }
    }

    /// Noun form of a period ("January 2024", "the last 30 days").
    pub fn label(&self, period: &Period) -> String {
        match period {
            Period::Month { month, year } => {
                let year = year.unwrap_or_else(|| self.year_for_month(*month));
                format!("{} {}", month_name(*month), year)
            }
            Period::Year { year } => year.to_string(),
            Period::Range { start, end } => {
                format!("{} to {}", spoken_date(*start), spoken_date(*end))
            }
            Period::LastDays { days: 1 } => "today".to_string(),
            Period::LastDays { days } => format!("the last {} days", days),
            Period::ThisMonth => "this month".to_string(),
            Period::LastMonth => "last month".to_string(),
            Period::ThisYear => "this year".to_string(),
            Period::LastYear => "last year".to_string(),
        }
    }

    /// Phrase used in spoken summaries ("in January 2024", "over the last 30 days").
    pub fn phrase(&self, period: &Period) -> String {
        match period {
            Period::Month { .. } | Period::Year { .. } => format!("in {}", self.label(period)),
            Period::Range { start, end } => {
                format!("between {} and {}", spoken_date(*start), spoken_date(*end))
            }
            Period::LastDays { days } if *days > 1 => format!("over {}", self.label(period)),
            _ => self.label(period),
        }
    }
}

/// Calendar months from `first` to `last`, inclusive.
pub fn months_between(first: (i32, u32), last: (i32, u32)) -> usize {
    let a = i64::from(first.0) * 12 + i64::from(first.1);
    let b = i64::from(last.0) * 12 + i64::from(last.1);
    usize::try_from(b - a + 1).unwrap_or(0)
}

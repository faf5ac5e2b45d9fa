//! Calendar dates used in date-filtered queries

use chrono::{Days, Local, NaiveDate};

/// Wire format of every date filter
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Days covered by the rolling week window, today included
const WEEK_DAYS: u64 = 7;

/// Dates fixed once at the start of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunDates {
    pub today: NaiveDate,
}

impl RunDates {
    /// Capture the local calendar date
    pub fn capture() -> Self {
        Self::new(Local::now().date_naive())
    }

    pub fn new(today: NaiveDate) -> Self {
        Self { today }
    }

    /// First day of the seven-day window ending today
    pub fn week_start(&self) -> NaiveDate {
        days_before(self.today, WEEK_DAYS - 1)
    }

    pub fn today_str(&self) -> String {
        format_date(self.today)
    }

    pub fn week_start_str(&self) -> String {
        format_date(self.week_start())
    }
}

/// `date` minus `days` calendar days, saturating at the earliest date
pub fn days_before(date: NaiveDate, days: u64) -> NaiveDate {
    date.checked_sub_days(Days::new(days))
        .unwrap_or(NaiveDate::MIN)
}

/// Format as `YYYY-MM-DD`
pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

use chrono::{Datelike, Months, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeriodError {
    #[error("Invalid year-month (expected YYYY-MM): {0}")]
    InvalidYearMonth(String),
    #[error("Date out of range")]
    OutOfRange,
}

/// A calendar month, ordered chronologically and rendered as `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearMonth {
    year: i32,
    month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(|_| YearMonth { year, month })
    }

    pub fn of(date: NaiveDate) -> Self {
        YearMonth {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(self) -> i32 {
        self.year
    }

    pub fn month(self) -> u32 {
        self.month
    }

    pub fn first_day(self) -> NaiveDate {
        // Constructors only admit valid (year, month) pairs.
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    pub fn last_day(self) -> NaiveDate {
        self.first_day()
            .checked_add_months(Months::new(1))
            .and_then(|d| d.pred_opt())
            .unwrap_or(NaiveDate::MAX)
    }

    /// The month `n` months before this one.
    pub fn minus_months(self, n: u32) -> Option<Self> {
        self.first_day().checked_sub_months(Months::new(n)).map(Self::of)
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for YearMonth {
    type Err = PeriodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PeriodError::InvalidYearMonth(s.to_string());
        let (y, m) = s.trim().split_once('-').ok_or_else(invalid)?;
        if y.len() != 4 || m.len() != 2 {
            return Err(invalid());
        }
        let year = y.parse::<i32>().map_err(|_| invalid())?;
        let month = m.parse::<u32>().map_err(|_| invalid())?;
        YearMonth::new(year, month).ok_or_else(invalid)
    }
}

impl Serialize for YearMonth {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for YearMonth {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Inclusive date interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.start, self.end)
    }
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        DateRange { start, end }
    }

    pub fn contains(self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    /// `[end - months, end]`, the trailing window used for sale queries.
    pub fn trailing_months(end: NaiveDate, months: u32) -> Result<Self, PeriodError> {
        let start = end
            .checked_sub_months(Months::new(months))
            .ok_or(PeriodError::OutOfRange)?;
        Ok(DateRange { start, end })
    }

    /// The `months` calendar months ending with the month of `today`:
    /// from the first day of the earliest month through `today`.
    pub fn calendar_months_ending(today: NaiveDate, months: u32) -> Result<Self, PeriodError> {
        let first = YearMonth::of(today)
            .minus_months(months.saturating_sub(1))
            .ok_or(PeriodError::OutOfRange)?;
        Ok(DateRange {
            start: first.first_day(),
            end: today,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn year_month_display_and_parse() {
        let ym: YearMonth = "2025-08".parse().unwrap();
        assert_eq!(ym, YearMonth::new(2025, 8).unwrap());
        assert_eq!(ym.to_string(), "2025-08");
    }

    #[test]
    fn year_month_rejects_garbage() {
        assert!("2025-13".parse::<YearMonth>().is_err());
        assert!("2025/08".parse::<YearMonth>().is_err());
        assert!("25-08".parse::<YearMonth>().is_err());
        assert!("".parse::<YearMonth>().is_err());
    }

    #[test]
    fn year_month_last_day_handles_short_months() {
        assert_eq!(YearMonth::new(2024, 2).unwrap().last_day(), date(2024, 2, 29));
        assert_eq!(YearMonth::new(2025, 2).unwrap().last_day(), date(2025, 2, 28));
        assert_eq!(YearMonth::new(2025, 4).unwrap().last_day(), date(2025, 4, 30));
        assert_eq!(YearMonth::new(2025, 12).unwrap().last_day(), date(2025, 12, 31));
    }

    #[test]
    fn year_month_minus_months_crosses_years() {
        let ym = YearMonth::new(2024, 12).unwrap();
        assert_eq!(ym.minus_months(23), YearMonth::new(2023, 1));
        assert_eq!(ym.minus_months(35), YearMonth::new(2022, 1));
    }

    #[test]
    fn year_months_order_chronologically() {
        let mut months = vec![
            YearMonth::new(2025, 1).unwrap(),
            YearMonth::new(2024, 12).unwrap(),
            YearMonth::new(2024, 2).unwrap(),
        ];
        months.sort();
        assert_eq!(months[0].to_string(), "2024-02");
        assert_eq!(months[2].to_string(), "2025-01");
    }

    #[test]
    fn date_range_contains() {
        let range = DateRange::new(date(2024, 1, 1), date(2024, 12, 31));
        assert!(range.contains(date(2024, 6, 15)));
        assert!(range.contains(date(2024, 1, 1))); // inclusive start
        assert!(range.contains(date(2024, 12, 31))); // inclusive end
        assert!(!range.contains(date(2023, 12, 31)));
        assert!(!range.contains(date(2025, 1, 1)));
    }

    #[test]
    fn trailing_months_window() {
        let range = DateRange::trailing_months(date(2024, 12, 31), 24).unwrap();
        assert_eq!(range.start, date(2022, 12, 31));
        assert_eq!(range.end, date(2024, 12, 31));
    }

    #[test]
    fn calendar_months_ending_starts_on_first_of_month() {
        let range = DateRange::calendar_months_ending(date(2026, 10, 19), 12).unwrap();
        assert_eq!(range.start, date(2025, 11, 1));
        assert_eq!(range.end, date(2026, 10, 19));
    }

    #[test]
    fn date_range_display() {
        let range = DateRange::new(date(2024, 1, 1), date(2024, 12, 31));
        assert_eq!(range.to_string(), "2024-01-01 to 2024-12-31");
    }
}

//! Calendar-month key for usage counters
//!
//! Counters are scoped by `(user_id, ym)`. A month rollover is simply a new
//! key; nothing ever resets or decrements an existing row.

use serde::{Deserialize, Serialize};
use time::{Date, Month, OffsetDateTime};

/// A `YYYY-MM` calendar-month key (UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct YearMonth {
    year: i32,
    month: u8,
}

impl YearMonth {
    pub fn new(year: i32, month: u8) -> Result<Self, String> {
        if !(1..=12).contains(&month) {
            return Err(format!("Invalid month: {}", month));
        }
        Ok(Self { year, month })
    }

    /// The current UTC month.
    pub fn current() -> Self {
        Self::from_datetime(OffsetDateTime::now_utc())
    }

    pub fn from_datetime(dt: OffsetDateTime) -> Self {
        Self {
            year: dt.year(),
            month: u8::from(dt.month()),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u8 {
        self.month
    }

    /// The following month (used as the exclusive upper bound of ledger
    /// range queries).
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

    fn month_enum(&self) -> Month {
        // month is range-checked at every construction site
        Month::try_from(self.month).unwrap_or(Month::January)
    }

    /// First instant of the month, UTC.
    pub fn start(&self) -> OffsetDateTime {
        Date::from_calendar_date(self.year, self.month_enum(), 1)
            .unwrap_or(Date::MIN)
            .midnight()
            .assume_utc()
    }

    /// First instant of the following month, UTC (exclusive bound).
    pub fn end_exclusive(&self) -> OffsetDateTime {
        self.next().start()
    }

    /// The `YYYY-MM` storage key.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl std::fmt::Display for YearMonth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl From<YearMonth> for String {
    fn from(ym: YearMonth) -> Self {
        ym.to_string()
    }
}

impl std::str::FromStr for YearMonth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (year, month) = s
            .split_once('-')
            .ok_or_else(|| format!("Invalid year-month key: {}", s))?;
        let year: i32 = year
            .parse()
            .map_err(|_| format!("Invalid year in key: {}", s))?;
        let month: u8 = month
            .parse()
            .map_err(|_| format!("Invalid month in key: {}", s))?;
        Self::new(year, month)
    }
}

impl TryFrom<String> for YearMonth {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_key_format() {
        let ym = YearMonth::new(2026, 8).unwrap();
        assert_eq!(ym.key(), "2026-08");
    }

    #[test]
    fn test_rejects_invalid_month() {
        assert!(YearMonth::new(2026, 0).is_err());
        assert!(YearMonth::new(2026, 13).is_err());
    }

    #[test]
    fn test_next_rolls_year() {
        let dec = YearMonth::new(2025, 12).unwrap();
        assert_eq!(dec.next(), YearMonth::new(2026, 1).unwrap());

        let aug = YearMonth::new(2026, 8).unwrap();
        assert_eq!(aug.next(), YearMonth::new(2026, 9).unwrap());
    }

    #[test]
    fn test_range_bounds() {
        let ym = YearMonth::new(2026, 8).unwrap();
        assert_eq!(ym.start(), datetime!(2026-08-01 00:00 UTC));
        assert_eq!(ym.end_exclusive(), datetime!(2026-09-01 00:00 UTC));
    }

    #[test]
    fn test_from_datetime() {
        let ym = YearMonth::from_datetime(datetime!(2026-02-28 23:59 UTC));
        assert_eq!(ym.key(), "2026-02");
    }

    #[test]
    fn test_parse_roundtrip() {
        let ym: YearMonth = "2026-08".parse().unwrap();
        assert_eq!(ym, YearMonth::new(2026, 8).unwrap());
        assert!("2026".parse::<YearMonth>().is_err());
        assert!("2026-99".parse::<YearMonth>().is_err());
    }

    #[test]
    fn test_distinct_months_distinct_keys() {
        // Quota checks key off this: a new month means a fresh counter row.
        let a = YearMonth::new(2026, 8).unwrap();
        let b = a.next();
        assert_ne!(a.key(), b.key());
    }
}

//! Calendar dates for ledger entries.

use crate::error::{CoreError, CoreResult};
use chrono::{Datelike, Local, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A calendar date, written as `YYYY-MM-DD`.
///
/// The default value is `0001-01-01`, which is what a cleared (deleted)
/// record carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LedgerDate(NaiveDate);

impl LedgerDate {
    /// Creates a date from its parts.
    pub fn from_ymd(year: i32, month: u32, day: u32) -> CoreResult<Self> {
        NaiveDate::from_ymd_opt(year, month, day)
            .map(Self)
            .ok_or_else(|| CoreError::invalid_date(format!("{year:04}-{month:02}-{day:02}")))
    }

    /// Parses `YYYY-MM-DD`.
    pub fn parse(text: &str) -> CoreResult<Self> {
        NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .map(Self)
            .map_err(|_| CoreError::invalid_date(text))
    }

    /// Today's date in the local time zone.
    #[must_use]
    pub fn today() -> Self {
        Self(Local::now().date_naive())
    }

    /// The year.
    #[must_use]
    pub fn year(&self) -> i32 {
        self.0.year()
    }

    /// The month, `1..=12`.
    #[must_use]
    pub fn month(&self) -> u32 {
        self.0.month()
    }

    /// The first day of this date's month.
    #[must_use]
    pub fn year_month(&self) -> Self {
        Self(self.0.with_day(1).unwrap_or(self.0))
    }

    /// Returns the underlying `chrono` date.
    #[must_use]
    pub fn as_naive(&self) -> NaiveDate {
        self.0
    }
}

impl Default for LedgerDate {
    fn default() -> Self {
        Self(NaiveDate::from_ymd_opt(1, 1, 1).unwrap_or(NaiveDate::MIN))
    }
}

impl From<NaiveDate> for LedgerDate {
    fn from(date: NaiveDate) -> Self {
        Self(date)
    }
}

impl fmt::Display for LedgerDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02}",
            self.0.year(),
            self.0.month(),
            self.0.day()
        )
    }
}

impl FromStr for LedgerDate {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for LedgerDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for LedgerDate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}

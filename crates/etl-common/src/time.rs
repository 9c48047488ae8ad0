//! Seasons and the date windows they select.
//!
//! Windows are half-open `[start, end)` in UTC calendar dates and follow the
//! meteorological (northern hemisphere) season convention:
//!
//! | season   | start              | end (exclusive)   |
//! |----------|--------------------|-------------------|
//! | winter   | Dec 1, `year - 1`  | Mar 1, `year`     |
//! | spring   | Mar 1, `year`      | Jun 1, `year`     |
//! | summer   | Jun 1, `year`      | Sep 1, `year`     |
//! | autumn   | Sep 1, `year`      | Dec 1, `year`     |
//! | annual   | Jan 1, `year`      | Jan 1, `year + 1` |
//! | static   | no time filter                         |

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{ParseError, ParseResult};

/// Season selector for temporal compositing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Season {
    Winter,
    Spring,
    Summer,
    Autumn,
    Annual,
    /// Variables without a temporal dimension (land cover snapshots)
    Static,
}

impl Season {
    pub fn parse(s: &str) -> ParseResult<Self> {
        match s.trim().to_lowercase().as_str() {
            "winter" => Ok(Season::Winter),
            "spring" => Ok(Season::Spring),
            "summer" => Ok(Season::Summer),
            "autumn" | "fall" => Ok(Season::Autumn),
            "annual" | "year" => Ok(Season::Annual),
            "static" => Ok(Season::Static),
            _ => Err(ParseError::InvalidSeason(s.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Season::Winter => "winter",
            Season::Spring => "spring",
            Season::Summer => "summer",
            Season::Autumn => "autumn",
            Season::Annual => "annual",
            Season::Static => "static",
        }
    }

    /// Date window selected by this season for the given year.
    ///
    /// Returns `None` for `Static`, which applies no time filter.
    pub fn window(&self, year: i32) -> Option<TimeWindow> {
        let (start, end) = match self {
            Season::Winter => (ymd(year - 1, 12, 1)?, ymd(year, 3, 1)?),
            Season::Spring => (ymd(year, 3, 1)?, ymd(year, 6, 1)?),
            Season::Summer => (ymd(year, 6, 1)?, ymd(year, 9, 1)?),
            Season::Autumn => (ymd(year, 9, 1)?, ymd(year, 12, 1)?),
            Season::Annual => (ymd(year, 1, 1)?, ymd(year + 1, 1, 1)?),
            Season::Static => return None,
        };
        Some(TimeWindow { start, end })
    }
}

fn ymd(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day)
}

impl fmt::Display for Season {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Season {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Season::parse(s)
    }
}

/// A half-open date range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl TimeWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date < self.end
    }

    /// Number of days covered by the window.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days()
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.start.format("%Y-%m-%d"), self.end.format("%Y-%m-%d"))
    }
}

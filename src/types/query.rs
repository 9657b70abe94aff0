use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use crate::error::{Error, Result};

pub const DEFAULT_LIMIT: u32 = 100;
pub const MAX_LIMIT: u32 = 500;
pub const DEFAULT_LOOKBACK_DAYS: i64 = 30;

/// ISS candle interval codes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum CandleInterval {
    Minute,
    TenMinutes,
    Hour,
    #[default]
    Day,
    Week,
    Month,
    Quarter,
}

impl CandleInterval {
    pub fn code(self) -> u16 {
        match self {
            CandleInterval::Minute => 1,
            CandleInterval::TenMinutes => 10,
            CandleInterval::Hour => 60,
            CandleInterval::Day => 24,
            CandleInterval::Week => 7,
            CandleInterval::Month => 31,
            CandleInterval::Quarter => 4,
        }
    }
}

impl TryFrom<u16> for CandleInterval {
    type Error = Error;

    fn try_from(code: u16) -> Result<Self> {
        match code {
            1 => Ok(CandleInterval::Minute),
            10 => Ok(CandleInterval::TenMinutes),
            60 => Ok(CandleInterval::Hour),
            24 => Ok(CandleInterval::Day),
            7 => Ok(CandleInterval::Week),
            31 => Ok(CandleInterval::Month),
            4 => Ok(CandleInterval::Quarter),
            other => Err(Error::InvalidRequest(format!(
                "unsupported candle interval {}, expected one of 1, 10, 60, 24, 7, 31, 4",
                other
            ))),
        }
    }
}

impl From<CandleInterval> for u16 {
    fn from(interval: CandleInterval) -> u16 {
        interval.code()
    }
}

impl fmt::Display for CandleInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: NaiveDate,
    pub till: NaiveDate,
}

impl DateRange {
    pub fn new(from: NaiveDate, till: NaiveDate) -> Result<Self> {
        if from > till {
            return Err(Error::InvalidRequest(format!("from {} is after till {}", from, till)));
        }
        Ok(DateRange { from, till })
    }

    /// Missing bounds default to the last 30 days up to today.
    pub fn resolve(from: Option<NaiveDate>, till: Option<NaiveDate>) -> Result<Self> {
        let till = till.unwrap_or_else(|| Utc::now().date_naive());
        let from = match from {
            Some(from) => from,
            None => till.checked_sub_signed(Duration::days(DEFAULT_LOOKBACK_DAYS))
                .ok_or_else(|| Error::InvalidRequest(format!("till {} is out of range", till)))?,
        };
        DateRange::new(from, till)
    }
}

/// Per-ticker request parameters shared by every fetch of one aggregation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct CandleQuery {
    pub interval: CandleInterval,
    pub range: DateRange,
    pub limit: u32,
}

impl CandleQuery {
    pub fn new(interval: CandleInterval, range: DateRange, limit: u32) -> Result<Self> {
        if limit == 0 || limit > MAX_LIMIT {
            return Err(Error::InvalidRequest(format!("limit must be within 1..={}, got {}", MAX_LIMIT, limit)));
        }
        Ok(CandleQuery { interval, range, limit })
    }
}

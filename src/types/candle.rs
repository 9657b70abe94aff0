use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::types::ticker::Ticker;

/// One OHLCV observation as returned by ISS.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawCandle {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    /// Money turnover for the period.
    pub value: f64,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

/// A candle with its derived metrics. Only built by the transformer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricRow {
    pub ticker: Ticker,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    pub value: f64,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    /// Mean of open and close.
    pub sma: f64,
    /// High minus low.
    pub range: f64,
    pub mid_price: f64,
    /// `None` when the candle opened at zero.
    pub close_to_open_ratio: Option<f64>,
    /// Assigned by the sink writer.
    pub landed_at: Option<DateTime<Utc>>,
}

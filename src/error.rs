use serde::Serialize;
use thiserror::Error;
use crate::types::ticker::Ticker;

#[derive(Error, Debug)]
pub enum Error {
    // Upstream Errors
    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("All {} tickers failed", failures.len())]
    AggregateAllFailed {
        failures: Vec<TickerFailure>,
    },

    // Input Errors
    #[error("Invalid candle: {0}")]
    InvalidCandle(InvalidCandle),

    #[error("Invalid ticker: {0:?}")]
    InvalidTicker(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // Sink Errors
    #[error("Sink write failed: {0}")]
    SinkWrite(SinkWriteFailure),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Kafka error: {0}")]
    KafkaError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    // System Errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Background task failed: {0}")]
    TaskFailed(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure of a single upstream request. Cloneable so it can be carried
/// inside a successful aggregate response next to the tickers that worked.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UpstreamError {
    #[error("ISS returned HTTP {status_code}: {body_excerpt}")]
    Http {
        status_code: u16,
        body_excerpt: String,
    },

    #[error("transport failure: {cause}")]
    Transport { cause: String },

    #[error("malformed ISS payload: {reason}")]
    Payload { reason: String },

    #[error("invalid endpoint: {endpoint:?}")]
    InvalidEndpoint { endpoint: String },

    #[error("no response within {after_ms}ms")]
    Timeout { after_ms: u64 },
}

impl UpstreamError {
    pub(crate) fn payload(reason: impl Into<String>) -> Self {
        UpstreamError::Payload { reason: reason.into() }
    }

    /// Transport failures and server-side errors may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            UpstreamError::Transport { .. } => true,
            UpstreamError::Http { status_code, .. } => *status_code >= 500,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickerFailure {
    pub ticker: Ticker,
    pub error: UpstreamError,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum InvalidCandle {
    HighBelowLow { high: f64, low: f64 },
    NegativePrice { field: &'static str, value: f64 },
    NonFinite { field: &'static str },
    NegativeAmount { field: &'static str },
    EmptyPeriod,
}

impl std::fmt::Display for InvalidCandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidCandle::HighBelowLow { high, low } => write!(f, "high {} is below low {}", high, low),
            InvalidCandle::NegativePrice { field, value } => write!(f, "{} is negative ({})", field, value),
            InvalidCandle::NonFinite { field } => write!(f, "{} is not a finite number", field),
            InvalidCandle::NegativeAmount { field } => write!(f, "{} is negative", field),
            InvalidCandle::EmptyPeriod => write!(f, "period end does not follow period start"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteStage {
    Store,
    Publish,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedRow {
    pub ticker: Ticker,
    pub period_start: chrono::DateTime<chrono::Utc>,
    pub stage: WriteStage,
    pub cause: String,
}

/// Rows of a batch that could not be confirmed as durably written.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SinkWriteFailure {
    pub attempted: usize,
    pub failed: Vec<FailedRow>,
}

impl std::fmt::Display for SinkWriteFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} of {} rows not confirmed", self.failed.len(), self.attempted)?;
        if let Some(first) = self.failed.first() {
            write!(f, " (first: {} @ {} at {:?}: {})", first.ticker, first.period_start, first.stage, first.cause)?;
        }
        Ok(())
    }
}

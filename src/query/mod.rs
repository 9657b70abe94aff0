use std::sync::Arc;
use tracing::error;
use crate::error::{Error, Result};
use crate::interfaces::metric_store::MetricStore;
use crate::types::candle::MetricRow;
use crate::types::ticker::Ticker;

pub const DEFAULT_READ_LIMIT: usize = 100;
pub const MAX_READ_LIMIT: usize = 10_000;

/// Read side of the metric table.
pub struct MetricsReader {
    store: Arc<dyn MetricStore>,
}

impl MetricsReader {
    pub fn new(store: Arc<dyn MetricStore>) -> Self {
        MetricsReader { store }
    }

    /// Newest rows first, at most `limit` of them. Any store failure is
    /// reported as `StorageUnavailable`.
    pub async fn query_metrics(&self, ticker: &Ticker, limit: usize) -> Result<Vec<MetricRow>> {
        if limit == 0 || limit > MAX_READ_LIMIT {
            return Err(Error::InvalidRequest(format!("limit must be between 1 and {}", MAX_READ_LIMIT)));
        }

        self.store.latest(ticker, limit).await.map_err(|e| {
            error!(%ticker, error = %e, "metric read failed");
            match e {
                Error::StorageUnavailable(_) => e,
                other => Error::StorageUnavailable(other.to_string()),
            }
        })
    }
}

use async_trait::async_trait;
use crate::error::Result;
use crate::types::candle::MetricRow;
use crate::types::ticker::Ticker;

/// Storage engine behind the sink writer and the read path. Rows sharing
/// `(ticker, period_start)` replace each other.
#[async_trait]
pub trait MetricStore: Send + Sync {
    /// One batched insert for the whole slice.
    async fn upsert_batch(&self, rows: &[MetricRow]) -> Result<()>;

    /// Most recent rows first.
    async fn latest(&self, ticker: &Ticker, limit: usize) -> Result<Vec<MetricRow>>;
}

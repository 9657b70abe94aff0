use async_trait::async_trait;
use crate::error::FailedRow;
use crate::types::candle::MetricRow;

#[async_trait]
pub trait RowPublisher: Send + Sync {
    /// Publish every row and wait for acknowledgement. Returns the rows that
    /// were not confirmed; an empty vector means the whole batch landed.
    async fn publish_batch(&self, rows: &[MetricRow]) -> Vec<FailedRow>;

    async fn flush(&self) -> crate::error::Result<()>;
}

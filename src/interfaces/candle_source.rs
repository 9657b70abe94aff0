use async_trait::async_trait;
use crate::error::UpstreamError;
use crate::types::candle::RawCandle;
use crate::types::query::CandleQuery;
use crate::types::ticker::Ticker;

/// Where the aggregator gets candle series from.
#[async_trait]
pub trait CandleSource: Send + Sync {
    async fn fetch_candles(
        &self,
        ticker: &Ticker,
        query: &CandleQuery,
    ) -> Result<Vec<RawCandle>, UpstreamError>;
}

use async_trait::async_trait;
use std::sync::Arc;
use crate::config::aggregator::AggregatorConfig;
use crate::error::UpstreamError;
use crate::interfaces::candle_source::CandleSource;
use crate::types::candle::RawCandle;
use crate::types::query::CandleQuery;
use crate::types::ticker::Ticker;
use crate::upstream::client::IssClient;
use crate::upstream::payload::decode_candles;
use crate::upstream::params;

/// Candle series for one board, e.g. `stock/shares/TQBR`.
pub struct IssCandleSource {
    client: Arc<IssClient>,
    engine: String,
    market: String,
    board: String,
}

impl IssCandleSource {
    pub fn new(client: Arc<IssClient>, config: &AggregatorConfig) -> Self {
        IssCandleSource {
            client,
            engine: config.engine.clone(),
            market: config.market.clone(),
            board: config.board.clone(),
        }
    }

    pub fn endpoint(&self, ticker: &Ticker) -> String {
        format!(
            "engines/{}/markets/{}/boards/{}/securities/{}/candles",
            self.engine, self.market, self.board, ticker
        )
    }
}

#[async_trait]
impl CandleSource for IssCandleSource {
    async fn fetch_candles(
        &self,
        ticker: &Ticker,
        query: &CandleQuery,
    ) -> Result<Vec<RawCandle>, UpstreamError> {
        let request = params([
            ("interval", query.interval.to_string()),
            ("from", query.range.from.to_string()),
            ("till", query.range.till.to_string()),
            ("limit", query.limit.to_string()),
        ]);

        let payload = self.client.fetch(&self.endpoint(ticker), request, true).await?;
        decode_candles(&payload)
    }
}

use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use chrono::NaiveDate;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;
use crate::analytics::aggregator::AggregateRequest;
use crate::analytics::pipeline::{AnalysisReport, CandleInput, IngestReport};
use crate::api::extract::{JsonBody, Path, Query};
use crate::api::rest::AppState;
use crate::error::Result;
use crate::query::DEFAULT_READ_LIMIT;
use crate::types::candle::MetricRow;
use crate::types::query::{CandleInterval, CandleQuery, DEFAULT_LIMIT, DateRange};
use crate::types::ticker::Ticker;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/process_and_analyze", get(process_and_analyze))
        .route("/metrics/ticker/:ticker", get(ticker_metrics))
        .route("/metrics/update", post(update_metrics))
}

#[derive(Deserialize)]
struct AnalyzeParams {
    tickers: Option<String>,
    interval: Option<u16>,
    #[serde(alias = "from_date")]
    from: Option<NaiveDate>,
    #[serde(alias = "till_date")]
    till: Option<NaiveDate>,
    limit: Option<u32>,
}

impl AnalyzeParams {
    fn into_request(self, defaults: &[Ticker]) -> Result<AggregateRequest> {
        let mut tickers = match self.tickers.as_deref() {
            Some(raw) => Ticker::parse_list(raw)?,
            None => Vec::new(),
        };
        if tickers.is_empty() {
            tickers = defaults.to_vec();
        }

        let interval = match self.interval {
            Some(code) => CandleInterval::try_from(code)?,
            None => CandleInterval::default(),
        };
        let range = DateRange::resolve(self.from, self.till)?;
        let query = CandleQuery::new(interval, range, self.limit.unwrap_or(DEFAULT_LIMIT))?;

        Ok(AggregateRequest { tickers, query })
    }
}

async fn process_and_analyze(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AnalyzeParams>,
) -> Result<Json<AnalysisReport>> {
    let request = params.into_request(&state.default_tickers)?;
    let report = state.pipeline.analyze(request).await?;
    Ok(Json(report))
}

#[derive(Deserialize)]
struct ReadParams {
    limit: Option<usize>,
}

async fn ticker_metrics(
    State(state): State<Arc<AppState>>,
    Path(ticker): Path<String>,
    Query(params): Query<ReadParams>,
) -> Result<Json<Vec<MetricRow>>> {
    let ticker = Ticker::parse(&ticker)?;
    let rows = state.reader
        .query_metrics(&ticker, params.limit.unwrap_or(DEFAULT_READ_LIMIT))
        .await?;
    Ok(Json(rows))
}

async fn update_metrics(
    State(state): State<Arc<AppState>>,
    JsonBody(candles): JsonBody<Vec<CandleInput>>,
) -> Result<Json<IngestReport>> {
    info!(candles = candles.len(), "metrics update received");
    let report = state.pipeline.ingest(candles).await?;
    Ok(Json(report))
}

//! Pass-through routes. Each handler validates its inputs, builds the ISS
//! endpoint and returns the upstream document unchanged.

use axum::{
    Json, Router,
    extract::State,
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::NaiveDate;
use serde::Deserialize;
use std::ops::RangeInclusive;
use std::sync::Arc;
use crate::api::extract::{Path, Query};
use crate::api::rest::AppState;
use crate::error::{Error, Result};
use crate::types::query::{CandleInterval, DateRange, MAX_LIMIT};
use crate::types::ticker::Ticker;
use crate::upstream::{Params, RawPayload, params};

const SEARCH_LIMIT: RangeInclusive<u32> = 1..=100;
const MARKET_LIMIT: RangeInclusive<u32> = 1..=MAX_LIMIT;
const ORDERBOOK_DEPTH: RangeInclusive<u32> = 1..=50;
const TRADES_LIMIT: RangeInclusive<u32> = 1..=100;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/securities", get(search_securities))
        .route("/securities/:id", get(security_info))
        .route("/securities/:id/indices", get(security_indices))
        .route("/securities/:id/aggregates", get(security_aggregates))
        .route("/market/:market/:board", get(market_securities))
        .route("/market/:market/:board/:id", get(security_quotes))
        .route("/market/:market/:board/:id/orderbook", get(orderbook))
        .route("/market/:market/:board/:id/trades", get(trades))
        .route("/reference/engines", get(engines))
        .route("/reference/engines/:engine/markets", get(engine_markets))
        .route("/reference/engines/:engine/markets/:market/boards", get(market_boards))
        .route("/history/candles/:id", get(history_candles))
        .route("/history/turnovers", get(turnovers))
        .route("/candles/:id", get(board_candles))
}

/// Upstream document, serialized as-is.
struct Passthrough(RawPayload);

impl IntoResponse for Passthrough {
    fn into_response(self) -> Response {
        Json(self.0.as_ref()).into_response()
    }
}

async fn forward(state: &AppState, endpoint: &str, query: Params) -> Result<Passthrough> {
    let payload = state.client.fetch(endpoint, query, true).await?;
    Ok(Passthrough(payload))
}

fn bounded(name: &str, value: Option<u32>, default: u32, range: RangeInclusive<u32>) -> Result<u32> {
    let value = value.unwrap_or(default);
    if !range.contains(&value) {
        return Err(Error::InvalidRequest(format!(
            "{} must be between {} and {}",
            name,
            range.start(),
            range.end()
        )));
    }
    Ok(value)
}

/// Engine, market and board codes: short ASCII identifiers.
fn segment<'a>(name: &str, raw: &'a str) -> Result<&'a str> {
    let valid = !raw.is_empty()
        && raw.len() <= 32
        && raw.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        return Err(Error::InvalidRequest(format!("invalid {} {:?}", name, raw)));
    }
    Ok(raw)
}

// Securities

#[derive(Deserialize)]
struct SearchParams {
    q: Option<String>,
    limit: Option<u32>,
}

async fn search_securities(
    State(state): State<Arc<AppState>>,
    Query(search): Query<SearchParams>,
) -> Result<Passthrough> {
    let q = search.q.unwrap_or_default().trim().to_string();
    if q.chars().count() < 2 {
        return Err(Error::InvalidRequest("search query must be at least 2 characters".to_string()));
    }
    let limit = bounded("limit", search.limit, 20, SEARCH_LIMIT)?;

    forward(&state, "securities", params([("q", q), ("limit", limit.to_string())])).await
}

async fn security_info(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Passthrough> {
    let id = Ticker::parse(&id)?;
    forward(&state, &format!("securities/{}", id), Params::new()).await
}

async fn security_indices(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Passthrough> {
    let id = Ticker::parse(&id)?;
    forward(&state, &format!("securities/{}/indices", id), Params::new()).await
}

#[derive(Deserialize)]
struct AggregatesParams {
    date: Option<NaiveDate>,
}

async fn security_aggregates(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<AggregatesParams>,
) -> Result<Passthrough> {
    let id = Ticker::parse(&id)?;
    let mut request = Params::new();
    if let Some(date) = query.date {
        request.insert("date".to_string(), date.to_string());
    }
    forward(&state, &format!("securities/{}/aggregates", id), request).await
}

// Market data

#[derive(Deserialize)]
struct MarketParams {
    engine: Option<String>,
    limit: Option<u32>,
    start: Option<u32>,
    depth: Option<u32>,
}

impl MarketParams {
    fn engine(&self) -> Result<&str> {
        segment("engine", self.engine.as_deref().unwrap_or("stock"))
    }
}

fn board_endpoint(engine: &str, market: &str, board: &str) -> Result<String> {
    Ok(format!(
        "engines/{}/markets/{}/boards/{}/securities",
        engine,
        segment("market", market)?,
        segment("board", board)?,
    ))
}

async fn market_securities(
    State(state): State<Arc<AppState>>,
    Path((market, board)): Path<(String, String)>,
    Query(query): Query<MarketParams>,
) -> Result<Passthrough> {
    let endpoint = board_endpoint(query.engine()?, &market, &board)?;
    let limit = bounded("limit", query.limit, 50, MARKET_LIMIT)?;
    let start = query.start.unwrap_or(0);

    forward(&state, &endpoint, params([("limit", limit.to_string()), ("start", start.to_string())])).await
}

async fn security_quotes(
    State(state): State<Arc<AppState>>,
    Path((market, board, id)): Path<(String, String, String)>,
    Query(query): Query<MarketParams>,
) -> Result<Passthrough> {
    let endpoint = format!("{}/{}", board_endpoint(query.engine()?, &market, &board)?, Ticker::parse(&id)?);
    forward(&state, &endpoint, Params::new()).await
}

async fn orderbook(
    State(state): State<Arc<AppState>>,
    Path((market, board, id)): Path<(String, String, String)>,
    Query(query): Query<MarketParams>,
) -> Result<Passthrough> {
    let endpoint = format!("{}/{}/orderbook", board_endpoint(query.engine()?, &market, &board)?, Ticker::parse(&id)?);
    let depth = bounded("depth", query.depth, 10, ORDERBOOK_DEPTH)?;
    forward(&state, &endpoint, params([("depth", depth.to_string())])).await
}

async fn trades(
    State(state): State<Arc<AppState>>,
    Path((market, board, id)): Path<(String, String, String)>,
    Query(query): Query<MarketParams>,
) -> Result<Passthrough> {
    let endpoint = format!("{}/{}/trades", board_endpoint(query.engine()?, &market, &board)?, Ticker::parse(&id)?);
    let limit = bounded("limit", query.limit, 20, TRADES_LIMIT)?;
    forward(&state, &endpoint, params([("limit", limit.to_string())])).await
}

// Reference data

async fn engines(State(state): State<Arc<AppState>>) -> Result<Passthrough> {
    forward(&state, "engines", Params::new()).await
}

async fn engine_markets(
    State(state): State<Arc<AppState>>,
    Path(engine): Path<String>,
) -> Result<Passthrough> {
    let endpoint = format!("engines/{}/markets", segment("engine", &engine)?);
    forward(&state, &endpoint, Params::new()).await
}

async fn market_boards(
    State(state): State<Arc<AppState>>,
    Path((engine, market)): Path<(String, String)>,
) -> Result<Passthrough> {
    let endpoint = format!(
        "engines/{}/markets/{}/boards",
        segment("engine", &engine)?,
        segment("market", &market)?,
    );
    forward(&state, &endpoint, Params::new()).await
}

// History

#[derive(Deserialize)]
pub(crate) struct CandleParams {
    pub interval: Option<u16>,
    #[serde(alias = "from_date")]
    pub from: Option<NaiveDate>,
    #[serde(alias = "till_date")]
    pub till: Option<NaiveDate>,
    pub limit: Option<u32>,
    engine: Option<String>,
    market: Option<String>,
}

impl CandleParams {
    pub(crate) fn interval(&self) -> Result<CandleInterval> {
        self.interval.map(CandleInterval::try_from).transpose().map(Option::unwrap_or_default)
    }

    pub(crate) fn range(&self) -> Result<DateRange> {
        DateRange::resolve(self.from, self.till)
    }

    fn iss_params(&self) -> Result<Params> {
        let range = self.range()?;
        let limit = bounded("limit", self.limit, 100, 1..=MAX_LIMIT)?;
        Ok(params([
            ("interval", self.interval()?.to_string()),
            ("from", range.from.to_string()),
            ("till", range.till.to_string()),
            ("limit", limit.to_string()),
        ]))
    }
}

async fn history_candles(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<CandleParams>,
) -> Result<Passthrough> {
    let endpoint = format!(
        "engines/{}/markets/{}/securities/{}/candles",
        segment("engine", query.engine.as_deref().unwrap_or("stock"))?,
        segment("market", query.market.as_deref().unwrap_or("shares"))?,
        Ticker::parse(&id)?,
    );
    forward(&state, &endpoint, query.iss_params()?).await
}

async fn turnovers(State(state): State<Arc<AppState>>) -> Result<Passthrough> {
    forward(&state, "turnovers", Params::new()).await
}

async fn board_candles(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<CandleParams>,
) -> Result<Passthrough> {
    let endpoint = format!("engines/stock/markets/shares/boards/TQBR/securities/{}/candles", Ticker::parse(&id)?);
    forward(&state, &endpoint, query.iss_params()?).await
}

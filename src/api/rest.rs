use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use crate::analytics::pipeline::AnalyticsPipeline;
use crate::api::{analytics, proxy};
use crate::error::Result;
use crate::observability::metrics;
use crate::query::MetricsReader;
use crate::types::ticker::Ticker;
use crate::upstream::client::IssClient;

pub struct AppState {
    pub client: Arc<IssClient>,
    pub pipeline: Arc<AnalyticsPipeline>,
    pub reader: Arc<MetricsReader>,
    /// Used by `/process_and_analyze` when no tickers are given.
    pub default_tickers: Vec<Ticker>,
    pub started_at: DateTime<Utc>,
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(service_info))
        .route("/health", get(health_check))
        .route("/metrics", get(prometheus_metrics))
        .merge(proxy::routes())
        .merge(analytics::routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn service_info() -> Json<Value> {
    Json(json!({
        "service": "MOEX ISS Proxy API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "securities": ["/securities?q=", "/securities/:id", "/securities/:id/indices", "/securities/:id/aggregates"],
            "market": ["/market/:market/:board", "/market/:market/:board/:id", "/market/:market/:board/:id/orderbook", "/market/:market/:board/:id/trades"],
            "reference": ["/reference/engines", "/reference/engines/:engine/markets", "/reference/engines/:engine/markets/:market/boards"],
            "history": ["/history/candles/:id", "/history/turnovers", "/candles/:id"],
            "analytics": ["/process_and_analyze", "/metrics/ticker/:ticker", "/metrics/update"],
        },
        "note": "ISS market data is delayed by about 15 minutes",
    }))
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "moex-proxy",
        "timestamp": Utc::now(),
        "uptime_secs": (Utc::now() - state.started_at).num_seconds(),
        "cached_responses": state.client.cache().len(),
    }))
}

async fn prometheus_metrics() -> Result<impl IntoResponse> {
    let body = metrics::render()?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}

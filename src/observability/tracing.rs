use tracing::Span;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;
use crate::config::LoggingConfig;
use crate::error::{Error, Result};

/// Install the global subscriber. `RUST_LOG` wins over the configured filter.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .map_err(|e| Error::ConfigError(format!("log filter: {}", e)))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| Error::ConfigError(format!("tracing subscriber: {}", e)))
}

pub fn trace_aggregate(request_id: &Uuid, tickers: usize) -> Span {
    tracing::info_span!(
        "aggregate",
        request_id = %request_id,
        tickers,
    )
}

pub fn trace_upstream_fetch(endpoint: &str) -> Span {
    tracing::debug_span!(
        "upstream_fetch",
        endpoint = %endpoint,
    )
}

pub fn trace_sink_write(rows: usize) -> Span {
    tracing::info_span!(
        "sink_write",
        rows,
    )
}

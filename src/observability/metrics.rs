use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use crate::error::{Error, Result};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Upstream metrics
    pub static ref UPSTREAM_REQUESTS: IntCounter = IntCounter::new(
        "upstream_requests_total",
        "Requests sent to ISS"
    ).expect("valid metric");

    pub static ref UPSTREAM_CACHE_HITS: IntCounter = IntCounter::new(
        "upstream_cache_hits_total",
        "ISS requests answered from the response cache"
    ).expect("valid metric");

    pub static ref UPSTREAM_ERRORS: IntCounterVec = IntCounterVec::new(
        Opts::new("upstream_errors_total", "Failed ISS requests by kind"),
        &["kind"]
    ).expect("valid metric");

    // Aggregation metrics
    pub static ref TICKERS_FAILED: IntCounter = IntCounter::new(
        "aggregate_tickers_failed_total",
        "Tickers reported as failed inside an aggregate response"
    ).expect("valid metric");

    pub static ref ROWS_SKIPPED: IntCounter = IntCounter::new(
        "transform_rows_skipped_total",
        "Candles rejected by the metrics transformer"
    ).expect("valid metric");

    // Sink metrics
    pub static ref ROWS_WRITTEN: IntCounter = IntCounter::new(
        "sink_rows_written_total",
        "Metric rows confirmed by the sink"
    ).expect("valid metric");

    pub static ref SINK_WRITE_FAILURES: IntCounter = IntCounter::new(
        "sink_write_failures_total",
        "Sink batches with unconfirmed rows"
    ).expect("valid metric");

    // Latency metrics
    pub static ref UPSTREAM_LATENCY: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "upstream_latency_seconds",
            "ISS request latency"
        ).buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0])
    ).expect("valid metric");

    pub static ref AGGREGATE_LATENCY: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "aggregate_latency_seconds",
            "End-to-end aggregate call latency"
        ).buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0])
    ).expect("valid metric");
}

/// Registers every collector with `REGISTRY`. Safe to call more than once.
pub fn register_metrics() -> Result<()> {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(UPSTREAM_REQUESTS.clone()),
        Box::new(UPSTREAM_CACHE_HITS.clone()),
        Box::new(UPSTREAM_ERRORS.clone()),
        Box::new(TICKERS_FAILED.clone()),
        Box::new(ROWS_SKIPPED.clone()),
        Box::new(ROWS_WRITTEN.clone()),
        Box::new(SINK_WRITE_FAILURES.clone()),
        Box::new(UPSTREAM_LATENCY.clone()),
        Box::new(AGGREGATE_LATENCY.clone()),
    ];

    for collector in collectors {
        match REGISTRY.register(collector) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(Error::ConfigError(format!("metrics registry: {}", e))),
        }
    }
    Ok(())
}

/// Text exposition of everything in `REGISTRY`.
pub fn render() -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&REGISTRY.gather(), &mut buffer)
        .map_err(|e| Error::SerializationError(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| Error::SerializationError(e.to_string()))
}

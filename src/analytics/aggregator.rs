use futures_util::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{Instrument, info, warn};
use uuid::Uuid;
use crate::analytics::transformer::{RowRejection, SeriesOutcome, transform_series};
use crate::config::aggregator::AggregatorConfig;
use crate::error::{Error, Result, TickerFailure, UpstreamError};
use crate::interfaces::candle_source::CandleSource;
use crate::observability::metrics::{AGGREGATE_LATENCY, ROWS_SKIPPED, TICKERS_FAILED};
use crate::observability::tracing::trace_aggregate;
use crate::types::candle::{MetricRow, RawCandle};
use crate::types::query::CandleQuery;
use crate::types::ticker::Ticker;

/// Rejection details kept per ticker; the full count is always reported.
const MAX_REPORTED_REJECTIONS: usize = 5;

#[derive(Clone, Debug)]
pub struct AggregateRequest {
    pub tickers: Vec<Ticker>,
    pub query: CandleQuery,
}

#[derive(Clone, Debug, Serialize)]
pub struct AggregateResult {
    pub request_id: Uuid,
    pub query: CandleQuery,
    /// Same order as the requested tickers.
    pub tickers: Vec<TickerOutcome>,
}

impl AggregateResult {
    pub fn rows(&self) -> impl Iterator<Item = &MetricRow> {
        self.tickers.iter().flat_map(|outcome| match &outcome.status {
            TickerStatus::Ok { rows, .. } => rows.as_slice(),
            TickerStatus::Error { .. } => &[],
        })
    }

    pub fn failed(&self) -> impl Iterator<Item = &TickerOutcome> {
        self.tickers.iter().filter(|outcome| outcome.is_failed())
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct TickerOutcome {
    pub ticker: Ticker,
    #[serde(flatten)]
    pub status: TickerStatus,
}

impl TickerOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self.status, TickerStatus::Error { .. })
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TickerStatus {
    Ok {
        rows: Vec<MetricRow>,
        skipped: usize,
        rejections: Vec<RowRejection>,
    },
    Error {
        error: UpstreamError,
    },
}

/// Concurrent per-ticker fetch and transform.
///
/// One fetch per ticker, at most `concurrency` in flight, all bounded by a
/// single deadline. A ticker that fails or misses the deadline is reported
/// in its slot; the call only fails when every ticker failed.
pub struct Aggregator {
    source: Arc<dyn CandleSource>,
    concurrency: usize,
    deadline: Duration,
    retry_attempts: u32,
    retry_backoff: Duration,
    parallel_threshold: usize,
}

impl Aggregator {
    pub fn new(source: Arc<dyn CandleSource>, config: &AggregatorConfig, pool_size: usize) -> Self {
        Aggregator {
            source,
            concurrency: config.effective_concurrency(pool_size),
            deadline: config.deadline(),
            retry_attempts: config.retry_attempts,
            retry_backoff: config.retry_backoff(),
            parallel_threshold: config.parallel_transform_threshold,
        }
    }

    pub async fn aggregate(&self, request: AggregateRequest) -> Result<AggregateResult> {
        let tickers = Ticker::dedup(request.tickers);
        if tickers.is_empty() {
            return Err(Error::InvalidRequest("at least one ticker is required".to_string()));
        }

        let request_id = Uuid::new_v4();
        let span = trace_aggregate(&request_id, tickers.len());
        let timer = AGGREGATE_LATENCY.start_timer();

        let outcomes = self.run(&tickers, &request.query).instrument(span).await?;
        timer.observe_duration();

        if outcomes.iter().all(TickerOutcome::is_failed) {
            let failures = outcomes.into_iter()
                .filter_map(|outcome| match outcome.status {
                    TickerStatus::Error { error } => Some(TickerFailure { ticker: outcome.ticker, error }),
                    TickerStatus::Ok { .. } => None,
                })
                .collect();
            return Err(Error::AggregateAllFailed { failures });
        }

        Ok(AggregateResult {
            request_id,
            query: request.query,
            tickers: outcomes,
        })
    }

    async fn run(&self, tickers: &[Ticker], query: &CandleQuery) -> Result<Vec<TickerOutcome>> {
        let permits = Semaphore::new(self.concurrency.max(1));
        let deadline = Instant::now() + self.deadline;

        // join_all keeps results positional, whatever order the fetches finish in.
        let timed_out = UpstreamError::Timeout { after_ms: self.deadline.as_millis() as u64 };
        let fetches = tickers.iter().map(|ticker| {
            let fetch = self.fetch_bounded(&permits, ticker, query);
            let timed_out = timed_out.clone();
            async move {
                tokio::time::timeout_at(deadline, fetch)
                    .await
                    .unwrap_or(Err(timed_out))
            }
        });
        let fetched = join_all(fetches).await;

        let mut outcomes = Vec::with_capacity(tickers.len());
        for (ticker, result) in tickers.iter().zip(fetched) {
            let status = match result {
                Ok(candles) => {
                    let series = self.transform(ticker, candles).await?;
                    let skipped = series.rejections.len();
                    if skipped > 0 {
                        ROWS_SKIPPED.inc_by(skipped as u64);
                        warn!(%ticker, skipped, "skipped invalid candles");
                    }

                    TickerStatus::Ok {
                        rows: series.rows,
                        skipped,
                        rejections: series.rejections.into_iter().take(MAX_REPORTED_REJECTIONS).collect(),
                    }
                }
                Err(error) => {
                    TICKERS_FAILED.inc();
                    warn!(%ticker, %error, "ticker fetch failed");
                    TickerStatus::Error { error }
                }
            };
            outcomes.push(TickerOutcome { ticker: ticker.clone(), status });
        }

        info!(
            ok = outcomes.iter().filter(|o| !o.is_failed()).count(),
            failed = outcomes.iter().filter(|o| o.is_failed()).count(),
            "aggregate complete"
        );
        Ok(outcomes)
    }

    /// Each attempt holds a permit only while it is in flight, so queued
    /// tickers run during another ticker's backoff.
    async fn fetch_bounded(
        &self,
        permits: &Semaphore,
        ticker: &Ticker,
        query: &CandleQuery,
    ) -> std::result::Result<Vec<RawCandle>, UpstreamError> {
        let mut attempt = 0;
        loop {
            let permit = permits.acquire().await
                .map_err(|_| UpstreamError::Transport { cause: "fetch queue closed".to_string() })?;
            let result = self.source.fetch_candles(ticker, query).await;
            drop(permit);

            match result {
                Err(error) if error.is_retryable() && attempt < self.retry_attempts => {
                    attempt += 1;
                    warn!(%ticker, %error, attempt, "retrying ticker fetch");
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                }
                result => return result,
            }
        }
    }

    async fn transform(&self, ticker: &Ticker, candles: Vec<RawCandle>) -> Result<SeriesOutcome> {
        if candles.len() <= self.parallel_threshold {
            return Ok(transform_series(ticker, &candles));
        }

        let ticker = ticker.clone();
        tokio::task::spawn_blocking(move || transform_series(&ticker, &candles))
            .await
            .map_err(|e| Error::TaskFailed(format!("transform: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::query::{CandleInterval, DateRange};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Scripted = std::result::Result<Vec<RawCandle>, UpstreamError>;

    /// Answers each ticker after a fixed delay with a fixed result. Failures
    /// listed in `flaky` are returned once, then the scripted result.
    #[derive(Default)]
    struct ScriptedSource {
        script: HashMap<String, (Duration, Scripted)>,
        flaky: Mutex<HashMap<String, UpstreamError>>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl ScriptedSource {
        fn with(mut self, ticker: &str, delay_ms: u64, result: Scripted) -> Self {
            self.script.insert(ticker.to_string(), (Duration::from_millis(delay_ms), result));
            self
        }

        fn failing_once(self, ticker: &str, error: UpstreamError) -> Self {
            self.flaky.lock().unwrap().insert(ticker.to_string(), error);
            self
        }
    }

    #[async_trait]
    impl CandleSource for ScriptedSource {
        async fn fetch_candles(&self, ticker: &Ticker, _query: &CandleQuery) -> Scripted {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            let (delay, result) = self.script.get(ticker.as_str())
                .cloned()
                .unwrap_or((Duration::ZERO, Ok(vec![])));
            tokio::time::sleep(delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if let Some(error) = self.flaky.lock().unwrap().remove(ticker.as_str()) {
                return Err(error);
            }
            result
        }
    }

    fn candles(count: usize) -> Vec<RawCandle> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..count).map(|i| {
            let begin = start + chrono::Duration::days(i as i64);
            RawCandle {
                open: 100.0 + i as f64,
                high: 110.0 + i as f64,
                low: 90.0 + i as f64,
                close: 105.0 + i as f64,
                volume: 1_000,
                value: 100_000.0,
                period_start: begin,
                period_end: begin + chrono::Duration::hours(23),
            }
        }).collect()
    }

    fn transport() -> UpstreamError {
        UpstreamError::Transport { cause: "connection refused".to_string() }
    }

    fn request(tickers: &[&str]) -> AggregateRequest {
        let range = DateRange::resolve(None, None).unwrap();
        AggregateRequest {
            tickers: tickers.iter().map(|t| Ticker::parse(t).unwrap()).collect(),
            query: CandleQuery::new(CandleInterval::Day, range, 100).unwrap(),
        }
    }

    fn aggregator(source: ScriptedSource, config: AggregatorConfig) -> (Aggregator, Arc<ScriptedSource>) {
        let source = Arc::new(source);
        (Aggregator::new(source.clone(), &config, 10), source)
    }

    fn codes(result: &AggregateResult) -> Vec<&str> {
        result.tickers.iter().map(|o| o.ticker.as_str()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn results_follow_request_order_not_completion_order() {
        let source = ScriptedSource::default()
            .with("SBER", 500, Ok(candles(2)))
            .with("GAZP", 300, Ok(candles(1)))
            .with("LKOH", 10, Ok(candles(3)));
        let (aggregator, _) = aggregator(source, AggregatorConfig::default());

        let result = aggregator.aggregate(request(&["SBER", "GAZP", "LKOH"])).await.unwrap();

        assert_eq!(codes(&result), vec!["SBER", "GAZP", "LKOH"]);
        assert_eq!(result.rows().count(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn one_failed_ticker_does_not_fail_the_batch() {
        let source = ScriptedSource::default()
            .with("A", 10, Ok(candles(2)))
            .with("B", 5, Err(transport()))
            .with("C", 20, Ok(candles(2)));
        let (aggregator, _) = aggregator(source, AggregatorConfig::default());

        let result = aggregator.aggregate(request(&["A", "B", "C"])).await.unwrap();

        assert_eq!(codes(&result), vec!["A", "B", "C"]);
        assert!(!result.tickers[0].is_failed());
        assert!(matches!(
            &result.tickers[1].status,
            TickerStatus::Error { error: UpstreamError::Transport { .. } }
        ));
        assert!(!result.tickers[2].is_failed());
        assert_eq!(result.failed().count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn every_ticker_failing_fails_the_call() {
        let source = ScriptedSource::default()
            .with("A", 0, Err(transport()))
            .with("B", 0, Err(UpstreamError::Http { status_code: 503, body_excerpt: String::new() }));
        let (aggregator, _) = aggregator(source, AggregatorConfig::default());

        match aggregator.aggregate(request(&["A", "B"])).await {
            Err(Error::AggregateAllFailed { failures }) => {
                let tickers: Vec<_> = failures.iter().map(|f| f.ticker.as_str()).collect();
                assert_eq!(tickers, vec!["A", "B"]);
            }
            other => panic!("expected AggregateAllFailed, got {:?}", other.map(|r| r.tickers.len())),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_tickers_time_out_while_finished_ones_are_kept() {
        let source = ScriptedSource::default()
            .with("FAST", 100, Ok(candles(1)))
            .with("SLOW", 120_000, Ok(candles(1)));
        let config = AggregatorConfig { deadline_secs: 5, ..AggregatorConfig::default() };
        let (aggregator, _) = aggregator(source, config);

        let result = aggregator.aggregate(request(&["SLOW", "FAST"])).await.unwrap();

        assert!(matches!(
            &result.tickers[0].status,
            TickerStatus::Error { error: UpstreamError::Timeout { after_ms: 5_000 } }
        ));
        assert!(!result.tickers[1].is_failed());
    }

    #[tokio::test(start_paused = true)]
    async fn fan_out_respects_the_concurrency_ceiling() {
        let mut source = ScriptedSource::default();
        let names = ["A", "B", "C", "D", "E", "F"];
        for name in names {
            source = source.with(name, 50, Ok(candles(1)));
        }
        let config = AggregatorConfig { concurrency: 2, ..AggregatorConfig::default() };
        let (aggregator, source) = aggregator(source, config);

        let result = aggregator.aggregate(request(&names)).await.unwrap();

        assert_eq!(result.tickers.len(), 6);
        assert_eq!(source.max_in_flight.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_failures_are_retried_within_budget() {
        let source = ScriptedSource::default()
            .with("SBER", 0, Ok(candles(1)))
            .failing_once("SBER", transport())
            .with("GAZP", 0, Ok(candles(1)));
        let config = AggregatorConfig { retry_attempts: 1, ..AggregatorConfig::default() };
        let (aggregator, source) = aggregator(source, config);

        let result = aggregator.aggregate(request(&["SBER", "GAZP"])).await.unwrap();

        assert!(result.failed().next().is_none());
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_releases_the_fetch_slot() {
        let source = ScriptedSource::default()
            .with("SBER", 0, Ok(candles(1)))
            .failing_once("SBER", transport())
            .with("GAZP", 2_000, Ok(candles(1)));
        let config = AggregatorConfig {
            concurrency: 1,
            deadline_secs: 5,
            retry_attempts: 1,
            retry_backoff_ms: 4_000,
            ..AggregatorConfig::default()
        };
        let (aggregator, _) = aggregator(source, config);

        let result = aggregator.aggregate(request(&["SBER", "GAZP"])).await.unwrap();

        assert_eq!(codes(&result), vec!["SBER", "GAZP"]);
        assert!(result.failed().next().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn client_errors_are_not_retried() {
        let source = ScriptedSource::default()
            .with("GAZP", 0, Ok(candles(1)))
            .failing_once("SBER", UpstreamError::Http { status_code: 404, body_excerpt: String::new() });
        let config = AggregatorConfig { retry_attempts: 3, ..AggregatorConfig::default() };
        let (aggregator, source) = aggregator(source, config);

        let result = aggregator.aggregate(request(&["SBER", "GAZP"])).await.unwrap();

        assert!(result.tickers[0].is_failed());
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_rows_are_skipped_and_counted() {
        let mut series = candles(4);
        series[1].high = 1.0;
        series[1].low = 2.0;
        let source = ScriptedSource::default().with("SBER", 0, Ok(series));
        let (aggregator, _) = aggregator(source, AggregatorConfig::default());

        let result = aggregator.aggregate(request(&["SBER"])).await.unwrap();

        match &result.tickers[0].status {
            TickerStatus::Ok { rows, skipped, rejections } => {
                assert_eq!(rows.len(), 3);
                assert_eq!(*skipped, 1);
                assert_eq!(rejections.len(), 1);
            }
            TickerStatus::Error { .. } => panic!("ticker should be ok"),
        }
    }

    #[tokio::test]
    async fn large_series_are_transformed_on_the_blocking_pool() {
        let source = ScriptedSource::default().with("SBER", 0, Ok(candles(50)));
        let config = AggregatorConfig { parallel_transform_threshold: 10, ..AggregatorConfig::default() };
        let (aggregator, _) = aggregator(source, config);

        let result = aggregator.aggregate(request(&["SBER"])).await.unwrap();
        assert_eq!(result.rows().count(), 50);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_tickers_are_fetched_once() {
        let source = ScriptedSource::default().with("SBER", 0, Ok(candles(1)));
        let (aggregator, source) = aggregator(source, AggregatorConfig::default());

        let result = aggregator.aggregate(request(&["SBER", "sber", "SBER"])).await.unwrap();

        assert_eq!(codes(&result), vec!["SBER"]);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_request_is_rejected() {
        let (aggregator, _) = aggregator(ScriptedSource::default(), AggregatorConfig::default());
        let err = aggregator.aggregate(request(&[])).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn outcome_serialises_with_status_tag() {
        let source = ScriptedSource::default()
            .with("A", 0, Ok(candles(1)))
            .with("B", 0, Err(transport()));
        let (aggregator, _) = aggregator(source, AggregatorConfig::default());

        let result = aggregator.aggregate(request(&["A", "B"])).await.unwrap();
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["tickers"][0]["status"], "ok");
        assert_eq!(json["tickers"][0]["ticker"], "A");
        assert_eq!(json["tickers"][1]["status"], "error");
        assert_eq!(json["tickers"][1]["error"]["kind"], "transport");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn order_is_preserved_for_any_completion_order(
            delays in proptest::collection::vec(0u64..1_000, 1..12),
            concurrency in 1usize..6,
        ) {
            let names: Vec<String> = (0..delays.len()).map(|i| format!("T{}", i)).collect();
            let mut source = ScriptedSource::default();
            for (name, delay) in names.iter().zip(&delays) {
                source = source.with(name, *delay, Ok(candles(1)));
            }
            let config = AggregatorConfig { concurrency, ..AggregatorConfig::default() };
            let (aggregator, _) = aggregator(source, config);

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .unwrap();
            let refs: Vec<&str> = names.iter().map(String::as_str).collect();
            let result = runtime.block_on(aggregator.aggregate(request(&refs))).unwrap();

            prop_assert_eq!(codes(&result), refs);
        }
    }
}

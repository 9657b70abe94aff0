use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use crate::analytics::aggregator::{AggregateRequest, AggregateResult, Aggregator};
use crate::analytics::transformer::transform;
use crate::error::{Error, Result, SinkWriteFailure};
use crate::sink::writer::SinkWriter;
use crate::types::candle::{MetricRow, RawCandle};
use crate::types::ticker::Ticker;

/// One candle as posted to the ingest endpoint.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CandleInput {
    pub ticker: String,
    pub open: f64,
    pub close: f64,
    pub high: f64,
    pub low: f64,
    #[serde(default)]
    pub value: f64,
    #[serde(default)]
    pub volume: u64,
    pub begin: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl CandleInput {
    fn raw(&self) -> RawCandle {
        RawCandle {
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            value: self.value,
            period_start: self.begin,
            period_end: self.end,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PersistOutcome {
    Written { rows: usize },
    Failed(SinkWriteFailure),
}

#[derive(Clone, Debug, Serialize)]
pub struct AnalysisReport {
    #[serde(flatten)]
    pub result: AggregateResult,
    pub persisted: PersistOutcome,
}

#[derive(Clone, Debug, Serialize)]
pub struct RejectedInput {
    pub index: usize,
    pub ticker: String,
    pub reason: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct IngestReport {
    pub status: &'static str,
    pub inserted_rows: usize,
    pub rejected: Vec<RejectedInput>,
}

/// Fetch, transform and persist in one in-process call chain.
pub struct AnalyticsPipeline {
    aggregator: Aggregator,
    writer: Arc<SinkWriter>,
}

impl AnalyticsPipeline {
    pub fn new(aggregator: Aggregator, writer: Arc<SinkWriter>) -> Self {
        AnalyticsPipeline { aggregator, writer }
    }

    /// Aggregate, then write every valid row of the ok tickers as one batch.
    /// A write failure does not hide the fetched data; it is reported next
    /// to it.
    pub async fn analyze(&self, request: AggregateRequest) -> Result<AnalysisReport> {
        let result = self.aggregator.aggregate(request).await?;
        let rows: Vec<MetricRow> = result.rows().cloned().collect();

        let persisted = match self.writer.write(rows).await {
            Ok(report) => PersistOutcome::Written { rows: report.written },
            Err(Error::SinkWrite(failure)) => {
                warn!(request_id = %result.request_id, %failure, "analysis rows not persisted");
                PersistOutcome::Failed(failure)
            }
            Err(e) => return Err(e),
        };

        Ok(AnalysisReport { result, persisted })
    }

    /// Transform and store a posted batch. Invalid entries are rejected one
    /// by one; the rest are written together.
    pub async fn ingest(&self, inputs: Vec<CandleInput>) -> Result<IngestReport> {
        if inputs.is_empty() {
            return Ok(IngestReport { status: "no data", inserted_rows: 0, rejected: vec![] });
        }

        let mut rows = Vec::with_capacity(inputs.len());
        let mut rejected = Vec::new();
        for (index, input) in inputs.iter().enumerate() {
            let row = Ticker::parse(&input.ticker)
                .and_then(|ticker| transform(&input.raw(), &ticker));
            match row {
                Ok(row) => rows.push(row),
                Err(e) => rejected.push(RejectedInput {
                    index,
                    ticker: input.ticker.clone(),
                    reason: rejection_reason(e),
                }),
            }
        }

        let report = self.writer.write(rows).await?;
        info!(inserted = report.written, rejected = rejected.len(), "ingest batch processed");

        Ok(IngestReport {
            status: "success",
            inserted_rows: report.written,
            rejected,
        })
    }
}

fn rejection_reason(e: Error) -> String {
    match e {
        Error::InvalidCandle(reason) => reason.to_string(),
        Error::InvalidTicker(raw) => format!("invalid ticker {:?}", raw),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::aggregator::AggregatorConfig;
    use crate::error::UpstreamError;
    use crate::interfaces::candle_source::CandleSource;
    use crate::interfaces::metric_store::MetricStore;
    use crate::sink::memory::MemoryMetricStore;
    use crate::types::query::{CandleInterval, CandleQuery, DateRange};
    use async_trait::async_trait;
    use chrono::TimeZone;

    struct FixedSource;

    #[async_trait]
    impl CandleSource for FixedSource {
        async fn fetch_candles(
            &self,
            ticker: &Ticker,
            _query: &CandleQuery,
        ) -> std::result::Result<Vec<RawCandle>, UpstreamError> {
            if ticker.as_str() == "DOWN" {
                return Err(UpstreamError::Http { status_code: 502, body_excerpt: "bad gateway".to_string() });
            }
            let start = Utc.with_ymd_and_hms(2024, 6, 3, 0, 0, 0).unwrap();
            Ok((0..3).map(|i| {
                let begin = start + chrono::Duration::days(i);
                RawCandle {
                    open: 50.0,
                    high: 55.0,
                    low: 48.0,
                    close: 52.0,
                    volume: 100,
                    value: 5_100.0,
                    period_start: begin,
                    period_end: begin + chrono::Duration::hours(23),
                }
            }).collect())
        }
    }

    fn pipeline() -> (AnalyticsPipeline, Arc<MemoryMetricStore>) {
        let store = Arc::new(MemoryMetricStore::new());
        let aggregator = Aggregator::new(Arc::new(FixedSource), &AggregatorConfig::default(), 4);
        let writer = Arc::new(SinkWriter::new(store.clone(), None));
        (AnalyticsPipeline::new(aggregator, writer), store)
    }

    fn request(tickers: &[&str]) -> AggregateRequest {
        AggregateRequest {
            tickers: tickers.iter().map(|t| Ticker::parse(t).unwrap()).collect(),
            query: CandleQuery::new(CandleInterval::Day, DateRange::resolve(None, None).unwrap(), 100).unwrap(),
        }
    }

    fn input(ticker: &str, day: u32, high: f64) -> CandleInput {
        let begin = Utc.with_ymd_and_hms(2024, 6, day, 0, 0, 0).unwrap();
        CandleInput {
            ticker: ticker.to_string(),
            open: 10.0,
            close: 11.0,
            high,
            low: 9.0,
            value: 0.0,
            volume: 0,
            begin,
            end: begin + chrono::Duration::hours(23),
        }
    }

    #[tokio::test]
    async fn analyze_persists_rows_of_ok_tickers() {
        let (pipeline, store) = pipeline();

        let report = pipeline.analyze(request(&["SBER", "DOWN", "GAZP"])).await.unwrap();

        assert!(matches!(report.persisted, PersistOutcome::Written { rows: 6 }));
        assert!(report.result.tickers[1].is_failed());
        assert_eq!(store.len(), 6);
    }

    #[tokio::test]
    async fn analyze_twice_does_not_duplicate_rows() {
        let (pipeline, store) = pipeline();

        pipeline.analyze(request(&["SBER"])).await.unwrap();
        pipeline.analyze(request(&["SBER"])).await.unwrap();

        let rows = store.latest(&Ticker::parse("SBER").unwrap(), 100).await.unwrap();
        assert_eq!(rows.len(), 3);
    }

    #[tokio::test]
    async fn ingest_writes_valid_rows_and_rejects_the_rest() {
        let (pipeline, store) = pipeline();

        let report = pipeline.ingest(vec![
            input("SBER", 3, 12.0),
            input("SBER", 4, 1.0),
            input("bad ticker!", 5, 12.0),
            input("GAZP", 3, 12.0),
        ]).await.unwrap();

        assert_eq!(report.status, "success");
        assert_eq!(report.inserted_rows, 2);
        let indices: Vec<usize> = report.rejected.iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![1, 2]);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn empty_ingest_reports_no_data() {
        let (pipeline, _) = pipeline();
        let report = pipeline.ingest(vec![]).await.unwrap();
        assert_eq!(report.status, "no data");
        assert_eq!(report.inserted_rows, 0);
    }

    #[test]
    fn ingest_input_accepts_iss_style_fields() {
        let parsed: CandleInput = serde_json::from_str(r#"{
            "ticker": "SBER", "open": 1.0, "close": 2.0, "high": 2.5, "low": 0.5,
            "begin": "2024-06-03T00:00:00Z", "end": "2024-06-03T23:59:59Z"
        }"#).unwrap();
        assert_eq!(parsed.volume, 0);
        assert_eq!(parsed.raw().high, 2.5);
    }
}

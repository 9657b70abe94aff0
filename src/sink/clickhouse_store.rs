use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clickhouse::sql::Identifier;
use clickhouse::{Client, Row};
use serde::{Deserialize, Serialize};
use tracing::info;
use crate::config::sink::StorageConfig;
use crate::error::{Error, Result};
use crate::interfaces::metric_store::MetricStore;
use crate::types::candle::MetricRow;
use crate::types::ticker::Ticker;

/// Storage layout of one metric row. Timestamps are DateTime64(3) carried as
/// epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Row, Serialize, Deserialize)]
struct StoredMetric {
    ticker: String,
    open_price: f64,
    close_price: f64,
    high_price: f64,
    low_price: f64,
    volume: u64,
    value: f64,
    sma: f64,
    std: f64,
    avg_price: f64,
    close_to_open_ratio: Option<f64>,
    open_dt: i64,
    close_dt: i64,
    landed_at: i64,
}

const CREATE_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS ? (
        ticker              LowCardinality(String),
        open_price          Float64,
        close_price         Float64,
        high_price          Float64,
        low_price           Float64,
        volume              UInt64,
        value               Float64,
        sma                 Float64,
        std                 Float64,
        avg_price           Float64,
        close_to_open_ratio Nullable(Float64),
        open_dt             DateTime64(3, 'UTC'),
        close_dt            DateTime64(3, 'UTC'),
        landed_at           DateTime64(3, 'UTC')
    )
    ENGINE = ReplacingMergeTree(landed_at)
    ORDER BY (ticker, open_dt)";

const SELECT_LATEST: &str = "
    SELECT ?fields FROM ? FINAL
    WHERE ticker = ?
    ORDER BY open_dt DESC
    LIMIT ?";

/// `ReplacingMergeTree` keeps the row with the latest `landed_at` per
/// `(ticker, open_dt)`; reads go through `FINAL` so replaced rows are never
/// returned.
pub struct ClickHouseMetricStore {
    client: Client,
    table: String,
}

impl ClickHouseMetricStore {
    pub fn new(config: &StorageConfig) -> Self {
        let client = Client::default()
            .with_url(&config.url)
            .with_user(&config.user)
            .with_password(&config.password)
            .with_database(&config.database);

        ClickHouseMetricStore {
            client,
            table: config.table.clone(),
        }
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        self.client
            .query(CREATE_TABLE)
            .bind(Identifier(&self.table))
            .execute()
            .await
            .map_err(unavailable)?;

        info!(table = %self.table, "metric table ready");
        Ok(())
    }
}

#[async_trait]
impl MetricStore for ClickHouseMetricStore {
    async fn upsert_batch(&self, rows: &[MetricRow]) -> Result<()> {
        let mut insert = self.client.insert::<StoredMetric>(&self.table).map_err(unavailable)?;
        for row in rows {
            insert.write(&StoredMetric::from(row)).await.map_err(unavailable)?;
        }
        insert.end().await.map_err(unavailable)
    }

    async fn latest(&self, ticker: &Ticker, limit: usize) -> Result<Vec<MetricRow>> {
        let stored = self.client
            .query(SELECT_LATEST)
            .bind(Identifier(&self.table))
            .bind(ticker.as_str())
            .bind(limit as u64)
            .fetch_all::<StoredMetric>()
            .await
            .map_err(unavailable)?;

        stored.into_iter().map(MetricRow::try_from).collect()
    }
}

fn unavailable(e: clickhouse::error::Error) -> Error {
    Error::StorageUnavailable(e.to_string())
}

impl From<&MetricRow> for StoredMetric {
    fn from(row: &MetricRow) -> Self {
        StoredMetric {
            ticker: row.ticker.as_str().to_string(),
            open_price: row.open,
            close_price: row.close,
            high_price: row.high,
            low_price: row.low,
            volume: row.volume,
            value: row.value,
            sma: row.sma,
            std: row.range,
            avg_price: row.mid_price,
            close_to_open_ratio: row.close_to_open_ratio,
            open_dt: row.period_start.timestamp_millis(),
            close_dt: row.period_end.timestamp_millis(),
            landed_at: row.landed_at.map(|t| t.timestamp_millis()).unwrap_or_default(),
        }
    }
}

impl TryFrom<StoredMetric> for MetricRow {
    type Error = Error;

    fn try_from(stored: StoredMetric) -> Result<Self> {
        Ok(MetricRow {
            ticker: Ticker::parse(&stored.ticker)?,
            open: stored.open_price,
            high: stored.high_price,
            low: stored.low_price,
            close: stored.close_price,
            volume: stored.volume,
            value: stored.value,
            period_start: millis(stored.open_dt, "open_dt")?,
            period_end: millis(stored.close_dt, "close_dt")?,
            sma: stored.sma,
            range: stored.std,
            mid_price: stored.avg_price,
            close_to_open_ratio: stored.close_to_open_ratio,
            landed_at: Some(millis(stored.landed_at, "landed_at")?),
        })
    }
}

fn millis(value: i64, column: &str) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(value)
        .ok_or_else(|| Error::SerializationError(format!("{} out of range: {}", column, value)))
}

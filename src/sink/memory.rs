use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::BTreeMap;
use crate::error::Result;
use crate::interfaces::metric_store::MetricStore;
use crate::types::candle::MetricRow;
use crate::types::ticker::Ticker;

/// Process-local store keyed by `(ticker, period_start)`.
pub struct MemoryMetricStore {
    rows: DashMap<Ticker, BTreeMap<DateTime<Utc>, MetricRow>>,
}

impl MemoryMetricStore {
    pub fn new() -> Self {
        MemoryMetricStore {
            rows: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.iter().map(|series| series.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryMetricStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricStore for MemoryMetricStore {
    async fn upsert_batch(&self, rows: &[MetricRow]) -> Result<()> {
        for row in rows {
            self.rows
                .entry(row.ticker.clone())
                .or_default()
                .insert(row.period_start, row.clone());
        }
        Ok(())
    }

    async fn latest(&self, ticker: &Ticker, limit: usize) -> Result<Vec<MetricRow>> {
        Ok(self.rows
            .get(ticker)
            .map(|series| series.values().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

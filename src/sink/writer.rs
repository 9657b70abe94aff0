use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{Instrument, error, info, warn};
use crate::error::{Error, FailedRow, Result, SinkWriteFailure, WriteStage};
use crate::interfaces::metric_store::MetricStore;
use crate::interfaces::row_publisher::RowPublisher;
use crate::observability::metrics::{ROWS_WRITTEN, SINK_WRITE_FAILURES};
use crate::observability::tracing::trace_sink_write;
use crate::types::candle::MetricRow;
use crate::types::timestamp::LandingClock;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WriteReport {
    pub written: usize,
    pub landed_at: Option<DateTime<Utc>>,
}

/// Stores a batch in one insert, then mirrors it to the queue when one is
/// configured. A batch either lands completely or the rows that did not are
/// named in `Error::SinkWrite`.
pub struct SinkWriter {
    store: Arc<dyn MetricStore>,
    publisher: Option<Arc<dyn RowPublisher>>,
    clock: LandingClock,
}

impl SinkWriter {
    pub fn new(store: Arc<dyn MetricStore>, publisher: Option<Arc<dyn RowPublisher>>) -> Self {
        SinkWriter {
            store,
            publisher,
            clock: LandingClock::new(),
        }
    }

    pub async fn write(&self, mut rows: Vec<MetricRow>) -> Result<WriteReport> {
        if rows.is_empty() {
            return Ok(WriteReport { written: 0, landed_at: None });
        }

        let landed_at = self.clock.now();
        for row in rows.iter_mut() {
            row.landed_at = Some(landed_at);
        }

        let attempted = rows.len();
        async {
            if let Err(e) = self.store.upsert_batch(&rows).await {
                error!(error = %e, rows = attempted, "metric batch insert failed");
                let cause = e.to_string();
                let failed = rows.iter()
                    .map(|row| failed_row(row, WriteStage::Store, &cause))
                    .collect();
                return Err(self.failure(attempted, failed));
            }

            if let Some(publisher) = &self.publisher {
                let failed = publisher.publish_batch(&rows).await;
                if !failed.is_empty() {
                    warn!(failed = failed.len(), rows = attempted, "rows stored but not mirrored");
                    return Err(self.failure(attempted, failed));
                }
            }

            ROWS_WRITTEN.inc_by(attempted as u64);
            info!(rows = attempted, "metric batch written");
            Ok(WriteReport { written: attempted, landed_at: Some(landed_at) })
        }
        .instrument(trace_sink_write(attempted))
        .await
    }

    /// Flush anything still queued for the mirror.
    pub async fn shutdown(&self) -> Result<()> {
        match &self.publisher {
            Some(publisher) => publisher.flush().await,
            None => Ok(()),
        }
    }

    fn failure(&self, attempted: usize, failed: Vec<FailedRow>) -> Error {
        SINK_WRITE_FAILURES.inc();
        Error::SinkWrite(SinkWriteFailure { attempted, failed })
    }
}

pub(crate) fn failed_row(row: &MetricRow, stage: WriteStage, cause: &str) -> FailedRow {
    FailedRow {
        ticker: row.ticker.clone(),
        period_start: row.period_start,
        stage,
        cause: cause.to_string(),
    }
}

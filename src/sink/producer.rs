use async_trait::async_trait;
use futures_util::future::join_all;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use std::time::Duration;
use tracing::warn;
use crate::config::sink::{KafkaConfig, MessageFormat};
use crate::error::{Error, FailedRow, Result, WriteStage};
use crate::interfaces::row_publisher::RowPublisher;
use crate::sink::writer::failed_row;
use crate::types::candle::MetricRow;

/// Mirrors metric rows to a Kafka topic, keyed by ticker so each ticker's
/// rows stay ordered within one partition.
pub struct KafkaRowPublisher {
    producer: FutureProducer,
    topic: String,
    format: MessageFormat,
    flush_timeout: Duration,
}

impl KafkaRowPublisher {
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set("max.in.flight.requests.per.connection", "5")
            .set("retries", config.retries.to_string())
            .set("retry.backoff.ms", config.retry_backoff_ms.to_string())
            .set("message.timeout.ms", config.message_timeout_ms.to_string())
            .set("compression.type", "lz4")
            .create()
            .map_err(|e| Error::KafkaError(e.to_string()))?;

        Ok(KafkaRowPublisher {
            producer,
            topic: config.topic.clone(),
            format: config.format,
            flush_timeout: config.flush_timeout(),
        })
    }
}

pub fn encode(row: &MetricRow, format: MessageFormat) -> Result<Vec<u8>> {
    match format {
        MessageFormat::Json => serde_json::to_vec(row)
            .map_err(|e| Error::SerializationError(e.to_string())),
        MessageFormat::Bincode => bincode::serialize(row)
            .map_err(|e| Error::SerializationError(e.to_string())),
    }
}

#[async_trait]
impl RowPublisher for KafkaRowPublisher {
    async fn publish_batch(&self, rows: &[MetricRow]) -> Vec<FailedRow> {
        let mut failed = Vec::new();
        let mut encoded = Vec::with_capacity(rows.len());
        for row in rows {
            match encode(row, self.format) {
                Ok(payload) => encoded.push((row, payload)),
                Err(e) => failed.push(failed_row(row, WriteStage::Publish, &e.to_string())),
            }
        }

        // Enqueue everything first so librdkafka can batch, then wait for acks.
        let mut pending = Vec::with_capacity(encoded.len());
        for (row, payload) in &encoded {
            let record = FutureRecord::to(&self.topic)
                .payload(payload)
                .key(row.ticker.as_str());

            match self.producer.send_result(record) {
                Ok(delivery) => pending.push((*row, delivery)),
                Err((e, _)) => failed.push(failed_row(row, WriteStage::Publish, &e.to_string())),
            }
        }

        let (queued, deliveries): (Vec<_>, Vec<_>) = pending.into_iter().unzip();
        for (row, outcome) in queued.into_iter().zip(join_all(deliveries).await) {
            let cause = match outcome {
                Ok(Ok(_)) => continue,
                Ok(Err((e, _))) => e.to_string(),
                Err(_) => "delivery cancelled".to_string(),
            };
            failed.push(failed_row(row, WriteStage::Publish, &cause));
        }

        if !failed.is_empty() {
            warn!(topic = %self.topic, failed = failed.len(), "rows not acknowledged by kafka");
        }
        failed
    }

    async fn flush(&self) -> Result<()> {
        let producer = self.producer.clone();
        let timeout = self.flush_timeout;
        tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await
            .map_err(|e| Error::TaskFailed(format!("kafka flush: {}", e)))?
            .map_err(|e| Error::KafkaError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ticker::Ticker;
    use chrono::{TimeZone, Utc};

    fn row() -> MetricRow {
        let start = Utc.with_ymd_and_hms(2024, 5, 6, 0, 0, 0).unwrap();
        MetricRow {
            ticker: Ticker::parse("GAZP").unwrap(),
            open: 160.0,
            high: 164.0,
            low: 158.5,
            close: 162.0,
            volume: 42,
            value: 6_804.0,
            period_start: start,
            period_end: start + chrono::Duration::hours(23),
            sma: 161.0,
            range: 5.5,
            mid_price: 161.25,
            close_to_open_ratio: Some(162.0 / 160.0),
            landed_at: Some(start + chrono::Duration::days(1)),
        }
    }

    fn unreachable() -> KafkaConfig {
        KafkaConfig {
            brokers: "127.0.0.1:9".to_string(),
            message_timeout_ms: 500,
            flush_timeout_ms: 200,
            ..KafkaConfig::default()
        }
    }

    #[test]
    fn json_messages_carry_the_full_row() {
        let bytes = encode(&row(), MessageFormat::Json).unwrap();
        let decoded: MetricRow = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, row());
    }

    #[test]
    fn bincode_messages_decode() {
        let bytes = encode(&row(), MessageFormat::Bincode).unwrap();
        let decoded: MetricRow = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, row());
    }

    #[tokio::test]
    async fn undelivered_rows_are_reported() {
        let publisher = KafkaRowPublisher::new(&unreachable()).unwrap();

        let failed = publisher.publish_batch(&[row(), row()]).await;

        assert_eq!(failed.len(), 2);
        assert!(failed.iter().all(|f| f.stage == WriteStage::Publish));
    }
}

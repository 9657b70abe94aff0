use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use crate::analytics::aggregator::Aggregator;
use crate::analytics::pipeline::AnalyticsPipeline;
use crate::api::rest::AppState;
use crate::config::loader::AppConfig;
use crate::config::sink::StorageBackend;
use crate::error::Result;
use crate::interfaces::metric_store::MetricStore;
use crate::interfaces::row_publisher::RowPublisher;
use crate::query::MetricsReader;
use crate::sink::clickhouse_store::ClickHouseMetricStore;
use crate::sink::memory::MemoryMetricStore;
use crate::sink::producer::KafkaRowPublisher;
use crate::sink::writer::SinkWriter;
use crate::types::ticker::Ticker;
use crate::upstream::candles::IssCandleSource;
use crate::upstream::client::IssClient;

/// Everything the server needs, built once at startup from `AppConfig`.
pub struct Service {
    pub state: Arc<AppState>,
    writer: Arc<SinkWriter>,
}

impl Service {
    pub async fn build(config: &AppConfig) -> Result<Self> {
        let client = Arc::new(IssClient::new(&config.upstream)?);
        let source = Arc::new(IssCandleSource::new(client.clone(), &config.aggregator));
        let aggregator = Aggregator::new(source, &config.aggregator, client.pool_size());

        let store: Arc<dyn MetricStore> = match config.storage.backend {
            StorageBackend::Clickhouse => {
                let store = ClickHouseMetricStore::new(&config.storage);
                if config.storage.create_schema {
                    store.ensure_schema().await?;
                }
                Arc::new(store)
            }
            StorageBackend::Memory => Arc::new(MemoryMetricStore::new()),
        };
        info!(backend = ?config.storage.backend, "metric store ready");

        let publisher: Option<Arc<dyn RowPublisher>> = match &config.kafka {
            Some(kafka) => {
                info!(brokers = %kafka.brokers, topic = %kafka.topic, "mirroring rows to kafka");
                Some(Arc::new(KafkaRowPublisher::new(kafka)?))
            }
            None => None,
        };

        let writer = Arc::new(SinkWriter::new(store.clone(), publisher));
        let default_tickers = config.aggregator.default_tickers.iter()
            .map(|raw| Ticker::parse(raw))
            .collect::<Result<Vec<_>>>()?;

        let state = Arc::new(AppState {
            client,
            pipeline: Arc::new(AnalyticsPipeline::new(aggregator, writer.clone())),
            reader: Arc::new(MetricsReader::new(store)),
            default_tickers,
            started_at: Utc::now(),
        });

        Ok(Service { state, writer })
    }

    /// Flush outstanding queue deliveries before exit.
    pub async fn shutdown(&self) -> Result<()> {
        self.writer.shutdown().await?;
        info!("service stopped");
        Ok(())
    }
}

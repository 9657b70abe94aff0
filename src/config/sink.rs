use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Clickhouse,
    Memory,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub url: String,
    pub user: String,
    pub password: String,
    pub database: String,
    pub table: String,
    pub create_schema: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            backend: StorageBackend::Clickhouse,
            url: "http://localhost:8123".to_string(),
            user: "default".to_string(),
            password: String::new(),
            database: "td".to_string(),
            table: "candles".to_string(),
            create_schema: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageFormat {
    Json,
    Bincode,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct KafkaConfig {
    pub brokers: String,
    pub topic: String,
    pub message_timeout_ms: u64,
    pub retries: u32,
    pub retry_backoff_ms: u64,
    pub flush_timeout_ms: u64,
    pub format: MessageFormat,
}

impl KafkaConfig {
    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }
}

impl Default for KafkaConfig {
    fn default() -> Self {
        KafkaConfig {
            brokers: "localhost:9092".to_string(),
            topic: "candles".to_string(),
            message_timeout_ms: 30_000,
            retries: 5,
            retry_backoff_ms: 100,
            flush_timeout_ms: 10_000,
            format: MessageFormat::Json,
        }
    }
}

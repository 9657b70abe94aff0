use crate::config::aggregator::AggregatorConfig;
use crate::config::sink::{KafkaConfig, StorageConfig};
use crate::config::upstream::UpstreamConfig;
use crate::config::*;
use crate::error::{Error, Result};
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use config::builder::DefaultState;
use serde::Deserialize;

pub const ENV_PREFIX: &str = "MOEX_PROXY";

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub upstream: UpstreamConfig,
    pub aggregator: AggregatorConfig,
    pub storage: StorageConfig,
    /// Mirroring to Kafka is off unless this section is present.
    pub kafka: Option<KafkaConfig>,
}

impl AppConfig {
    pub fn load(env: &str) -> Result<Self> {
        let builder = Config::builder()
            .add_source(File::with_name("config/default"))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("aggregator.default_tickers"),
            );

        Self::build(builder)
    }

    pub fn from_toml_str(toml: &str) -> Result<Self> {
        Self::build(Config::builder().add_source(File::from_str(toml, FileFormat::Toml)))
    }

    fn build(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        let config = builder
            .build()
            .map_err(|e| Error::ConfigError(e.to_string()))?;

        let app: AppConfig = config.try_deserialize()
            .map_err(|e| Error::ConfigError(e.to_string()))?;

        app.validate()?;
        Ok(app)
    }

    pub fn validate(&self) -> Result<()> {
        let upstream = &self.upstream;
        if upstream.base_url.trim().is_empty() {
            return Err(Error::ConfigError("upstream.base_url must not be empty".to_string()));
        }
        if upstream.cache_capacity == 0 {
            return Err(Error::ConfigError("upstream.cache_capacity must be at least 1".to_string()));
        }
        if upstream.max_connections == 0 || upstream.max_idle_connections == 0 {
            return Err(Error::ConfigError("upstream connection limits must be at least 1".to_string()));
        }
        if self.aggregator.deadline_secs == 0 {
            return Err(Error::ConfigError("aggregator.deadline_secs must be at least 1".to_string()));
        }
        if let Some(kafka) = &self.kafka {
            if kafka.brokers.trim().is_empty() || kafka.topic.trim().is_empty() {
                return Err(Error::ConfigError("kafka.brokers and kafka.topic are required".to_string()));
            }
        }
        Ok(())
    }
}

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Concurrent fetch ceiling; 0 means "same as the upstream pool".
    pub concurrency: usize,
    pub deadline_secs: u64,
    pub default_tickers: Vec<String>,
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,
    /// Series longer than this are transformed on the blocking pool.
    pub parallel_transform_threshold: usize,
    pub engine: String,
    pub market: String,
    pub board: String,
}

impl AggregatorConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn effective_concurrency(&self, pool_size: usize) -> usize {
        if self.concurrency == 0 { pool_size.max(1) } else { self.concurrency }
    }
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        AggregatorConfig {
            concurrency: 0,
            deadline_secs: 60,
            default_tickers: ["SBER", "GAZP", "LKOH", "YNDX", "NVTK"]
                .iter()
                .map(|t| t.to_string())
                .collect(),
            retry_attempts: 0,
            retry_backoff_ms: 250,
            parallel_transform_threshold: 1000,
            engine: "stock".to_string(),
            market: "shares".to_string(),
            board: "TQBR".to_string(),
        }
    }
}

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    /// Hard ceiling on in-flight requests; further fetches queue.
    pub max_connections: usize,
    pub max_idle_connections: usize,
    pub cache_ttl_secs: u64,
    pub cache_capacity: usize,
    /// Injected as `limit` when a request does not set one.
    pub default_limit: u32,
    pub user_agent: String,
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        UpstreamConfig {
            base_url: "https://iss.moex.com/iss".to_string(),
            timeout_secs: 30,
            max_connections: 10,
            max_idle_connections: 5,
            cache_ttl_secs: 300,  // 5 minutes
            cache_capacity: 100,
            default_limit: 100,
            user_agent: "MOEX-Proxy-API/1.0".to_string(),
        }
    }
}

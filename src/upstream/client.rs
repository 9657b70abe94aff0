use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{Instrument, debug, warn};
use crate::config::upstream::UpstreamConfig;
use crate::error::{Error, Result, UpstreamError};
use crate::observability::metrics::{
    UPSTREAM_CACHE_HITS, UPSTREAM_ERRORS, UPSTREAM_LATENCY, UPSTREAM_REQUESTS,
};
use crate::observability::tracing::trace_upstream_fetch;
use crate::upstream::cache::{CacheKey, ResponseCache};
use crate::upstream::{Params, RawPayload};

const BODY_EXCERPT_CHARS: usize = 200;

/// Cached client for the ISS REST API.
///
/// Owns its connection pool and response cache; construct one at startup
/// and share it behind an `Arc`. In-flight requests are capped at
/// `max_connections`, anything beyond that waits for a permit.
pub struct IssClient {
    http: reqwest::Client,
    base_url: String,
    default_limit: u32,
    pool_size: usize,
    permits: Semaphore,
    cache: ResponseCache,
}

impl IssClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        let cache = ResponseCache::new(config.cache_ttl(), config.cache_capacity);
        Self::with_cache(config, cache)
    }

    pub fn with_cache(config: &UpstreamConfig, cache: ResponseCache) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .pool_max_idle_per_host(config.max_idle_connections)
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .build()
            .map_err(|e| Error::ConfigError(format!("HTTP client: {}", e)))?;

        Ok(IssClient {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            default_limit: config.default_limit,
            pool_size: config.max_connections.max(1),
            permits: Semaphore::new(config.max_connections.max(1)),
            cache,
        })
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Fetch `{base_url}/{endpoint}.json`. A fresh cache entry is returned
    /// without touching the network.
    pub async fn fetch(
        &self,
        endpoint: &str,
        mut params: Params,
        use_cache: bool,
    ) -> std::result::Result<RawPayload, UpstreamError> {
        let endpoint = normalize_endpoint(endpoint)?;
        params.entry("limit".to_string())
            .or_insert_with(|| self.default_limit.to_string());

        let key = CacheKey::new(&endpoint, &params);
        if use_cache {
            if let Some(payload) = self.cache.get(&key) {
                UPSTREAM_CACHE_HITS.inc();
                debug!(endpoint = %endpoint, "ISS cache hit");
                return Ok(payload);
            }
        }

        let payload = self.request(&endpoint, &params)
            .instrument(trace_upstream_fetch(&endpoint))
            .await?;

        if use_cache {
            self.cache.insert(key, payload.clone());
        }
        Ok(payload)
    }

    async fn request(
        &self,
        endpoint: &str,
        params: &Params,
    ) -> std::result::Result<RawPayload, UpstreamError> {
        let _permit = self.permits.acquire().await
            .map_err(|_| UpstreamError::Transport { cause: "connection pool closed".to_string() })?;

        let url = format!("{}/{}.json", self.base_url, endpoint);
        UPSTREAM_REQUESTS.inc();
        let timer = UPSTREAM_LATENCY.start_timer();

        let response = self.http.get(&url)
            .query(params)
            .send()
            .await
            .map_err(|e| record(transport_error(&e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%url, status = status.as_u16(), "ISS request failed");
            return Err(record(UpstreamError::Http {
                status_code: status.as_u16(),
                body_excerpt: body.chars().take(BODY_EXCERPT_CHARS).collect(),
            }));
        }

        let body = response.bytes().await
            .map_err(|e| record(transport_error(&e)))?;
        timer.observe_duration();

        let value: serde_json::Value = serde_json::from_slice(&body)
            .map_err(|e| record(UpstreamError::payload(format!("invalid JSON from {}: {}", url, e))))?;

        Ok(Arc::new(value))
    }
}

fn record(error: UpstreamError) -> UpstreamError {
    let kind = match &error {
        UpstreamError::Http { .. } => "http",
        UpstreamError::Transport { .. } => "transport",
        UpstreamError::Payload { .. } => "payload",
        UpstreamError::InvalidEndpoint { .. } => "endpoint",
        UpstreamError::Timeout { .. } => "timeout",
    };
    UPSTREAM_ERRORS.with_label_values(&[kind]).inc();
    error
}

fn transport_error(error: &reqwest::Error) -> UpstreamError {
    let mut cause = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(inner) = source {
        cause.push_str(": ");
        cause.push_str(&inner.to_string());
        source = std::error::Error::source(inner);
    }
    UpstreamError::Transport { cause }
}

/// Endpoints are relative ISS paths; reject anything that could escape the
/// base URL or smuggle a query string.
fn normalize_endpoint(endpoint: &str) -> std::result::Result<String, UpstreamError> {
    let trimmed = endpoint.trim().trim_matches('/');
    let valid = !trimmed.is_empty()
        && trimmed.split('/').all(|segment| {
            !segment.is_empty()
                && segment != "."
                && segment != ".."
                && !segment.contains(['?', '#', '%', '\\'])
        });

    if valid {
        Ok(trimmed.to_string())
    } else {
        Err(UpstreamError::InvalidEndpoint { endpoint: endpoint.to_string() })
    }
}

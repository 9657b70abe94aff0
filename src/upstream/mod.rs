pub mod cache;
pub mod candles;
pub mod client;
pub mod payload;

use std::collections::BTreeMap;
use std::sync::Arc;

/// Query parameters for an ISS request. Kept sorted so the cache key is
/// canonical regardless of insertion order.
pub type Params = BTreeMap<String, String>;

/// Decoded JSON body of an ISS response, shared between the cache and callers.
pub type RawPayload = Arc<serde_json::Value>;

pub fn params<const N: usize>(pairs: [(&str, String); N]) -> Params {
    pairs.into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

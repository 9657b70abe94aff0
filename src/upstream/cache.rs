use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use crate::upstream::{Params, RawPayload};

/// Canonical identity of an upstream request: endpoint plus its sorted
/// parameters.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    endpoint: String,
    params: Vec<(String, String)>,
}

impl CacheKey {
    pub fn new(endpoint: &str, params: &Params) -> Self {
        CacheKey {
            endpoint: endpoint.to_string(),
            params: params.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        }
    }
}

struct CacheEntry {
    payload: RawPayload,
    inserted_at: Instant,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_valid(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Bounded TTL cache of raw upstream payloads. Expired entries are evicted
/// lazily on lookup; at capacity the oldest insertion is displaced.
pub struct ResponseCache {
    ttl: Duration,
    capacity: usize,
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl ResponseCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        ResponseCache {
            ttl,
            capacity: capacity.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<RawPayload> {
        self.get_at(key, Instant::now())
    }

    pub fn insert(&self, key: CacheKey, payload: RawPayload) {
        self.insert_at(key, payload, Instant::now())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn get_at(&self, key: &CacheKey, now: Instant) -> Option<RawPayload> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        match entries.get(key) {
            Some(entry) if entry.is_valid(now) => Some(entry.payload.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub(crate) fn insert_at(&self, key: CacheKey, payload: RawPayload, now: Instant) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        if !entries.contains_key(&key) && entries.len() >= self.capacity {
            entries.retain(|_, entry| entry.is_valid(now));

            if entries.len() >= self.capacity {
                let oldest = entries.iter()
                    .min_by_key(|(_, entry)| entry.inserted_at)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                }
            }
        }

        entries.insert(key, CacheEntry {
            payload,
            inserted_at: now,
            expires_at: now + self.ttl,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn key(endpoint: &str, limit: &str) -> CacheKey {
        let mut params = Params::new();
        params.insert("limit".to_string(), limit.to_string());
        CacheKey::new(endpoint, &params)
    }

    #[test]
    fn hit_within_ttl_and_lazy_eviction_after() {
        let cache = ResponseCache::new(Duration::from_secs(300), 10);
        let t0 = Instant::now();
        cache.insert_at(key("engines", "100"), Arc::new(json!({"ok": 1})), t0);

        assert!(cache.get_at(&key("engines", "100"), t0 + Duration::from_secs(299)).is_some());
        assert!(cache.get_at(&key("engines", "100"), t0 + Duration::from_secs(300)).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn parameter_order_does_not_change_the_key() {
        let mut a = Params::new();
        a.insert("till".into(), "2024-02-01".into());
        a.insert("from".into(), "2024-01-01".into());
        let mut b = Params::new();
        b.insert("from".into(), "2024-01-01".into());
        b.insert("till".into(), "2024-02-01".into());

        assert_eq!(CacheKey::new("candles", &a), CacheKey::new("candles", &b));
        assert_ne!(CacheKey::new("candles", &a), CacheKey::new("trades", &a));
    }

    #[test]
    fn oldest_entry_is_displaced_at_capacity() {
        let cache = ResponseCache::new(Duration::from_secs(300), 2);
        let t0 = Instant::now();
        cache.insert_at(key("a", "1"), Arc::new(json!(1)), t0);
        cache.insert_at(key("b", "1"), Arc::new(json!(2)), t0 + Duration::from_secs(1));
        cache.insert_at(key("c", "1"), Arc::new(json!(3)), t0 + Duration::from_secs(2));

        let now = t0 + Duration::from_secs(3);
        assert_eq!(cache.len(), 2);
        assert!(cache.get_at(&key("a", "1"), now).is_none());
        assert!(cache.get_at(&key("b", "1"), now).is_some());
        assert!(cache.get_at(&key("c", "1"), now).is_some());
    }

    #[test]
    fn expired_entries_are_purged_before_displacing_live_ones() {
        let cache = ResponseCache::new(Duration::from_secs(10), 2);
        let t0 = Instant::now();
        cache.insert_at(key("live", "1"), Arc::new(json!(1)), t0 + Duration::from_secs(5));
        cache.insert_at(key("stale", "1"), Arc::new(json!(2)), t0);
        cache.insert_at(key("new", "1"), Arc::new(json!(3)), t0 + Duration::from_secs(12));

        let now = t0 + Duration::from_secs(13);
        assert!(cache.get_at(&key("live", "1"), now).is_some());
        assert!(cache.get_at(&key("new", "1"), now).is_some());
    }

    #[test]
    fn refetch_overwrites_existing_entry() {
        let cache = ResponseCache::new(Duration::from_secs(10), 1);
        let t0 = Instant::now();
        cache.insert_at(key("a", "1"), Arc::new(json!("old")), t0);
        cache.insert_at(key("a", "1"), Arc::new(json!("new")), t0 + Duration::from_secs(20));

        let hit = cache.get_at(&key("a", "1"), t0 + Duration::from_secs(21)).unwrap();
        assert_eq!(*hit, json!("new"));
    }
}

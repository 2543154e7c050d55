use crate::configuration::CacheSettings;
use moka::future::Cache;
use std::time::Duration;

/// TTL cache for list/detail read responses, keyed by normalized request
/// key (`"<collection>"` or `"<collection>/<item>"`).
///
/// Invalidation is deliberately coarse: any successful mutation on a
/// resource drops every entry under that resource's collection prefix.
/// Caching is strictly best-effort and never fails a request; a zero
/// capacity disables it entirely.
#[derive(Clone)]
pub struct ReadCache {
    inner: Option<Cache<String, serde_json::Value>>,
}

impl ReadCache {
    pub fn new(settings: &CacheSettings) -> Self {
        if settings.capacity == 0 {
            return Self::disabled();
        }
        let inner = Cache::builder()
            .max_capacity(settings.capacity)
            .time_to_live(Duration::from_secs(settings.ttl_seconds))
            .support_invalidation_closures()
            .build();
        Self { inner: Some(inner) }
    }

    pub fn disabled() -> Self {
        Self { inner: None }
    }

    pub fn collection_key(collection: &str) -> String {
        collection.to_string()
    }

    pub fn item_key(collection: &str, item: &str) -> String {
        format!("{}/{}", collection, item)
    }

    pub async fn get(&self, key: &str) -> Option<serde_json::Value> {
        match &self.inner {
            Some(cache) => cache.get(key).await,
            None => None,
        }
    }

    pub async fn put(&self, key: String, value: serde_json::Value) {
        if let Some(cache) = &self.inner {
            cache.insert(key, value).await;
        }
    }

    /// Drops every entry whose key falls under `collection`.
    pub fn invalidate_collection(&self, collection: &str) {
        if let Some(cache) = &self.inner {
            let prefix = collection.to_string();
            if let Err(e) = cache.invalidate_entries_if(move |key, _| key.starts_with(&prefix)) {
                tracing::warn!(collection, error = %e, "cache invalidation failed");
            }
        }
    }
}

use crate::config::Config;
use moka::future::Cache;
use std::{sync::Arc, time::Duration};
use tracing::debug;

/// Responses that remember whether they were served from cache.
pub trait Cacheable: Clone + Send + Sync + 'static {
    fn mark_cached(&mut self);
}

/// Per-domain TTL cache shared by the whois and health-report endpoints.
pub struct CacheService<V: Cacheable> {
    cache: Cache<String, V>,
    label: &'static str,
}

impl<V: Cacheable> CacheService<V> {
    pub fn new(config: Arc<Config>, label: &'static str) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.cache_max_entries)
            .time_to_live(Duration::from_secs(config.cache_ttl_seconds))
            .build();

        Self { cache, label }
    }

    pub async fn get(&self, domain: &str) -> Option<V> {
        let key = normalize_key(domain);

        match self.cache.get(&key).await {
            Some(mut value) => {
                debug!("{} cache hit for {}", self.label, domain);
                value.mark_cached();
                Some(value)
            }
            None => {
                debug!("{} cache miss for {}", self.label, domain);
                None
            }
        }
    }

    pub async fn set(&self, domain: &str, value: &V) {
        self.cache.insert(normalize_key(domain), value.clone()).await;
        debug!("{} cached result for {}", self.label, domain);
    }
}

fn normalize_key(domain: &str) -> String {
    let normalized = domain.trim().to_lowercase();
    normalized.strip_suffix('.').map(str::to_string).unwrap_or(normalized)
}

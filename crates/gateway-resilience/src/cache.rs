//! Response cache with per-entry TTL and least-recently-accessed eviction.

use gateway_core::{GatewayRequest, GatewayResponse};
use http::Method;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Whether the cache stores anything at all
    pub enabled: bool,
    /// TTL applied when `set` is called without one
    pub default_ttl: Duration,
    /// Maximum number of entries
    pub max_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl: Duration::from_secs(300),
            max_size: 1000,
        }
    }
}

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
    last_access: u64,
}

#[derive(Debug)]
struct Entries<V> {
    map: HashMap<String, CacheEntry<V>>,
    /// Logical access clock, bumped on every insert and hit
    tick: u64,
}

impl<V> Entries<V> {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}

/// TTL- and size-bounded key/value store
#[derive(Debug)]
pub struct CacheStore<V> {
    config: CacheConfig,
    entries: Mutex<Entries<V>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone> CacheStore<V> {
    /// Create an empty store
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(Entries {
                map: HashMap::new(),
                tick: 0,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Whether the cache is enabled
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Value for the key; expired entries are removed and count as a miss
    pub fn get(&self, key: &str) -> Option<V> {
        if !self.config.enabled {
            return None;
        }
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let expired = match entries.map.get(key) {
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Some(entry) => now >= entry.expires_at,
        };
        if expired {
            entries.map.remove(key);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let tick = entries.next_tick();
        let entry = entries.map.get_mut(key)?;
        entry.last_access = tick;
        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry.value.clone())
    }

    /// Store a value; `ttl` overrides the default, zero expires immediately
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        if !self.config.enabled {
            return;
        }
        let key = key.into();
        let expires_at = Instant::now() + ttl.unwrap_or(self.config.default_ttl);
        let mut entries = self.entries.lock();

        if !entries.map.contains_key(&key) && entries.map.len() >= self.config.max_size {
            let victim = entries
                .map
                .iter()
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(k, _)| k.clone());
            if let Some(victim) = victim {
                entries.map.remove(&victim);
                debug!(key = %victim, "Evicted least recently accessed cache entry");
            }
        }

        let last_access = entries.next_tick();
        entries.map.insert(
            key,
            CacheEntry {
                value,
                expires_at,
                last_access,
            },
        );
    }

    /// Whether a live entry exists; does not count as an access
    pub fn has(&self, key: &str) -> bool {
        if !self.config.enabled {
            return false;
        }
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.map.get(key) {
            Some(entry) if now < entry.expires_at => true,
            Some(_) => {
                entries.map.remove(key);
                false
            }
            None => false,
        }
    }

    /// Remove an entry; true if it existed
    pub fn delete(&self, key: &str) -> bool {
        self.entries.lock().map.remove(key).is_some()
    }

    /// Remove every entry and reset the counters
    pub fn clear(&self) {
        self.entries.lock().map.clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    /// Current number of entries, expired ones included until swept
    #[must_use]
    pub fn size(&self) -> usize {
        self.entries.lock().map.len()
    }

    /// Remove every expired entry, returning how many were removed
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.map.len();
        entries.map.retain(|_, entry| now < entry.expires_at);
        before - entries.map.len()
    }

    /// Cache statistics
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let entries = self.size();
        let hits = self.hits.load(Ordering::Relaxed);
        let hit_rate = if entries == 0 {
            0.0
        } else {
            hits as f64 / entries as f64
        };
        CacheStats {
            enabled: self.config.enabled,
            entries,
            hits,
            misses: self.misses.load(Ordering::Relaxed),
            size: entries,
            max_size: self.config.max_size,
            ttl_ms: self.config.default_ttl.as_millis() as u64,
            hit_rate,
        }
    }
}

impl<V: Clone + Send + 'static> CacheStore<V> {
    /// Sweep expired entries every default TTL until the store is dropped
    pub fn spawn_cleanup(self: &Arc<Self>) -> JoinHandle<()> {
        let period = self.config.default_ttl.max(Duration::from_millis(1));
        let store: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                interval.tick().await;
                let Some(store) = store.upgrade() else { break };
                let removed = store.cleanup_expired();
                if removed > 0 {
                    debug!(removed, "Swept expired cache entries");
                }
            }
        })
    }
}

/// Cache statistics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Whether the cache is enabled
    pub enabled: bool,
    /// Current entry count
    pub entries: usize,
    /// Successful lookups
    pub hits: u64,
    /// Failed lookups
    pub misses: u64,
    /// Current entry count
    pub size: usize,
    /// Entry limit
    pub max_size: usize,
    /// Default TTL in milliseconds
    pub ttl_ms: u64,
    /// Hits divided by current entries
    pub hit_rate: f64,
}

/// Derives a cache key from a request
pub type KeyGenerator = Arc<dyn Fn(&GatewayRequest) -> String + Send + Sync>;

/// Decides whether a response may be cached
pub type CachePredicate = Arc<dyn Fn(&GatewayRequest, &GatewayResponse) -> bool + Send + Sync>;

/// Which responses are cached and under which key
#[derive(Clone, Default)]
pub struct CachePolicy {
    key_generator: Option<KeyGenerator>,
    should_cache: Option<CachePredicate>,
}

impl fmt::Debug for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachePolicy")
            .field("custom_key_generator", &self.key_generator.is_some())
            .field("custom_should_cache", &self.should_cache.is_some())
            .finish()
    }
}

impl CachePolicy {
    /// Replace the default `method:path:userAgent` key
    #[must_use]
    pub fn with_key_generator<F>(mut self, f: F) -> Self
    where
        F: Fn(&GatewayRequest) -> String + Send + Sync + 'static,
    {
        self.key_generator = Some(Arc::new(f));
        self
    }

    /// Replace the default GET-and-200 rule
    #[must_use]
    pub fn with_should_cache<F>(mut self, f: F) -> Self
    where
        F: Fn(&GatewayRequest, &GatewayResponse) -> bool + Send + Sync + 'static,
    {
        self.should_cache = Some(Arc::new(f));
        self
    }

    /// Cache key for the request
    pub fn key(&self, request: &GatewayRequest) -> String {
        match &self.key_generator {
            Some(generate) => generate(request),
            None => default_key(request),
        }
    }

    /// Whether the response to this request may be stored
    pub fn should_cache(&self, request: &GatewayRequest, response: &GatewayResponse) -> bool {
        match &self.should_cache {
            Some(predicate) => predicate(request, response),
            None => request.method == Method::GET && response.status == 200,
        }
    }

    /// Whether a lookup is worth attempting before dispatch
    pub fn is_lookup_candidate(&self, request: &GatewayRequest) -> bool {
        self.should_cache.is_some() || request.method == Method::GET
    }
}

fn default_key(request: &GatewayRequest) -> String {
    format!(
        "{}:{}:{}",
        request.method,
        request.with_query(&request.path),
        request.user_agent().unwrap_or_default()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(max_size: usize) -> CacheStore<String> {
        CacheStore::new(CacheConfig {
            enabled: true,
            default_ttl: Duration::from_secs(60),
            max_size,
        })
    }

    #[test]
    fn test_set_and_get() {
        let cache = store(10);
        cache.set("a", "1".to_string(), None);
        assert_eq!(cache.get("a").as_deref(), Some("1"));
        assert!(cache.has("a"));
        assert_eq!(cache.get("missing"), None);
    }

    #[test]
    fn test_zero_ttl_is_immediately_expired() {
        let cache = store(10);
        cache.set("k", "v".to_string(), Some(Duration::ZERO));
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.size(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_removed_on_get() {
        let cache = store(10);
        cache.set("k", "v".to_string(), Some(Duration::from_millis(100)));
        tokio::time::advance(Duration::from_millis(99)).await;
        assert!(cache.get("k").is_some());
        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(cache.get("k").is_none());
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn test_lru_evicts_least_recently_accessed() {
        let cache = store(3);
        cache.set("a", "1".to_string(), None);
        cache.set("b", "2".to_string(), None);
        cache.set("c", "3".to_string(), None);

        // "a" is the oldest insert but was read most recently
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());

        cache.set("d", "4".to_string(), None);
        assert_eq!(cache.size(), 3);
        assert!(!cache.has("b"));
        assert!(cache.has("a"));
        assert!(cache.has("c"));
        assert!(cache.has("d"));
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let cache = store(2);
        cache.set("a", "1".to_string(), None);
        cache.set("b", "2".to_string(), None);
        cache.set("a", "3".to_string(), None);
        assert_eq!(cache.size(), 2);
        assert_eq!(cache.get("a").as_deref(), Some("3"));
    }

    #[test]
    fn test_hit_rate_uses_current_entries() {
        let cache = store(10);
        cache.set("a", "1".to_string(), None);
        cache.set("b", "2".to_string(), None);
        cache.get("a");
        cache.get("a");
        cache.get("b");
        cache.get("missing");

        let stats = cache.stats();
        assert_eq!(stats.hits, 3);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.size, 2);
        assert!((stats.hit_rate - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_hit_rate_is_zero() {
        assert!(store(1).stats().hit_rate.abs() < f64::EPSILON);
    }

    #[test]
    fn test_disabled_cache_is_noop() {
        let cache: CacheStore<String> = CacheStore::new(CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        });
        cache.set("a", "1".to_string(), None);
        assert_eq!(cache.get("a"), None);
        assert!(!cache.has("a"));
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn test_delete_and_clear() {
        let cache = store(10);
        cache.set("a", "1".to_string(), None);
        cache.set("b", "2".to_string(), None);
        assert!(cache.delete("a"));
        assert!(!cache.delete("a"));
        cache.get("b");
        cache.clear();
        assert_eq!(cache.size(), 0);
        assert_eq!(cache.stats().hits, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_expired() {
        let cache = store(10);
        cache.set("short", "1".to_string(), Some(Duration::from_millis(10)));
        cache.set("long", "2".to_string(), None);
        tokio::time::advance(Duration::from_millis(10)).await;
        assert_eq!(cache.cleanup_expired(), 1);
        assert_eq!(cache.size(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweep_removes_unread_entries() {
        let cache = Arc::new(CacheStore::new(CacheConfig {
            enabled: true,
            default_ttl: Duration::from_millis(100),
            max_size: 10,
        }));
        let handle = cache.spawn_cleanup();
        cache.set("never-read", "x".to_string(), None);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(cache.size(), 0);
        handle.abort();
    }

    #[test]
    fn test_default_policy() {
        let policy = CachePolicy::default();
        let get = GatewayRequest::new(Method::GET, "/api/news?page=2").with_header("user-agent", "curl/8");
        assert_eq!(policy.key(&get), "GET:/api/news?page=2:curl/8");

        let anon = GatewayRequest::new(Method::GET, "/api/news");
        assert_eq!(policy.key(&anon), "GET:/api/news:");

        assert!(policy.should_cache(&get, &GatewayResponse::new(200, "ok")));
        assert!(!policy.should_cache(&get, &GatewayResponse::new(201, "ok")));
        let post = GatewayRequest::new(Method::POST, "/api/news");
        assert!(!policy.should_cache(&post, &GatewayResponse::new(200, "ok")));
        assert!(!policy.is_lookup_candidate(&post));
    }

    #[test]
    fn test_custom_policy_hooks() {
        let policy = CachePolicy::default()
            .with_key_generator(|req| req.path.clone())
            .with_should_cache(|_, resp| resp.status < 300);
        let req = GatewayRequest::new(Method::POST, "/api/statistics");
        assert_eq!(policy.key(&req), "/api/statistics");
        assert!(policy.should_cache(&req, &GatewayResponse::new(204, "")));
        assert!(policy.is_lookup_candidate(&req));
    }
}

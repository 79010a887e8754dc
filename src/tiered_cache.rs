//! Namespaced in-memory cache
//!
//! The cache is split into named namespaces ("api", "user", "static", ...), each
//! with its own default TTL and entry limit:
//! - TTL is checked lazily on read; expired entries are treated as absent and removed
//! - A background sweep removes expired entries to bound memory
//! - When a namespace is full, the oldest-created entry is evicted before inserting
//!
//! Every operation on a namespace runs under that namespace's lock, so a reader
//! never observes a partially written entry.

use crate::config::NamespacePolicy;
use crate::error::Result;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::form_urlencoded::Serializer;

/// Namespace used by the gateway for upstream API payloads
pub const API_NAMESPACE: &str = "api";
/// Namespace for per-user data
pub const USER_NAMESPACE: &str = "user";
/// Namespace for static reference data
pub const STATIC_NAMESPACE: &str = "static";

/// Shortest interval accepted by the background sweep
const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Cached value with its creation time and TTL
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    created_at: Instant,
    ttl: Duration,
    /// Creation order within the namespace, breaks ties between equal timestamps
    sequence: u64,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) >= self.ttl
    }
}

/// A single partition of the cache
struct Namespace<V> {
    policy: NamespacePolicy,
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
    next_sequence: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<V> Namespace<V> {
    fn new(policy: NamespacePolicy) -> Self {
        Namespace {
            policy,
            entries: Mutex::new(HashMap::new()),
            next_sequence: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Statistics of one namespace
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NamespaceStats {
    pub name: String,
    pub keys: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub max_entries: usize,
    pub ttl_secs: u64,
}

/// Cache statistics for monitoring
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub hit_rate: f64,
    pub namespaces: Vec<NamespaceStats>,
}

impl CacheStats {
    /// Stats of a single namespace, if it exists
    pub fn namespace(&self, name: &str) -> Option<&NamespaceStats> {
        self.namespaces.iter().find(|ns| ns.name == name)
    }
}

/// Build the cache key of an upstream API request
///
/// Parameter names are sorted so the key does not depend on insertion order.
/// Names and values are form-encoded, so a value containing `&` or `=` cannot
/// collide with a different parameter set.
/// Format: `api:{endpoint}:{k1=v1&k2=v2}`
pub fn generate_api_key<'a, I>(endpoint: &str, params: I) -> String
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    let mut pairs: Vec<(&String, &String)> = params.into_iter().collect();
    pairs.sort();
    let param_string = Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish();
    format!("api:{}:{}", endpoint, param_string)
}

/// Namespaced TTL cache with a per-namespace capacity bound
pub struct TieredCache<V = serde_json::Value> {
    namespaces: HashMap<String, Namespace<V>>,
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
}

impl<V: Clone> TieredCache<V> {
    /// Create a cache with the given namespaces
    ///
    /// # Arguments
    /// * `policies` - `(name, policy)` pairs, one per namespace
    pub fn new<I, S>(policies: I) -> Self
    where
        I: IntoIterator<Item = (S, NamespacePolicy)>,
        S: Into<String>,
    {
        let namespaces: HashMap<String, Namespace<V>> = policies
            .into_iter()
            .map(|(name, policy)| (name.into(), Namespace::new(policy)))
            .collect();

        info!("Initializing cache with {} namespaces", namespaces.len());
        for (name, ns) in &namespaces {
            debug!(
                "  namespace={} ttl={}s max_entries={}",
                name, ns.policy.ttl_secs, ns.policy.max_entries
            );
        }

        TieredCache {
            namespaces,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
        }
    }

    /// Look up a value
    ///
    /// Returns `None` for a missing or expired entry; expired entries are removed.
    pub fn get(&self, namespace: &str, key: &str) -> Option<V> {
        let Some(ns) = self.namespaces.get(namespace) else {
            warn!("Cache lookup in unknown namespace: {}", namespace);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        let now = Instant::now();
        let value = {
            let mut entries = ns.lock();
            match entries.get(key) {
                Some(entry) if !entry.is_expired(now) => Some(entry.value.clone()),
                Some(_) => {
                    debug!("Cache entry expired: {}/{}", namespace, key);
                    entries.remove(key);
                    None
                }
                None => None,
            }
        };

        if value.is_some() {
            debug!("Cache hit: {}/{}", namespace, key);
            ns.hits.fetch_add(1, Ordering::Relaxed);
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            debug!("Cache miss: {}/{}", namespace, key);
            ns.misses.fetch_add(1, Ordering::Relaxed);
            self.misses.fetch_add(1, Ordering::Relaxed);
        }

        value
    }

    /// Store a value
    ///
    /// A `None` or zero TTL uses the namespace default. When the namespace is full
    /// and the key is new, the oldest-created entry is evicted first.
    ///
    /// # Returns
    /// `false` only when the namespace does not exist
    pub fn set(&self, namespace: &str, key: &str, value: V, ttl: Option<Duration>) -> bool {
        let Some(ns) = self.namespaces.get(namespace) else {
            warn!("Cache store into unknown namespace: {}", namespace);
            return false;
        };

        let ttl = match ttl {
            Some(ttl) if !ttl.is_zero() => ttl,
            _ => ns.policy.ttl(),
        };

        {
            let mut entries = ns.lock();
            if !entries.contains_key(key) && entries.len() >= ns.policy.max_entries {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, entry)| (entry.created_at, entry.sequence))
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                    ns.evictions.fetch_add(1, Ordering::Relaxed);
                    debug!("Evicted oldest entry {}/{}", namespace, oldest);
                }
            }

            entries.insert(
                key.to_string(),
                CacheEntry {
                    value,
                    created_at: Instant::now(),
                    ttl,
                    sequence: ns.next_sequence.fetch_add(1, Ordering::Relaxed),
                },
            );
        }

        self.sets.fetch_add(1, Ordering::Relaxed);
        debug!("Cached {}/{} for {:?}", namespace, key, ttl);
        true
    }

    /// Remove a single entry
    ///
    /// # Returns
    /// `true` if an entry was removed
    pub fn delete(&self, namespace: &str, key: &str) -> bool {
        let Some(ns) = self.namespaces.get(namespace) else {
            return false;
        };

        let removed = ns.lock().remove(key).is_some();
        if removed {
            self.deletes.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// Whether a live (unexpired) entry exists, without touching hit/miss counters
    pub fn exists(&self, namespace: &str, key: &str) -> bool {
        let now = Instant::now();
        self.namespaces
            .get(namespace)
            .map(|ns| {
                ns.lock()
                    .get(key)
                    .map(|entry| !entry.is_expired(now))
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    }

    /// Remove every entry whose key contains `pattern`
    ///
    /// # Returns
    /// Number of entries removed
    pub fn invalidate_pattern(&self, namespace: &str, pattern: &str) -> usize {
        let Some(ns) = self.namespaces.get(namespace) else {
            return 0;
        };

        let removed = {
            let mut entries = ns.lock();
            let before = entries.len();
            entries.retain(|key, _| !key.contains(pattern));
            before - entries.len()
        };

        self.deletes.fetch_add(removed as u64, Ordering::Relaxed);
        if removed > 0 {
            info!(
                "Invalidated {} entries in namespace {} matching '{}'",
                removed, namespace, pattern
            );
        }
        removed
    }

    /// Live entries whose key contains `pattern`
    pub fn get_pattern(&self, namespace: &str, pattern: &str) -> Vec<(String, V)> {
        let now = Instant::now();
        let Some(ns) = self.namespaces.get(namespace) else {
            return Vec::new();
        };

        let matches: Vec<(String, V)> = ns
            .lock()
            .iter()
            .filter(|(key, entry)| key.contains(pattern) && !entry.is_expired(now))
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect();

        let hits = matches.len() as u64;
        ns.hits.fetch_add(hits, Ordering::Relaxed);
        self.hits.fetch_add(hits, Ordering::Relaxed);
        matches
    }

    /// Drop every entry of a namespace
    ///
    /// # Returns
    /// Number of entries dropped
    pub fn flush(&self, namespace: &str) -> usize {
        let Some(ns) = self.namespaces.get(namespace) else {
            return 0;
        };
        let mut entries = ns.lock();
        let count = entries.len();
        entries.clear();
        info!("Flushed {} entries from namespace {}", count, namespace);
        count
    }

    /// Return the cached value, or compute, store and return it
    ///
    /// `None` results from the fallback are not cached.
    pub async fn get_or_set<F, Fut>(
        &self,
        namespace: &str,
        key: &str,
        ttl: Option<Duration>,
        fallback: F,
    ) -> Result<Option<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<V>>>,
    {
        if let Some(value) = self.get(namespace, key) {
            return Ok(Some(value));
        }

        let value = fallback().await?;
        if let Some(value) = &value {
            self.set(namespace, key, value.clone(), ttl);
        }
        Ok(value)
    }

    /// Remove expired entries from every namespace
    ///
    /// # Returns
    /// Number of entries removed
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        for ns in self.namespaces.values() {
            let mut entries = ns.lock();
            let before = entries.len();
            entries.retain(|_, entry| !entry.is_expired(now));
            removed += before - entries.len();
        }
        if removed > 0 {
            info!("Cleaned up {} expired cache entries", removed);
        }
        removed
    }

    /// Snapshot of the cache counters
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        let mut namespaces: Vec<NamespaceStats> = self
            .namespaces
            .iter()
            .map(|(name, ns)| NamespaceStats {
                name: name.clone(),
                keys: ns.lock().len(),
                hits: ns.hits.load(Ordering::Relaxed),
                misses: ns.misses.load(Ordering::Relaxed),
                evictions: ns.evictions.load(Ordering::Relaxed),
                max_entries: ns.policy.max_entries,
                ttl_secs: ns.policy.ttl_secs,
            })
            .collect();
        namespaces.sort_by(|a, b| a.name.cmp(&b.name));

        CacheStats {
            hits,
            misses,
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            hit_rate: if total > 0 {
                hits as f64 / total as f64 * 100.0
            } else {
                0.0
            },
            namespaces,
        }
    }

    /// Names of the configured namespaces
    pub fn namespace_names(&self) -> Vec<&str> {
        self.namespaces.keys().map(String::as_str).collect()
    }

    pub fn has_namespace(&self, namespace: &str) -> bool {
        self.namespaces.contains_key(namespace)
    }
}

impl TieredCache<serde_json::Value> {
    /// Round-trip a probe value through the api namespace
    pub fn health_check(&self) -> bool {
        let key = "health_check";
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        let probe = serde_json::json!(nanos);
        self.set(API_NAMESPACE, key, probe.clone(), Some(Duration::from_secs(10)));
        let retrieved = self.get(API_NAMESPACE, key);
        self.delete(API_NAMESPACE, key);
        retrieved.as_ref() == Some(&probe)
    }
}

impl<V: Clone + Send + Sync + 'static> TieredCache<V> {
    /// Start the periodic expiry sweep
    ///
    /// The task holds a weak reference and stops once the cache is dropped.
    /// Intervals below one second are raised to one second.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);
        let interval = interval.max(MIN_SWEEP_INTERVAL);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match cache.upgrade() {
                    Some(cache) => {
                        cache.sweep_expired();
                    }
                    None => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cache(max_entries: usize, ttl_secs: u64) -> TieredCache {
        TieredCache::new([
            (API_NAMESPACE, NamespacePolicy::new(ttl_secs, max_entries)),
            (USER_NAMESPACE, NamespacePolicy::new(ttl_secs, max_entries)),
        ])
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_before_and_after_ttl() {
        let cache = cache(10, 60);
        assert!(cache.set(API_NAMESPACE, "k", json!({"a": 1}), Some(Duration::from_secs(5))));

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(cache.get(API_NAMESPACE, "k"), Some(json!({"a": 1})));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get(API_NAMESPACE, "k"), None);
        assert_eq!(cache.stats().namespace(API_NAMESPACE).unwrap().keys, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_ttl_uses_namespace_default() {
        let cache = cache(10, 30);
        cache.set(API_NAMESPACE, "k", json!(1), Some(Duration::ZERO));

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(cache.get(API_NAMESPACE, "k").is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.get(API_NAMESPACE, "k").is_none());
    }

    #[test]
    fn test_capacity_evicts_oldest_created() {
        let cache = cache(3, 60);
        for i in 0..4 {
            cache.set(API_NAMESPACE, &format!("k{}", i), json!(i), None);
        }

        assert!(cache.get(API_NAMESPACE, "k0").is_none());
        for i in 1..4 {
            assert_eq!(cache.get(API_NAMESPACE, &format!("k{}", i)), Some(json!(i)));
        }
        let stats = cache.stats();
        let api = stats.namespace(API_NAMESPACE).unwrap();
        assert_eq!(api.keys, 3);
        assert_eq!(api.evictions, 1);
    }

    #[test]
    fn test_replacing_a_key_does_not_evict() {
        let cache = cache(2, 60);
        cache.set(API_NAMESPACE, "a", json!(1), None);
        cache.set(API_NAMESPACE, "b", json!(2), None);
        cache.set(API_NAMESPACE, "a", json!(3), None);

        assert_eq!(cache.get(API_NAMESPACE, "a"), Some(json!(3)));
        assert_eq!(cache.get(API_NAMESPACE, "b"), Some(json!(2)));
    }

    #[test]
    fn test_namespaces_are_isolated() {
        let cache = cache(10, 60);
        cache.set(API_NAMESPACE, "k", json!("api"), None);
        cache.set(USER_NAMESPACE, "k", json!("user"), None);

        assert_eq!(cache.get(API_NAMESPACE, "k"), Some(json!("api")));
        assert_eq!(cache.get(USER_NAMESPACE, "k"), Some(json!("user")));
        assert!(!cache.set("missing", "k", json!(1), None));
        assert!(cache.get("missing", "k").is_none());
    }

    #[test]
    fn test_delete_and_invalidate_pattern() {
        let cache = cache(10, 60);
        cache.set(API_NAMESPACE, "api:/anime/naruto:", json!(1), None);
        cache.set(API_NAMESPACE, "api:/anime/naruto/episodes:", json!(2), None);
        cache.set(API_NAMESPACE, "api:/home:", json!(3), None);

        assert!(cache.delete(API_NAMESPACE, "api:/home:"));
        assert!(!cache.delete(API_NAMESPACE, "api:/home:"));
        assert_eq!(cache.invalidate_pattern(API_NAMESPACE, "naruto"), 2);
        assert_eq!(cache.stats().deletes, 3);
        assert_eq!(cache.stats().namespace(API_NAMESPACE).unwrap().keys, 0);
    }

    #[test]
    fn test_stats_counters() {
        let cache = cache(10, 60);
        cache.set(API_NAMESPACE, "k", json!(1), None);
        cache.get(API_NAMESPACE, "k");
        cache.get(API_NAMESPACE, "k");
        cache.get(API_NAMESPACE, "other");

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.sets, 1);
        assert!((stats.hit_rate - 66.666).abs() < 0.01);
    }

    #[test]
    fn test_generate_api_key_sorts_params() {
        let mut first = HashMap::new();
        first.insert("q".to_string(), "naruto".to_string());
        first.insert("page".to_string(), "1".to_string());

        let key = generate_api_key("search", &first);
        assert_eq!(key, "api:search:page=1&q=naruto");
    }

    #[test]
    fn test_generate_api_key_encodes_separators() {
        let mut joined = HashMap::new();
        joined.insert("keyword".to_string(), "naruto&page=2".to_string());

        let mut split = HashMap::new();
        split.insert("keyword".to_string(), "naruto".to_string());
        split.insert("page".to_string(), "2".to_string());

        let joined_key = generate_api_key("search", &joined);
        assert_eq!(joined_key, "api:search:keyword=naruto%26page%3D2");
        assert_ne!(joined_key, generate_api_key("search", &split));

        let mut spaced = HashMap::new();
        spaced.insert("keyword".to_string(), "one piece".to_string());
        assert_eq!(
            generate_api_key("search", &spaced),
            "api:search:keyword=one+piece"
        );
    }

    #[tokio::test]
    async fn test_get_or_set() {
        let cache = cache(10, 60);
        let value = cache
            .get_or_set(API_NAMESPACE, "k", None, || async { Ok(Some(json!(42))) })
            .await
            .unwrap();
        assert_eq!(value, Some(json!(42)));

        let value = cache
            .get_or_set(API_NAMESPACE, "k", None, || async { Ok(Some(json!(0))) })
            .await
            .unwrap();
        assert_eq!(value, Some(json!(42)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_expired() {
        let cache = cache(10, 60);
        cache.set(API_NAMESPACE, "short", json!(1), Some(Duration::from_secs(1)));
        cache.set(API_NAMESPACE, "long", json!(2), None);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.sweep_expired(), 1);
        assert!(cache.exists(API_NAMESPACE, "long"));
        assert!(!cache.exists(API_NAMESPACE, "short"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_with_zero_interval_keeps_running() {
        let cache = Arc::new(cache(10, 60));
        cache.set(API_NAMESPACE, "short", json!(1), Some(Duration::from_secs(1)));
        cache.set(API_NAMESPACE, "long", json!(2), None);

        let sweeper = cache.spawn_sweeper(Duration::ZERO);
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert!(!sweeper.is_finished());
        assert_eq!(cache.stats().namespace(API_NAMESPACE).unwrap().keys, 1);

        drop(cache);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(sweeper.await.is_ok());
    }

    #[test]
    fn test_health_check_and_flush() {
        let cache = cache(10, 60);
        assert!(cache.health_check());
        cache.set(API_NAMESPACE, "a", json!(1), None);
        cache.set(API_NAMESPACE, "b", json!(2), None);
        assert_eq!(cache.get_pattern(API_NAMESPACE, "a").len(), 1);
        assert_eq!(cache.flush(API_NAMESPACE), 2);
    }
}

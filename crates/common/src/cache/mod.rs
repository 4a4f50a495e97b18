//! In-process query result cache
//!
//! Provides:
//! - Bounded FIFO cache with batch eviction
//! - Optional entry TTL
//! - Tenant-scoped query key builder

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

struct State<V> {
    entries: HashMap<String, Entry<V>>,
    order: VecDeque<String>,
}

/// Bounded cache evicting the oldest insertions first.
///
/// Eviction and insertion happen under the same write lock, so the size
/// never exceeds `max_entries` regardless of concurrent writers.
pub struct FifoCache<V> {
    state: RwLock<State<V>>,
    max_entries: usize,
    eviction_batch: usize,
    ttl: Option<Duration>,
}

impl<V: Clone> FifoCache<V> {
    /// Create a cache holding at most `max_entries` values
    pub fn new(max_entries: usize, eviction_batch: usize, ttl: Option<Duration>) -> Self {
        let max_entries = max_entries.max(1);
        Self {
            state: RwLock::new(State {
                entries: HashMap::with_capacity(max_entries),
                order: VecDeque::with_capacity(max_entries),
            }),
            max_entries,
            eviction_batch: eviction_batch.clamp(1, max_entries),
            ttl,
        }
    }

    /// Get a value, treating expired entries as misses
    pub async fn get(&self, key: &str) -> Option<V> {
        let state = self.state.read().await;
        let entry = state.entries.get(key)?;

        if let Some(ttl) = self.ttl {
            if entry.inserted_at.elapsed() > ttl {
                debug!(key, "Cache entry expired");
                return None;
            }
        }
        Some(entry.value.clone())
    }

    /// Insert a value, evicting the oldest batch when full
    pub async fn insert(&self, key: String, value: V) {
        let mut state = self.state.write().await;

        if let Some(entry) = state.entries.get_mut(&key) {
            entry.value = value;
            entry.inserted_at = Instant::now();
            return;
        }

        if state.entries.len() >= self.max_entries {
            let mut evicted = 0;
            while evicted < self.eviction_batch {
                let Some(oldest) = state.order.pop_front() else {
                    break;
                };
                state.entries.remove(&oldest);
                evicted += 1;
            }
            debug!(evicted, remaining = state.entries.len(), "Cache eviction");
        }

        state.order.push_back(key.clone());
        state.entries.insert(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Number of cached entries
    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every entry
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.entries.clear();
        state.order.clear();
    }
}

/// Cache key builder helpers
pub mod keys {
    /// Lowercase, collapse non-word runs to one space, trim
    pub fn normalize_query(query: &str) -> String {
        let mut out = String::with_capacity(query.len());
        let mut pending_space = false;

        for c in query.chars().flat_map(char::to_lowercase) {
            if c.is_alphanumeric() || c == '_' {
                if pending_space && !out.is_empty() {
                    out.push(' ');
                }
                pending_space = false;
                out.push(c);
            } else {
                pending_space = true;
            }
        }
        out
    }

    /// Build a tenant-scoped query cache key
    pub fn query(tenant_id: &str, query: &str) -> String {
        format!("{}:{}", tenant_id, normalize_query(query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_key_normalization() {
        assert_eq!(
            keys::query("t1", "  What's the AVERAGE -- delivery time?? "),
            "t1:what s the average delivery time"
        );
        assert_eq!(keys::query("t1", "a,b"), keys::query("t1", "A  b!"));
        assert_ne!(keys::query("t1", "hello"), keys::query("t2", "hello"));
    }

    #[tokio::test]
    async fn test_fifo_eviction_keeps_newest() {
        let n = 4;
        let cache = FifoCache::new(n, 1, None);
        for i in 0..=n {
            cache.insert(format!("k{}", i), i).await;
        }

        assert_eq!(cache.get("k0").await, None);
        for i in 1..=n {
            assert_eq!(cache.get(&format!("k{}", i)).await, Some(i));
        }
        assert_eq!(cache.len().await, n);
    }

    #[tokio::test]
    async fn test_batch_eviction_never_exceeds_cap() {
        let cache = FifoCache::new(10, 3, None);
        for i in 0..25 {
            cache.insert(format!("k{}", i), i).await;
            assert!(cache.len().await <= 10);
        }
        assert_eq!(cache.get("k24").await, Some(24));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_inserts_respect_cap() {
        let cache = std::sync::Arc::new(FifoCache::new(16, 4, None));

        let writers: Vec<_> = (0..8)
            .map(|w| {
                let cache = cache.clone();
                tokio::spawn(async move {
                    for i in 0..100 {
                        cache.insert(format!("w{}-{}", w, i), i).await;
                        assert!(cache.len().await <= 16);
                    }
                })
            })
            .collect();

        for writer in writers {
            writer.await.unwrap();
        }
        let len = cache.len().await;
        assert!(len > 0 && len <= 16);
    }

    #[tokio::test]
    async fn test_reinsert_does_not_grow() {
        let cache = FifoCache::new(2, 1, None);
        cache.insert("a".into(), 1).await;
        cache.insert("a".into(), 2).await;
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get("a").await, Some(2));
    }

    #[tokio::test]
    async fn test_expired_entries_miss() {
        let cache = FifoCache::new(2, 1, Some(Duration::from_millis(0)));
        cache.insert("a".into(), 1).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(cache.get("a").await, None);
    }
}

use std::collections::BTreeMap;
use std::time::Duration;

use rustc_hash::FxHashMap;
use tokio::time::Instant;

use crate::CacheKey;

/// A value saved in the [`ResultCache`].
#[derive(Clone, Debug)]
pub struct CacheEntry<V> {
    /// The actual data.
    pub value: V,
    /// When this entry was written.
    pub stored_at: Instant,
    /// How long after `stored_at` the entry stays valid.
    pub ttl: Duration,
}

impl<V> CacheEntry<V> {
    /// Whether this entry may still be served at `now`.
    pub fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) < self.ttl
    }
}

/// A time-expiring map from [`CacheKey`] to values, with an optional size bound.
///
/// Expiry is lazy: a stale entry is only removed when it is read (or on an explicit
/// [`purge_expired`](Self::purge_expired)).
///
/// When bounded, the cache evicts the entry that was *inserted* first once it is full. Reads
/// do not influence the eviction order, and overwriting an existing key keeps its original
/// position, so this is FIFO and not LRU.
#[derive(Debug)]
pub struct ResultCache<V> {
    entries: FxHashMap<CacheKey, (u64, CacheEntry<V>)>,
    /// Insertion order, from oldest to newest.
    order: BTreeMap<u64, CacheKey>,
    next_seq: u64,
    max_size: Option<usize>,
}

impl<V> ResultCache<V> {
    /// Creates an empty cache, optionally bounded to `max_size` entries.
    pub fn new(max_size: Option<usize>) -> Self {
        Self {
            entries: Default::default(),
            order: BTreeMap::new(),
            next_seq: 0,
            max_size,
        }
    }

    /// Looks up `key`, returning its value if the entry is still fresh.
    ///
    /// A stale entry is removed as part of the lookup.
    pub fn try_get(&mut self, key: &CacheKey) -> Option<V>
    where
        V: Clone,
    {
        let (seq, entry) = self.entries.get(key)?;
        if entry.is_fresh(Instant::now()) {
            return Some(entry.value.clone());
        }

        let seq = *seq;
        tracing::trace!(%key, "Removing expired cache entry");
        self.entries.remove(key);
        self.order.remove(&seq);
        None
    }

    /// Inserts or replaces the entry for `key`, returning the key evicted to make room, if any.
    pub fn set(&mut self, key: CacheKey, value: V, ttl: Duration) -> Option<CacheKey> {
        let entry = CacheEntry {
            value,
            stored_at: Instant::now(),
            ttl,
        };

        if let Some((_, existing)) = self.entries.get_mut(&key) {
            *existing = entry;
            return None;
        }

        let mut evicted = None;
        if let Some(max_size) = self.max_size {
            if max_size == 0 {
                return None;
            }
            while self.entries.len() >= max_size {
                match self.evict_oldest() {
                    Some(key) => evicted = Some(key),
                    None => break,
                }
            }
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert(seq, key.clone());
        self.entries.insert(key, (seq, entry));

        evicted
    }

    fn evict_oldest(&mut self) -> Option<CacheKey> {
        let (_, key) = self.order.pop_first()?;
        self.entries.remove(&key);
        tracing::trace!(%key, "Evicted oldest cache entry");
        Some(key)
    }

    /// Removes a single entry, returning whether it existed.
    pub fn remove(&mut self, key: &CacheKey) -> bool {
        match self.entries.remove(key) {
            Some((seq, _)) => {
                self.order.remove(&seq);
                true
            }
            None => false,
        }
    }

    /// Removes all entries whose key contains `pattern`, or all entries for `None`.
    ///
    /// Returns the number of removed entries.
    pub fn invalidate(&mut self, pattern: Option<&str>) -> usize {
        let Some(pattern) = pattern else {
            let removed = self.entries.len();
            self.entries.clear();
            self.order.clear();
            return removed;
        };

        let before = self.entries.len();
        let order = &mut self.order;
        self.entries.retain(|key, (seq, _)| {
            let keep = !key.contains(pattern);
            if !keep {
                order.remove(seq);
            }
            keep
        });
        before - self.entries.len()
    }

    /// Eagerly removes all stale entries, returning how many were removed.
    pub fn purge_expired(&mut self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        let order = &mut self.order;
        self.entries.retain(|_, (seq, entry)| {
            let keep = entry.is_fresh(now);
            if !keep {
                order.remove(seq);
            }
            keep
        });
        before - self.entries.len()
    }

    /// Whether an entry for `key` is stored, fresh or not.
    ///
    /// Unlike [`try_get`](Self::try_get), this does not expire anything.
    pub fn contains_key(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    /// The keys in insertion order, oldest first.
    pub fn keys(&self) -> impl Iterator<Item = &CacheKey> {
        self.order.values()
    }

    /// The number of stored entries, including stale ones not yet removed.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use tokio::time;

    use super::*;

    fn key(k: &str) -> CacheKey {
        CacheKey::from_raw(k)
    }

    #[tokio::test(start_paused = true)]
    async fn test_hit_until_ttl() {
        let mut cache = ResultCache::new(None);
        cache.set(key("a"), 1, Duration::from_millis(100));

        assert_eq!(cache.try_get(&key("a")), Some(1));
        time::advance(Duration::from_millis(99)).await;
        assert_eq!(cache.try_get(&key("a")), Some(1));

        time::advance(Duration::from_millis(1)).await;
        assert_eq!(cache.try_get(&key("a")), None);
        // the stale read removed the entry
        assert!(!cache.contains_key(&key("a")));
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_judges_map_scenario() {
        let mut cache = ResultCache::new(None);
        let judges: BTreeMap<&str, &str> = [("j1", "Alice")].into();
        cache.set(key("judges_map"), judges.clone(), Duration::from_millis(3_600_000));

        assert_eq!(cache.try_get(&key("judges_map")), Some(judges));

        time::advance(Duration::from_millis(3_600_001)).await;
        assert_eq!(cache.try_get(&key("judges_map")), None);
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_resets_age() {
        let mut cache = ResultCache::new(None);
        let ttl = Duration::from_millis(100);
        cache.set(key("a"), "v1", ttl);

        time::advance(Duration::from_millis(60)).await;
        cache.set(key("a"), "v2", ttl);
        assert_eq!(cache.try_get(&key("a")), Some("v2"));

        // 120ms after the first write, but only 60ms after the second
        time::advance(Duration::from_millis(60)).await;
        assert_eq!(cache.try_get(&key("a")), Some("v2"));

        time::advance(Duration::from_millis(40)).await;
        assert_eq!(cache.try_get(&key("a")), None);
    }

    #[tokio::test]
    async fn test_evicts_oldest_inserted() {
        let mut cache = ResultCache::new(Some(3));
        let ttl = Duration::from_secs(60);
        assert_eq!(cache.set(key("a"), 1, ttl), None);
        assert_eq!(cache.set(key("b"), 2, ttl), None);
        assert_eq!(cache.set(key("c"), 3, ttl), None);

        // reading does not protect `a` from eviction, this is not an LRU
        assert_eq!(cache.try_get(&key("a")), Some(1));

        assert_eq!(cache.set(key("d"), 4, ttl), Some(key("a")));
        assert_eq!(cache.len(), 3);
        assert!(!cache.contains_key(&key("a")));
        let keys: Vec<_> = cache.keys().map(CacheKey::as_str).collect();
        assert_eq!(keys, ["b", "c", "d"]);
    }

    #[tokio::test]
    async fn test_overwrite_at_capacity_does_not_evict() {
        let mut cache = ResultCache::new(Some(2));
        let ttl = Duration::from_secs(60);
        cache.set(key("a"), 1, ttl);
        cache.set(key("b"), 2, ttl);

        assert_eq!(cache.set(key("a"), 10, ttl), None);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.try_get(&key("a")), Some(10));

        // `a` keeps its original insertion position
        assert_eq!(cache.set(key("c"), 3, ttl), Some(key("a")));
    }

    #[tokio::test]
    async fn test_zero_capacity_stores_nothing() {
        let mut cache = ResultCache::new(Some(0));
        cache.set(key("a"), 1, Duration::from_secs(60));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_invalidate() {
        let mut cache = ResultCache::new(None);
        let ttl = Duration::from_secs(60);
        cache.set(key("search_a"), 1, ttl);
        cache.set(key("search_b"), 2, ttl);
        cache.set(key("judges_map"), 3, ttl);

        assert_eq!(cache.invalidate(Some("search")), 2);
        assert_eq!(cache.keys().count(), 1);
        assert_eq!(cache.try_get(&key("judges_map")), Some(3));

        assert_eq!(cache.invalidate(None), 1);
        assert!(cache.is_empty());
        assert_eq!(cache.keys().count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let mut cache = ResultCache::new(None);
        cache.set(key("short"), 1, Duration::from_millis(10));
        cache.set(key("long"), 2, Duration::from_secs(10));

        time::advance(Duration::from_millis(20)).await;
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.keys().count(), 1);
    }
}

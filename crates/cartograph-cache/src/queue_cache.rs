//! Cost-bounded queue cache with promotion on hit.
//!
//! The cache keeps its keys in four FIFO queues. New entries enter
//! queue 1; every hit promotes the entry one queue higher, up to
//! queue 4. When the total cost exceeds the configured maximum, entries
//! are evicted from the lowest-numbered non-empty queue, oldest first,
//! so one-shot entries churn through queue 1 while repeatedly used
//! entries climb out of eviction's way.
//!
//! An [`EvictionPolicy`] distinguishes the two ways an entry can leave
//! the cache: `about_to_be_removed` runs for explicit removal (and for
//! replacement and `clear`), `about_to_be_evicted` for cost-pressure
//! eviction. The disk tier uses the distinction to decide whether an
//! entry's destructor may delete the backing file.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::Arc;

/// Number of promotion queues.
pub const QUEUE_COUNT: usize = 4;

/// Hook invoked when entries leave a [`QueueCache`].
pub trait EvictionPolicy<K, V> {
    /// The entry is being removed deliberately (removal, replacement,
    /// clear). Side effects tied to real eviction must be suppressed.
    fn about_to_be_removed(&self, _key: &K, _value: &Arc<V>) {}

    /// The entry is being evicted under cost pressure.
    fn about_to_be_evicted(&self, _key: &K, _value: &Arc<V>) {}
}

/// Policy with no side effects, for tiers whose entries own no external
/// resources.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPolicy;

impl<K, V> EvictionPolicy<K, V> for NoPolicy {}

/// Hit/miss/eviction counters for one cache tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups that found an entry.
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// Entries inserted.
    pub insertions: u64,
    /// Entries evicted under cost pressure.
    pub evictions: u64,
}

impl CacheStats {
    /// Fraction of lookups that hit, in `[0, 1]`.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct CacheEntry<V> {
    value: Arc<V>,
    cost: u64,
    queue: usize,
}

/// The queue cache. See the module documentation for the eviction
/// discipline.
pub struct QueueCache<K, V, P = NoPolicy> {
    map: HashMap<K, CacheEntry<V>>,
    queues: [VecDeque<K>; QUEUE_COUNT],
    max_cost: u64,
    total_cost: u64,
    policy: P,
    stats: CacheStats,
}

impl<K, V, P> QueueCache<K, V, P>
where
    K: Eq + Hash + Clone,
    P: EvictionPolicy<K, V>,
{
    /// Create a cache with the given cost bound and eviction policy.
    pub fn with_policy(max_cost: u64, policy: P) -> Self {
        Self {
            map: HashMap::new(),
            queues: Default::default(),
            max_cost,
            total_cost: 0,
            policy,
            stats: CacheStats::default(),
        }
    }

    /// Look up a key, promoting the entry one queue on a hit.
    pub fn get(&mut self, key: &K) -> Option<Arc<V>> {
        let Some(entry) = self.map.get(key) else {
            self.stats.misses += 1;
            return None;
        };
        self.stats.hits += 1;

        let queue = entry.queue;
        let value = Arc::clone(&entry.value);

        if queue + 1 < QUEUE_COUNT {
            Self::detach(&mut self.queues[queue], key);
            self.queues[queue + 1].push_back(key.clone());
            if let Some(entry) = self.map.get_mut(key) {
                entry.queue = queue + 1;
            }
        }

        Some(value)
    }

    /// Look up a key without touching queue positions or statistics.
    pub fn peek(&self, key: &K) -> Option<Arc<V>> {
        self.map.get(key).map(|e| Arc::clone(&e.value))
    }

    /// Insert a value with the given cost into queue 1, then evict down
    /// to the cost bound. Replacing an existing key counts as removal
    /// of the old entry, not eviction.
    pub fn insert(&mut self, key: K, value: Arc<V>, cost: u64) {
        if let Some(old) = self.map.remove(&key) {
            self.policy.about_to_be_removed(&key, &old.value);
            Self::detach(&mut self.queues[old.queue], &key);
            self.total_cost -= old.cost;
        }

        self.queues[0].push_back(key.clone());
        self.map.insert(
            key,
            CacheEntry {
                value,
                cost,
                queue: 0,
            },
        );
        self.total_cost += cost;
        self.stats.insertions += 1;

        self.shrink();
    }

    /// Remove an entry deliberately. Returns the value if present.
    pub fn remove(&mut self, key: &K) -> Option<Arc<V>> {
        let entry = self.map.remove(key)?;
        self.policy.about_to_be_removed(key, &entry.value);
        Self::detach(&mut self.queues[entry.queue], key);
        self.total_cost -= entry.cost;
        Some(entry.value)
    }

    /// Remove every entry with removal semantics.
    pub fn clear(&mut self) {
        let keys: Vec<K> = self.map.keys().cloned().collect();
        for key in keys {
            self.remove(&key);
        }
    }

    /// Change the cost bound, evicting immediately if it shrank.
    pub fn set_max_cost(&mut self, max_cost: u64) {
        self.max_cost = max_cost;
        self.shrink();
    }

    /// The configured cost bound.
    pub fn max_cost(&self) -> u64 {
        self.max_cost
    }

    /// Sum of the costs of all resident entries.
    pub fn total_cost(&self) -> u64 {
        self.total_cost
    }

    /// Number of resident entries.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Whether the key is resident.
    pub fn contains(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    /// Snapshot of all resident keys, unordered.
    pub fn keys(&self) -> Vec<K> {
        self.map.keys().cloned().collect()
    }

    /// Counters for this tier.
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// The entries of queue `index` (1-based), oldest first, for the
    /// shutdown manifest.
    pub fn serialize_queue(&self, index: usize) -> Vec<(K, Arc<V>)> {
        assert!((1..=QUEUE_COUNT).contains(&index));
        self.queues[index - 1]
            .iter()
            .filter_map(|k| self.map.get(k).map(|e| (k.clone(), Arc::clone(&e.value))))
            .collect()
    }

    /// Rebuild queue `index` (1-based) from a startup manifest,
    /// appending entries in the given order. Keys already resident are
    /// skipped. Evicts down to the cost bound afterwards.
    pub fn deserialize_queue(&mut self, index: usize, entries: Vec<(K, Arc<V>, u64)>) {
        assert!((1..=QUEUE_COUNT).contains(&index));
        for (key, value, cost) in entries {
            if self.map.contains_key(&key) {
                continue;
            }
            self.queues[index - 1].push_back(key.clone());
            self.map.insert(
                key,
                CacheEntry {
                    value,
                    cost,
                    queue: index - 1,
                },
            );
            self.total_cost += cost;
        }
        self.shrink();
    }

    fn detach(queue: &mut VecDeque<K>, key: &K) {
        if let Some(pos) = queue.iter().position(|k| k == key) {
            queue.remove(pos);
        }
    }

    fn shrink(&mut self) {
        while self.total_cost > self.max_cost {
            let Some(key) = self
                .queues
                .iter_mut()
                .find(|q| !q.is_empty())
                .and_then(VecDeque::pop_front)
            else {
                break;
            };

            if let Some(entry) = self.map.remove(&key) {
                self.policy.about_to_be_evicted(&key, &entry.value);
                self.total_cost -= entry.cost;
                self.stats.evictions += 1;
            }
        }
    }
}

impl<K, V> QueueCache<K, V, NoPolicy>
where
    K: Eq + Hash + Clone,
{
    /// Create a cache with the default (no-op) eviction policy.
    pub fn new(max_cost: u64) -> Self {
        Self::with_policy(max_cost, NoPolicy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn insert_then_get() {
        let mut cache: QueueCache<u32, &str> = QueueCache::new(100);
        cache.insert(1, Arc::new("one"), 10);
        assert_eq!(cache.get(&1).as_deref(), Some(&"one"));
        assert!(cache.get(&2).is_none());
        assert_eq!(cache.total_cost(), 10);
    }

    #[test]
    fn eviction_pulls_from_first_queue_oldest_first() {
        let mut cache: QueueCache<u32, u32> = QueueCache::new(30);
        cache.insert(1, Arc::new(1), 10);
        cache.insert(2, Arc::new(2), 10);
        cache.insert(3, Arc::new(3), 10);

        cache.insert(4, Arc::new(4), 10);
        assert!(!cache.contains(&1));
        assert!(cache.contains(&2));
        assert!(cache.contains(&4));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn hits_promote_out_of_the_eviction_queue() {
        let mut cache: QueueCache<u32, u32> = QueueCache::new(30);
        cache.insert(1, Arc::new(1), 10);
        cache.insert(2, Arc::new(2), 10);
        cache.insert(3, Arc::new(3), 10);

        // Promote 1 to queue 2; the oldest queue-1 entry is now 2.
        cache.get(&1);
        cache.insert(4, Arc::new(4), 10);

        assert!(cache.contains(&1));
        assert!(!cache.contains(&2));
    }

    #[test]
    fn promotion_caps_at_the_top_queue() {
        let mut cache: QueueCache<u32, u32> = QueueCache::new(100);
        cache.insert(1, Arc::new(1), 1);
        for _ in 0..10 {
            cache.get(&1);
        }
        let q4 = cache.serialize_queue(4);
        assert_eq!(q4.len(), 1);
        assert_eq!(q4[0].0, 1);
    }

    #[test]
    fn queue_round_trip() {
        let mut cache: QueueCache<u32, u32> = QueueCache::new(100);
        cache.insert(1, Arc::new(1), 1);
        cache.insert(2, Arc::new(2), 1);
        cache.get(&2);

        let q1: Vec<u32> = cache.serialize_queue(1).into_iter().map(|(k, _)| k).collect();
        let q2: Vec<u32> = cache.serialize_queue(2).into_iter().map(|(k, _)| k).collect();
        assert_eq!(q1, vec![1]);
        assert_eq!(q2, vec![2]);

        let mut restored: QueueCache<u32, u32> = QueueCache::new(100);
        restored.deserialize_queue(1, vec![(1, Arc::new(1), 1)]);
        restored.deserialize_queue(2, vec![(2, Arc::new(2), 1)]);
        assert!(restored.contains(&1));
        assert_eq!(restored.serialize_queue(2).len(), 1);
    }

    struct CountingPolicy {
        removed: AtomicUsize,
        evicted: AtomicUsize,
    }

    impl EvictionPolicy<u32, u32> for &CountingPolicy {
        fn about_to_be_removed(&self, _key: &u32, _value: &Arc<u32>) {
            self.removed.fetch_add(1, Ordering::Relaxed);
        }
        fn about_to_be_evicted(&self, _key: &u32, _value: &Arc<u32>) {
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn policy_distinguishes_removal_from_eviction() {
        let policy = CountingPolicy {
            removed: AtomicUsize::new(0),
            evicted: AtomicUsize::new(0),
        };
        let mut cache: QueueCache<u32, u32, &CountingPolicy> =
            QueueCache::with_policy(20, &policy);

        cache.insert(1, Arc::new(1), 10);
        cache.insert(2, Arc::new(2), 10);
        cache.remove(&1);
        assert_eq!(policy.removed.load(Ordering::Relaxed), 1);
        assert_eq!(policy.evicted.load(Ordering::Relaxed), 0);

        cache.insert(3, Arc::new(3), 10);
        cache.insert(4, Arc::new(4), 10);
        assert_eq!(policy.evicted.load(Ordering::Relaxed), 1);

        // Replacement is a removal, not an eviction.
        cache.insert(4, Arc::new(40), 10);
        assert_eq!(policy.removed.load(Ordering::Relaxed), 2);
        assert_eq!(policy.evicted.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn shrinking_the_bound_evicts() {
        let mut cache: QueueCache<u32, u32> = QueueCache::new(100);
        for i in 0..10 {
            cache.insert(i, Arc::new(i), 10);
        }
        cache.set_max_cost(30);
        assert_eq!(cache.len(), 3);
        assert!(cache.total_cost() <= 30);
    }
}

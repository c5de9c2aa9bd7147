//! Fixed-capacity LRU mapping.
//!
//! Backs the scan-cursor stores, the SPOP pop counters and the per-key
//! write statistics. Recency order is tracked with a monotonic tick so
//! the map stays a plain `HashMap` plus an ordered index.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

/// LRU cache with a hard entry cap; inserting past capacity evicts the
/// least recently touched entry.
#[derive(Debug)]
pub struct LruCache<K, V> {
    capacity: usize,
    tick: u64,
    map: HashMap<K, (u64, V)>,
    order: BTreeMap<u64, K>,
}

impl<K: Clone + Eq + Hash, V: Clone> LruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            tick: 0,
            map: HashMap::new(),
            order: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Fetch and refresh recency.
    pub fn lookup(&mut self, key: &K) -> Option<V> {
        let tick = self.next_tick();
        let entry = self.map.get_mut(key)?;
        self.order.remove(&entry.0);
        entry.0 = tick;
        self.order.insert(tick, key.clone());
        Some(entry.1.clone())
    }

    /// Insert or overwrite, evicting the coldest entry when full.
    pub fn insert(&mut self, key: K, value: V) {
        let tick = self.next_tick();
        if let Some((old_tick, _)) = self.map.insert(key.clone(), (tick, value)) {
            self.order.remove(&old_tick);
        }
        self.order.insert(tick, key);
        while self.map.len() > self.capacity {
            if let Some((&coldest, _)) = self.order.iter().next() {
                if let Some(victim) = self.order.remove(&coldest) {
                    self.map.remove(&victim);
                }
            }
        }
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let (tick, value) = self.map.remove(key)?;
        self.order.remove(&tick);
        Some(value)
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.order.clear();
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_lookup_remove() {
        let mut cache = LruCache::new(4);
        cache.insert("a", 1);
        cache.insert("b", 2);
        assert_eq!(cache.lookup(&"a"), Some(1));
        assert_eq!(cache.remove(&"b"), Some(2));
        assert_eq!(cache.lookup(&"b"), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_eviction_order() {
        let mut cache = LruCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        // touch "a" so "b" becomes the coldest
        assert_eq!(cache.lookup(&"a"), Some(1));
        cache.insert("c", 3);
        assert_eq!(cache.lookup(&"b"), None);
        assert_eq!(cache.lookup(&"a"), Some(1));
        assert_eq!(cache.lookup(&"c"), Some(3));
    }

    #[test]
    fn test_overwrite_keeps_len() {
        let mut cache = LruCache::new(2);
        cache.insert("a", 1);
        cache.insert("a", 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.lookup(&"a"), Some(2));
    }
}

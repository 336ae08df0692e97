//! Bounded cache
//!
//! Fixed-capacity memoization used by the scoring strategies for expensive
//! posterior and bootstrap computations. Entries are pure functions of the
//! bound sketch and model, so eviction changes performance, never results;
//! the oldest entry is dropped when the cache is full.
use core::hash::Hash;
use hashbrown::HashMap;
use std::collections::VecDeque;

pub struct BoundedCache<K, V> {
    map: HashMap<K, V>,
    order: VecDeque<K>,
    capacity: usize,
}

impl<K, V> BoundedCache<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new(capacity: usize) -> Self {
        BoundedCache {
            map: HashMap::with_capacity(capacity.min(1024)),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.map.get(key)
    }

    pub fn insert(&mut self, key: K, value: V) {
        if self.map.insert(key.clone(), value).is_none() {
            self.order.push_back(key);
            if self.order.len() > self.capacity {
                if let Some(evicted) = self.order.pop_front() {
                    self.map.remove(&evicted);
                }
            }
        }
    }

    /// Drop every cached entry. Used when the underlying model is mutated,
    /// e.g. by a change of aggregation rule.
    pub fn invalidate(&mut self) {
        self.map.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

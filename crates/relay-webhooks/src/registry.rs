//! Capacity-bounded map that evicts the oldest inserted key when full.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

#[derive(Debug)]
pub struct BoundedMap<K, V> {
    capacity: usize,
    entries: HashMap<K, V>,
    order: VecDeque<K>,
}

impl<K: Eq + Hash + Clone, V> BoundedMap<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert or replace. Replacing keeps the original creation order.
    /// Returns the entry evicted to make room, if any.
    pub fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(existing) = self.entries.get_mut(&key) {
            *existing = value;
            return None;
        }

        let evicted = if self.entries.len() >= self.capacity {
            self.evict_oldest()
        } else {
            None
        };

        self.order.push_back(key.clone());
        self.entries.insert(key, value);
        evicted
    }

    /// Fetch the value for `key`, creating it with `make` if absent.
    pub fn get_or_insert_with(&mut self, key: K, make: impl FnOnce() -> V) -> &V {
        if !self.entries.contains_key(&key) {
            self.insert(key.clone(), make());
        }
        // present after the insert above
        &self.entries[&key]
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let value = self.entries.remove(key)?;
        self.order.retain(|k| k != key);
        Some(value)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.order.iter().filter_map(|k| self.entries.get(k))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    fn evict_oldest(&mut self) -> Option<(K, V)> {
        while let Some(oldest) = self.order.pop_front() {
            if let Some(value) = self.entries.remove(&oldest) {
                return Some((oldest, value));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_least_recently_created() {
        let mut map = BoundedMap::new(2);
        map.insert("a", 1);
        map.insert("b", 2);
        // replacing does not refresh creation order
        map.insert("a", 10);

        let evicted = map.insert("c", 3);

        assert_eq!(evicted, Some(("a", 10)));
        assert_eq!(map.len(), 2);
        assert!(map.contains_key(&"b"));
        assert!(map.contains_key(&"c"));
    }

    #[test]
    fn test_get_or_insert_with_only_creates_once() {
        let mut map = BoundedMap::new(4);
        let mut created = 0;
        for _ in 0..3 {
            map.get_or_insert_with("k", || {
                created += 1;
                created
            });
        }
        assert_eq!(created, 1);
        assert_eq!(map.get(&"k"), Some(&1));
    }

    #[test]
    fn test_remove_then_reinsert() {
        let mut map = BoundedMap::new(2);
        map.insert(1, "one");
        map.insert(2, "two");
        assert_eq!(map.remove(&1), Some("one"));

        assert_eq!(map.insert(3, "three"), None);
        assert_eq!(map.values().copied().collect::<Vec<_>>(), vec!["two", "three"]);
    }
}

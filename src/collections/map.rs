//! Immutable array map.
//!
//! Entries are kept in insertion order in a shared, copy-on-write array.
//! Lookups are linear, which is the right trade-off for the small maps that
//! literals and metadata produce. Every update returns a new map and leaves
//! the original untouched.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::iter::FromIterator;
use std::sync::Arc;

pub struct Map<K, V> {
    entries: Arc<Vec<(K, V)>>,
}

impl<K, V> Clone for Map<K, V> {
    fn clone(&self) -> Self {
        Self { entries: self.entries.clone() }
    }
}

impl<K, V> Map<K, V> {
    pub fn new() -> Self {
        Self { entries: Arc::new(Vec::new()) }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over the bindings in insertion order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (&K, &V)> + '_ {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> + '_ {
        self.entries.iter().map(|(k, _)| k)
    }
}

impl<K: PartialEq, V> Map<K, V> {
    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }
}

impl<K: PartialEq + Clone, V: Clone> Map<K, V> {
    /// Binds `key` to `value`, replacing an existing binding in place.
    ///
    /// ```
    /// use ember::collections::Map;
    ///
    /// let m1 = Map::new().insert("a", 1);
    /// let m2 = m1.insert("a", 2);
    /// assert_eq!(m1.get(&"a"), Some(&1));
    /// assert_eq!(m2.get(&"a"), Some(&2));
    /// ```
    pub fn insert(&self, key: K, value: V) -> Self {
        let mut entries = self.entries.as_ref().clone();
        match entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => entries.push((key, value)),
        }
        Self { entries: Arc::new(entries) }
    }

    /// Binds `key` only if it is absent. Returns `None` on a duplicate key.
    pub fn insert_new(&self, key: K, value: V) -> Option<Self> {
        if self.contains_key(&key) {
            return None;
        }
        let mut entries = self.entries.as_ref().clone();
        entries.push((key, value));
        Some(Self { entries: Arc::new(entries) })
    }

    pub fn remove(&self, key: &K) -> Self {
        if !self.contains_key(key) {
            return self.clone();
        }
        let entries = self.entries.iter().filter(|(k, _)| k != key).cloned().collect();
        Self { entries: Arc::new(entries) }
    }

    /// Merges `other` into `self`; bindings in `other` win.
    pub fn merge(&self, other: &Self) -> Self {
        other.iter().fold(self.clone(), |acc, (k, v)| acc.insert(k.clone(), v.clone()))
    }
}

impl<K, V> Default for Map<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: PartialEq, V: PartialEq> PartialEq for Map<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|(k, v)| other.get(k) == Some(v))
    }
}

impl<K: Eq, V: Eq> Eq for Map<K, V> {}

impl<K: Hash, V: Hash> Hash for Map<K, V> {
    /// Order-independent, so maps equal by content hash equally.
    fn hash<H: Hasher>(&self, state: &mut H) {
        use std::collections::hash_map::DefaultHasher;
        let mut acc: u64 = 0;
        for (k, v) in self.iter() {
            let mut entry = DefaultHasher::new();
            k.hash(&mut entry);
            v.hash(&mut entry);
            acc = acc.wrapping_add(entry.finish());
        }
        self.len().hash(state);
        acc.hash(state);
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for Map<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K: PartialEq + Clone, V: Clone> FromIterator<(K, V)> for Map<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter().fold(Map::new(), |map, (k, v)| map.insert(k, v))
    }
}

//! Immutable set implemented on top of [`Map`].
//!
//! Elements are stored as keys with a `()` value, so the set inherits the
//! map's insertion-order iteration and copy-on-write sharing.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::iter::FromIterator;

use crate::collections::map::Map;

pub struct Set<T> {
    map: Map<T, ()>,
}

impl<T> Clone for Set<T> {
    fn clone(&self) -> Self {
        Self { map: self.map.clone() }
    }
}

impl<T> Set<T> {
    pub fn new() -> Self {
        Self { map: Map::new() }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Returns an iterator over the elements in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.map.keys()
    }
}

impl<T: PartialEq> Set<T> {
    pub fn contains(&self, value: &T) -> bool {
        self.map.contains_key(value)
    }
}

impl<T: PartialEq + Clone> Set<T> {
    pub fn insert(&self, value: T) -> Self {
        Self { map: self.map.insert(value, ()) }
    }

    /// Adds `value` only if it is absent. Returns `None` on a duplicate.
    pub fn insert_new(&self, value: T) -> Option<Self> {
        self.map.insert_new(value, ()).map(|map| Self { map })
    }

    pub fn remove(&self, value: &T) -> Self {
        Self { map: self.map.remove(value) }
    }
}

impl<T> Default for Set<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: PartialEq> PartialEq for Set<T> {
    fn eq(&self, other: &Self) -> bool {
        self.map == other.map
    }
}

impl<T: Eq> Eq for Set<T> {}

impl<T: Hash> Hash for Set<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.map.hash(state)
    }
}

impl<T: fmt::Debug> fmt::Debug for Set<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl<T: PartialEq + Clone> FromIterator<T> for Set<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        iter.into_iter().fold(Set::new(), |set, item| set.insert(item))
    }
}

//! Key → record tables whose lookups never miss.
//!
//! Every key maps to a record; keys that were never written, or were reset,
//! map to the record type's absent sentinel. Writing the sentinel frees the
//! slot, so storage grows only with live records.

use std::collections::HashMap;
use std::hash::Hash;

/// A record type with a distinguished "absent" value.
pub trait Sentinel: Copy + PartialEq {
    const ABSENT: Self;

    fn is_absent(&self) -> bool {
        *self == Self::ABSENT
    }
}

#[derive(Debug, Clone)]
pub struct Table<K, V> {
    slots: HashMap<K, V>,
}

impl<K: Eq + Hash, V: Sentinel> Default for Table<K, V> {
    fn default() -> Self {
        Self {
            slots: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash, V: Sentinel> Table<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// The record at `key`, or `V::ABSENT`.
    pub fn get(&self, key: &K) -> V {
        self.slots.get(key).copied().unwrap_or(V::ABSENT)
    }

    pub fn set(&mut self, key: K, value: V) {
        if value.is_absent() {
            self.slots.remove(&key);
        } else {
            self.slots.insert(key, value);
        }
    }

    pub fn reset(&mut self, key: &K) {
        self.slots.remove(key);
    }

    /// Number of non-absent records.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

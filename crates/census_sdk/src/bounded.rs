//! Fixed-capacity buffers with drop-oldest eviction.
//!
//! Every per-span collection (attributes, annotations, message events, links) and
//! the dispatcher's export queue sit in one of these. Inserting past capacity evicts
//! the single oldest element and bumps a drop counter, so memory stays bounded no
//! matter how chatty the instrumented code is.
//!
//! ```
//! use census_sdk::bounded::BoundedList;
//!
//! let mut list = BoundedList::new(2);
//! list.add(1);
//! list.add(2);
//! list.add(3);
//!
//! let snapshot = list.snapshot();
//! assert_eq!(snapshot.items, vec![2, 3]);
//! assert_eq!(snapshot.dropped_count, 1);
//! ```

use crate::invariants::{debug_assert_bounded_len, debug_assert_dropped_monotonic};
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// Owned, ordered copy of a bounded buffer's contents.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundedSnapshot<T> {
    /// Retained items, oldest first.
    pub items: Vec<T>,
    /// Number of items evicted since creation or the last `clear()`.
    pub dropped_count: u32,
}

/// Ordered list that evicts its oldest element on overflow.
#[derive(Debug, Clone)]
pub struct BoundedList<T> {
    items: VecDeque<T>,
    capacity: usize,
    dropped_count: u32,
}

impl<T> BoundedList<T> {
    /// Creates an empty list. A capacity of zero drops every insertion.
    pub fn new(capacity: usize) -> Self {
        Self {
            // Don't preallocate huge queues up front
            items: VecDeque::with_capacity(capacity.min(64)),
            capacity,
            dropped_count: 0,
        }
    }

    /// Appends `item`, evicting the oldest element if the list is full.
    pub fn add(&mut self, item: T) {
        let before = self.dropped_count;

        if self.capacity == 0 {
            self.dropped_count = self.dropped_count.saturating_add(1);
            debug_assert_dropped_monotonic!(before, self.dropped_count);
            return;
        }

        if self.items.len() == self.capacity {
            self.items.pop_front();
            self.dropped_count = self.dropped_count.saturating_add(1);
        }
        self.items.push_back(item);

        debug_assert_bounded_len!(self.items.len(), self.capacity);
        debug_assert_dropped_monotonic!(before, self.dropped_count);
    }

    /// Removes and returns every retained item, oldest first.
    ///
    /// The drop counter is left alone.
    pub fn drain(&mut self) -> Vec<T> {
        self.items.drain(..).collect()
    }

    /// Empties the list and resets the drop counter.
    pub fn clear(&mut self) {
        self.items.clear();
        self.dropped_count = 0;
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn dropped_count(&self) -> u32 {
        self.dropped_count
    }

    /// Iterates retained items, oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.items.iter()
    }
}

impl<T: Clone> BoundedList<T> {
    /// Copies the current contents. Later mutations are not reflected.
    pub fn snapshot(&self) -> BoundedSnapshot<T> {
        BoundedSnapshot {
            items: self.items.iter().cloned().collect(),
            dropped_count: self.dropped_count,
        }
    }
}

/// Key/value map bounded by insertion age.
///
/// Re-putting an existing key replaces its value in place. The key keeps its
/// original age and nothing is dropped.
#[derive(Debug, Clone)]
pub struct BoundedMap<K, V> {
    entries: HashMap<K, V>,
    order: VecDeque<K>,
    capacity: usize,
    dropped_count: u32,
}

impl<K: Eq + Hash + Clone, V> BoundedMap<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity.min(64)),
            order: VecDeque::with_capacity(capacity.min(64)),
            capacity,
            dropped_count: 0,
        }
    }

    /// Inserts or replaces `key`, evicting the oldest key if a new one overflows.
    pub fn put(&mut self, key: K, value: V) {
        let before = self.dropped_count;

        if let Some(existing) = self.entries.get_mut(&key) {
            *existing = value;
            return;
        }

        if self.capacity == 0 {
            self.dropped_count = self.dropped_count.saturating_add(1);
            return;
        }

        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
            self.dropped_count = self.dropped_count.saturating_add(1);
        }
        self.order.push_back(key.clone());
        self.entries.insert(key, value);

        debug_assert_bounded_len!(self.entries.len(), self.capacity);
        debug_assert_dropped_monotonic!(before, self.dropped_count);
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
        self.dropped_count = 0;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn dropped_count(&self) -> u32 {
        self.dropped_count
    }
}

impl<K: Eq + Hash + Clone, V: Clone> BoundedMap<K, V> {
    /// Copies the current entries, oldest key first.
    pub fn snapshot(&self) -> BoundedSnapshot<(K, V)> {
        let items = self
            .order
            .iter()
            .filter_map(|k| self.entries.get(k).map(|v| (k.clone(), v.clone())))
            .collect();
        BoundedSnapshot {
            items,
            dropped_count: self.dropped_count,
        }
    }
}

//! Cache Store Module
//!
//! Byte-bounded LRU store. Entries live in an arena of slots addressed by
//! stable indices; recency order is a doubly linked list threaded through
//! the slots by index, and a hash index maps each key to its slot.
//!
//! ```text
//! index: key ──▶ slot
//!
//! head (MRU)                                  tail (LRU)
//!   slot 3 ◀──▶ slot 0 ◀──▶ slot 5 ◀──▶ slot 1
//! ```
//!
//! Freed slots go on a free list and are reused by later inserts, so a slot
//! index stays valid for as long as its entry is cached.

use std::collections::HashMap;

use bytes::Bytes;

use crate::cache::{CacheEntry, CacheStats};

/// Index of a slot in the arena.
type SlotId = usize;

#[derive(Debug)]
struct Node {
    entry: CacheEntry,
    prev: Option<SlotId>,
    next: Option<SlotId>,
}

/// Result of an insert attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Stored at the head; `evicted` entries were removed from the tail.
    Stored { evicted: usize },
    /// Replaced an existing entry for the same key.
    Replaced { evicted: usize },
    /// Payload is too large to cache; nothing changed.
    Rejected,
}

impl InsertOutcome {
    pub fn is_stored(&self) -> bool {
        !matches!(self, InsertOutcome::Rejected)
    }
}

// == Cache Store ==
/// Recency-ordered response cache bounded by total payload bytes.
#[derive(Debug)]
pub struct CacheStore {
    /// Entry arena; `None` marks a free slot
    slots: Vec<Option<Node>>,
    /// Vacant slot indices available for reuse
    free: Vec<SlotId>,
    /// Key to slot lookup
    index: HashMap<String, SlotId>,
    /// Most recently used
    head: Option<SlotId>,
    /// Least recently used
    tail: Option<SlotId>,
    /// Sum of all payload sizes
    total_size: usize,
    max_cache_size: usize,
    max_object_size: usize,
    stats: CacheStats,
}

impl CacheStore {
    // == Constructor ==
    /// Creates an empty store.
    ///
    /// # Arguments
    /// * `max_cache_size` - Upper bound on the sum of payload sizes
    /// * `max_object_size` - Payloads of this size or larger are never stored
    pub fn new(max_cache_size: usize, max_object_size: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            head: None,
            tail: None,
            total_size: 0,
            max_cache_size,
            max_object_size,
            stats: CacheStats::new(),
        }
    }

    // == Lookup ==
    /// Returns the payload cached for `key` and promotes it to most recently
    /// used. The returned `Bytes` shares the stored buffer.
    pub fn lookup(&mut self, key: &str) -> Option<Bytes> {
        match self.index.get(key).copied() {
            Some(slot) => {
                self.unlink(slot);
                self.push_front(slot);
                self.stats.record_hit();
                Some(self.node(slot).entry.payload.clone())
            }
            None => {
                self.stats.record_miss();
                None
            }
        }
    }

    /// Whether `key` is cached, without touching recency.
    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Whether a payload of `size` bytes may be stored at all.
    pub fn accepts(&self, size: usize) -> bool {
        size < self.max_object_size && size <= self.max_cache_size
    }

    // == Insert ==
    /// Stores `payload` under `key` at the head of the recency order.
    ///
    /// An existing entry for the key is removed first. Entries are then
    /// evicted from the tail, one at a time, until the payload fits.
    pub fn insert(&mut self, key: String, payload: Bytes) -> InsertOutcome {
        let size = payload.len();
        if !self.accepts(size) {
            self.stats.record_rejection();
            return InsertOutcome::Rejected;
        }

        let replaced = self.remove(&key).is_some();

        let mut evicted = 0;
        while self.total_size + size > self.max_cache_size {
            if self.evict_lru().is_none() {
                break;
            }
            evicted += 1;
        }

        let node = Node {
            entry: CacheEntry::new(key.clone(), payload),
            prev: None,
            next: None,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(node);
                slot
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };
        self.push_front(slot);
        self.index.insert(key, slot);
        self.total_size += size;
        self.stats.record_insertion();

        if replaced {
            InsertOutcome::Replaced { evicted }
        } else {
            InsertOutcome::Stored { evicted }
        }
    }

    // == Remove ==
    /// Removes the entry for `key`, if any.
    pub fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let slot = self.index.get(key).copied()?;
        Some(self.release(slot))
    }

    // == Evict ==
    /// Removes and returns the least recently used entry.
    pub fn evict_lru(&mut self) -> Option<CacheEntry> {
        let slot = self.tail?;
        let entry = self.release(slot);
        self.stats.record_eviction();
        Some(entry)
    }

    /// Keys ordered from most to least recently used.
    pub fn keys_by_recency(&self) -> Vec<&str> {
        let mut keys = Vec::with_capacity(self.index.len());
        let mut cursor = self.head;
        while let Some(slot) = cursor {
            let node = self.node(slot);
            keys.push(node.entry.key.as_str());
            cursor = node.next;
        }
        keys
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.clone();
        stats.set_occupancy(self.index.len(), self.total_size);
        stats
    }

    /// Sum of all cached payload sizes.
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    pub fn max_cache_size(&self) -> usize {
        self.max_cache_size
    }

    pub fn max_object_size(&self) -> usize {
        self.max_object_size
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    // == Slot Management ==

    /// Unlinks `slot`, drops it from the index and returns its entry.
    fn release(&mut self, slot: SlotId) -> CacheEntry {
        self.unlink(slot);
        let node = match self.slots[slot].take() {
            Some(node) => node,
            None => unreachable!("indexed slot {slot} is vacant"),
        };
        self.free.push(slot);
        self.index.remove(&node.entry.key);
        self.total_size -= node.entry.size();
        node.entry
    }

    fn unlink(&mut self, slot: SlotId) {
        let (prev, next) = {
            let node = self.node(slot);
            (node.prev, node.next)
        };
        match prev {
            Some(p) => self.node_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.node_mut(n).prev = prev,
            None => self.tail = prev,
        }
        let node = self.node_mut(slot);
        node.prev = None;
        node.next = None;
    }

    fn push_front(&mut self, slot: SlotId) {
        let old_head = self.head;
        {
            let node = self.node_mut(slot);
            node.prev = None;
            node.next = old_head;
        }
        match old_head {
            Some(h) => self.node_mut(h).prev = Some(slot),
            None => self.tail = Some(slot),
        }
        self.head = Some(slot);
    }

    fn node(&self, slot: SlotId) -> &Node {
        match &self.slots[slot] {
            Some(node) => node,
            None => unreachable!("linked slot {slot} is vacant"),
        }
    }

    fn node_mut(&mut self, slot: SlotId) -> &mut Node {
        match &mut self.slots[slot] {
            Some(node) => node,
            None => unreachable!("linked slot {slot} is vacant"),
        }
    }
}

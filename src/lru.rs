//! Bounded least-recently-used memo of piece → token ids.
//!
//! Nodes live in an arena and link to each other by index, so promotion and
//! eviction are O(1) without shared mutable references. An evicted node's
//! slot is reused by the insert that displaced it.

use std::num::NonZeroUsize;

use rustc_hash::FxHashMap;

use crate::Rank;

const NIL: usize = usize::MAX;

#[derive(Debug, Clone)]
struct Node {
    key: String,
    value: Vec<Rank>,
    prev: usize,
    next: usize,
}

#[derive(Debug, Clone)]
pub struct LruCache {
    capacity: NonZeroUsize,
    index: FxHashMap<String, usize>,
    nodes: Vec<Node>,
    head: usize,
    tail: usize,
}

impl LruCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        LruCache {
            capacity,
            index: FxHashMap::default(),
            nodes: Vec::new(),
            head: NIL,
            tail: NIL,
        }
    }

    /// Look up `key`, marking it most recently used on a hit.
    pub fn get(&mut self, key: &str) -> Option<&[Rank]> {
        let idx = *self.index.get(key)?;
        self.move_to_head(idx);
        Some(&self.nodes[idx].value)
    }

    /// Insert or update `key` as the most recently used entry, evicting the
    /// least recently used one if the cache is over capacity.
    pub fn insert(&mut self, key: &str, value: Vec<Rank>) {
        if let Some(&idx) = self.index.get(key) {
            self.nodes[idx].value = value;
            self.move_to_head(idx);
            return;
        }

        let idx = if self.nodes.len() < self.capacity.get() {
            self.nodes.push(Node {
                key: key.to_owned(),
                value,
                prev: NIL,
                next: NIL,
            });
            self.nodes.len() - 1
        } else {
            let idx = self.tail;
            self.unlink(idx);
            let node = &mut self.nodes[idx];
            let evicted = std::mem::replace(&mut node.key, key.to_owned());
            node.value = value;
            self.index.remove(&evicted);
            idx
        };

        self.index.insert(key.to_owned(), idx);
        self.push_front(idx);
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn capacity(&self) -> NonZeroUsize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.index.clear();
        self.nodes.clear();
        self.head = NIL;
        self.tail = NIL;
    }

    fn move_to_head(&mut self, idx: usize) {
        if self.head == idx {
            return;
        }
        self.unlink(idx);
        self.push_front(idx);
    }

    fn push_front(&mut self, idx: usize) {
        self.nodes[idx].prev = NIL;
        self.nodes[idx].next = self.head;
        if self.head != NIL {
            self.nodes[self.head].prev = idx;
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = (self.nodes[idx].prev, self.nodes[idx].next);
        if prev != NIL {
            self.nodes[prev].next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            self.nodes[next].prev = prev;
        } else {
            self.tail = prev;
        }
        self.nodes[idx].prev = NIL;
        self.nodes[idx].next = NIL;
    }
}

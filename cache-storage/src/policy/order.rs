//! Shared ordering primitives behind the six policy variants.
//!
//! A monotonically increasing sequence counter plus an ordered map keyed by
//! that counter is a faithful realization of an intrusive doubly linked list
//! in safe Rust, provided the externally observable eviction order and
//! tie-breaks hold exactly. [`LinkedOrder`] is
//! that realization, shared by LRU, MRU, and FIFO (they differ only in which
//! end `evict` removes from and whether `hit`/`track` re-sequences a key).
//! [`CountOrder`] is the equivalent for LFU/MFU's count-bucketed ordering.

use cache_core::CacheKey;
use rand::Rng;
use std::collections::{BTreeMap, HashMap, VecDeque};

/// A doubly-linked-list-equivalent ordering: a monotonic sequence counter and
/// an ordered map from sequence to key, with a reverse index for O(log n)
/// relocation. The lowest sequence is the "head" (oldest / least-recently
/// touched); the highest is the "tail" (newest / most-recently touched).
#[derive(Debug, Clone, Default)]
pub struct LinkedOrder {
    next_seq: u64,
    by_seq: BTreeMap<u64, CacheKey>,
    seq_of: HashMap<CacheKey, u64>,
}

impl LinkedOrder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.seq_of.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.by_seq.len()
    }

    /// Insert `key` at the tail if absent; a no-op if already tracked. Used
    /// by FIFO's `track`, which must never reposition an existing key.
    pub fn insert_if_absent_at_tail(&mut self, key: &CacheKey) -> bool {
        if self.seq_of.contains_key(key) {
            return false;
        }
        self.push_tail(key.clone());
        true
    }

    /// Move `key` to the tail, inserting it if it wasn't already tracked.
    /// Used by LRU/MRU's `track` (new key becomes newest) and `hit`
    /// (promote to most-recent).
    pub fn move_to_tail(&mut self, key: &CacheKey) {
        if let Some(seq) = self.seq_of.remove(key) {
            self.by_seq.remove(&seq);
        }
        self.push_tail(key.clone());
    }

    fn push_tail(&mut self, key: CacheKey) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.seq_of.insert(key.clone(), seq);
        self.by_seq.insert(seq, key);
    }

    pub fn remove(&mut self, key: &CacheKey) -> bool {
        if let Some(seq) = self.seq_of.remove(key) {
            self.by_seq.remove(&seq);
            true
        } else {
            false
        }
    }

    /// Oldest / least-recently-touched key.
    pub fn head(&self) -> Option<CacheKey> {
        self.by_seq.values().next().cloned()
    }

    /// Newest / most-recently-touched key.
    pub fn tail(&self) -> Option<CacheKey> {
        self.by_seq.values().next_back().cloned()
    }

    /// Ascending order (oldest..newest) for snapshotting.
    pub fn ordered_keys(&self) -> Vec<CacheKey> {
        self.by_seq.values().cloned().collect()
    }

    /// Rebuild from a dumped ordering (oldest..newest), discarding any key
    /// not present in `valid_keys`.
    pub fn rebuild(keys: &[CacheKey], valid_keys: &std::collections::HashSet<CacheKey>) -> Self {
        let mut order = Self::new();
        for key in keys {
            if valid_keys.contains(key) {
                order.push_tail(key.clone());
            }
        }
        order
    }
}

/// Count-bucketed ordering shared by LFU (evict lowest count, front of
/// bucket) and MFU (evict highest count, back of bucket). Each bucket is a
/// `VecDeque` preserving the order keys entered that count, which realizes
/// "insertion order within count" without a manually cached low/high-water
/// mark: `BTreeMap`'s ordered iteration already gives the current extreme in
/// O(log n) for free.
#[derive(Debug, Clone, Default)]
pub struct CountOrder {
    count_of: HashMap<CacheKey, u64>,
    buckets: BTreeMap<u64, VecDeque<CacheKey>>,
}

impl CountOrder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.count_of.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.count_of.len()
    }

    /// Start tracking `key` at hit-count zero. No-op if already tracked.
    pub fn insert_if_absent(&mut self, key: &CacheKey) -> bool {
        if self.count_of.contains_key(key) {
            return false;
        }
        self.count_of.insert(key.clone(), 0);
        self.buckets.entry(0).or_default().push_back(key.clone());
        true
    }

    /// Increment `key`'s hit count, moving it to the back of the new count's
    /// bucket. No-op if `key` isn't tracked.
    pub fn increment(&mut self, key: &CacheKey) {
        let Some(count) = self.count_of.get(key).copied() else {
            return;
        };
        self.remove_from_bucket(count, key);
        let new_count = count + 1;
        self.count_of.insert(key.clone(), new_count);
        self.buckets
            .entry(new_count)
            .or_default()
            .push_back(key.clone());
    }

    pub fn remove(&mut self, key: &CacheKey) -> bool {
        let Some(count) = self.count_of.remove(key) else {
            return false;
        };
        self.remove_from_bucket(count, key);
        true
    }

    fn remove_from_bucket(&mut self, count: u64, key: &CacheKey) {
        if let Some(bucket) = self.buckets.get_mut(&count) {
            if let Some(pos) = bucket.iter().position(|k| k == key) {
                bucket.remove(pos);
            }
            if bucket.is_empty() {
                self.buckets.remove(&count);
            }
        }
    }

    /// Front of the lowest-count bucket (LFU's victim).
    pub fn front_of_lowest(&self) -> Option<CacheKey> {
        self.buckets.iter().next().and_then(|(_, b)| b.front().cloned())
    }

    /// Back of the highest-count bucket (MFU's victim).
    pub fn back_of_highest(&self) -> Option<CacheKey> {
        self.buckets.iter().next_back().and_then(|(_, b)| b.back().cloned())
    }

    /// `(key, count)` pairs in bucket order (ascending count, insertion
    /// order within a count), for snapshotting.
    pub fn ordered_entries(&self) -> Vec<(CacheKey, u64)> {
        self.buckets
            .iter()
            .flat_map(|(count, bucket)| bucket.iter().map(move |k| (k.clone(), *count)))
            .collect()
    }

    pub fn rebuild(
        entries: &[(CacheKey, u64)],
        valid_keys: &std::collections::HashSet<CacheKey>,
    ) -> Self {
        let mut order = Self::new();
        for (key, count) in entries {
            if valid_keys.contains(key) {
                order.count_of.insert(key.clone(), *count);
                order.buckets.entry(*count).or_default().push_back(key.clone());
            }
        }
        order
    }
}

/// An unordered set of tracked keys with O(1) random access, used by RR's
/// uniform random eviction.
#[derive(Debug, Clone, Default)]
pub struct SetOrder {
    keys: Vec<CacheKey>,
    pos: HashMap<CacheKey, usize>,
}

impl SetOrder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.pos.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn insert_if_absent(&mut self, key: &CacheKey) -> bool {
        if self.pos.contains_key(key) {
            return false;
        }
        self.pos.insert(key.clone(), self.keys.len());
        self.keys.push(key.clone());
        true
    }

    pub fn remove(&mut self, key: &CacheKey) -> bool {
        let Some(idx) = self.pos.remove(key) else {
            return false;
        };
        let last = self.keys.len() - 1;
        self.keys.swap(idx, last);
        self.keys.pop();
        if idx < self.keys.len() {
            self.pos.insert(self.keys[idx].clone(), idx);
        }
        true
    }

    /// Uniformly pick a tracked key without removing it.
    pub fn random_key(&self, rng: &mut impl rand::Rng) -> Option<CacheKey> {
        if self.keys.is_empty() {
            return None;
        }
        let idx = rng.gen_range(0..self.keys.len());
        Some(self.keys[idx].clone())
    }

    pub fn all_keys(&self) -> Vec<CacheKey> {
        self.keys.clone()
    }

    pub fn rebuild(keys: &[CacheKey], valid_keys: &std::collections::HashSet<CacheKey>) -> Self {
        let mut order = Self::new();
        for key in keys {
            if valid_keys.contains(key) {
                order.insert_if_absent(key);
            }
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn k(s: &str) -> CacheKey {
        CacheKey(s.to_string())
    }

    #[test]
    fn linked_order_head_tail() {
        let mut order = LinkedOrder::new();
        order.move_to_tail(&k("a"));
        order.move_to_tail(&k("b"));
        order.move_to_tail(&k("c"));
        assert_eq!(order.head(), Some(k("a")));
        assert_eq!(order.tail(), Some(k("c")));
        order.move_to_tail(&k("a"));
        assert_eq!(order.head(), Some(k("b")));
        assert_eq!(order.tail(), Some(k("a")));
    }

    #[test]
    fn fifo_insert_does_not_reposition() {
        let mut order = LinkedOrder::new();
        order.insert_if_absent_at_tail(&k("a"));
        order.insert_if_absent_at_tail(&k("b"));
        order.insert_if_absent_at_tail(&k("a"));
        assert_eq!(order.head(), Some(k("a")));
        assert_eq!(order.ordered_keys(), vec![k("a"), k("b")]);
    }

    #[test]
    fn count_order_lfu_tie_break() {
        let mut order = CountOrder::new();
        order.insert_if_absent(&k("a"));
        order.insert_if_absent(&k("b"));
        order.insert_if_absent(&k("c"));
        order.increment(&k("b"));
        order.increment(&k("b"));
        order.increment(&k("c"));
        assert_eq!(order.front_of_lowest(), Some(k("a")));
        order.remove(&k("a"));
        assert_eq!(order.front_of_lowest(), Some(k("c")));
    }

    #[test]
    fn count_order_mfu_picks_back_of_highest() {
        let mut order = CountOrder::new();
        order.insert_if_absent(&k("a"));
        order.insert_if_absent(&k("b"));
        order.increment(&k("a"));
        order.increment(&k("b"));
        assert_eq!(order.back_of_highest(), Some(k("b")));
    }
}

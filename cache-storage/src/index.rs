//! Per-policy invalidation index: invalidation key → set of cache keys that
//! declared it in their `invalidatedBy`.

use cache_core::{CacheKey, InvalidationKey};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvalidationIndex {
    by_invalidation_key: HashMap<InvalidationKey, HashSet<CacheKey>>,
}

impl InvalidationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `cache_key` is covered by `invalidation_key` (called on
    /// `set`, once per identifier in `options.invalidatedBy`).
    pub fn link(&mut self, invalidation_key: InvalidationKey, cache_key: CacheKey) {
        self.by_invalidation_key
            .entry(invalidation_key)
            .or_default()
            .insert(cache_key);
    }

    /// Cache keys currently covered by `invalidation_key`.
    pub fn cache_keys_for(&self, invalidation_key: &InvalidationKey) -> Vec<CacheKey> {
        self.by_invalidation_key
            .get(invalidation_key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop the whole `invalidation_key` mapping, returning the cache keys
    /// it covered (used by `invalidate`, which evicts every one of them).
    pub fn take(&mut self, invalidation_key: &InvalidationKey) -> Vec<CacheKey> {
        self.by_invalidation_key
            .remove(invalidation_key)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default()
    }

    /// On any eviction path, remove `cache_key` from every invalidation key
    /// it appears under, dropping keys whose set becomes empty.
    pub fn unlink_cache_key(&mut self, invalidation_keys: &[InvalidationKey], cache_key: &CacheKey) {
        for invalidation_key in invalidation_keys {
            if let Some(set) = self.by_invalidation_key.get_mut(invalidation_key) {
                set.remove(cache_key);
                if set.is_empty() {
                    self.by_invalidation_key.remove(invalidation_key);
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.by_invalidation_key.is_empty()
    }

    pub fn len(&self) -> usize {
        self.by_invalidation_key.len()
    }
}

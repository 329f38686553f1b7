//! Structured identifiers and their stable digests.
//!
//! An [`Identifier`] is the tree clients hand the cache in place of a flat
//! string key: strings, numbers, booleans, arrays (order matters) and maps
//! (order doesn't). Hashing it deterministically is what lets two processes
//! — or the same process before and after a restart — agree on which cache
//! key a given identifier maps to.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A structured identifier: the recursive tree clients hand the cache in
/// place of a flat key. `serde_json::Value`'s `Map` is a `BTreeMap` in this
/// workspace (the `preserve_order` feature is never enabled), which already
/// gives us the order-insensitive map / order-sensitive array split we need
/// for canonical hashing — no custom tree type required.
pub type Identifier = serde_json::Value;

/// One-character tag distinguishing a cache key from an invalidation key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Cache,
    Invalidation,
}

impl KeyKind {
    fn prefix(self) -> &'static str {
        match self {
            KeyKind::Cache => "c.",
            KeyKind::Invalidation => "i.",
        }
    }
}

/// Digest an [`Identifier`] into a stable, prefixed string.
///
/// `serde_json::to_vec` is canonical here because the identifier's maps are
/// `BTreeMap`s (sorted by key) and its arrays preserve the caller's order, so
/// equal identifiers always serialize to equal bytes regardless of the order
/// fields were inserted in. SHA-256 gives 256 bits of collision resistance,
/// comfortably strong enough that accidental collisions are negligible.
pub fn digest(identifier: &Identifier, kind: KeyKind) -> String {
    let canonical = serde_json::to_vec(identifier).expect("Value serialization never fails");
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    let hash = hasher.finalize();
    format!("{}{}", kind.prefix(), hex::encode(hash))
}

/// Digest an identifier as a cache key (`c.<digest>`).
pub fn cache_key(identifier: &Identifier) -> String {
    digest(identifier, KeyKind::Cache)
}

/// Digest an identifier as an invalidation key (`i.<digest>`).
pub fn invalidation_key(identifier: &Identifier) -> String {
    digest(identifier, KeyKind::Invalidation)
}

/// Newtype wrapper so call sites can't accidentally pass a cache key where an
/// invalidation key is expected, or vice versa — both are plain `String`s on
/// the wire, so the type system is the only thing keeping them apart.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CacheKey(pub String);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InvalidationKey(pub String);

impl CacheKey {
    pub fn from_identifier(identifier: &Identifier) -> Self {
        Self(cache_key(identifier))
    }
}

impl InvalidationKey {
    pub fn from_identifier(identifier: &Identifier) -> Self {
        Self(invalidation_key(identifier))
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for InvalidationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

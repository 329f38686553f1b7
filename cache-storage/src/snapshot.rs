//! Binary snapshot format and atomic on-disk writes.
//!
//! A snapshot is `{ caches: { [policy]: map<cacheKey, entry> }, policies:
//! { [policy]: opaque } }`, encoded with `bincode`. `bincode` round-trips
//! `BTreeMap` through serde's `serialize_map` calls rather than through a
//! struct's fixed field layout, so a real `Map` is structurally
//! distinguishable on the wire from a plain record — a typed round-trip
//! falls out of using Rust's native collection types instead of re-deriving
//! it by hand. `BTreeMap` rather than `HashMap`: both `PolicyKind` and
//! `CacheKey` already derive `Ord`, and encoding in a canonical key order
//! is what makes `encode(decode(bytes)) == bytes` for unchanged state —
//! a `HashMap`'s iteration order depends on its `RandomState` seed and
//! would make the snapshot file churn on every write even when nothing
//! changed.

use crate::policy::{PolicyKind, PolicySnapshot};
use cache_core::{CacheKey, Entry, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

/// One driver's complete durable state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub caches: BTreeMap<PolicyKind, BTreeMap<CacheKey, Entry>>,
    pub policies: BTreeMap<PolicyKind, PolicySnapshot>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Encode a snapshot to its binary form.
pub fn encode(snapshot: &Snapshot) -> Result<Vec<u8>> {
    bincode::serialize(snapshot).map_err(|e| Error::Codec(e.to_string()))
}

/// Decode a snapshot from its binary form. An empty byte slice decodes to
/// `None`, representing "no state" — an empty file is a valid snapshot.
pub fn decode(bytes: &[u8]) -> Result<Option<Snapshot>> {
    if bytes.is_empty() {
        return Ok(None);
    }
    bincode::deserialize(bytes)
        .map(Some)
        .map_err(|e| Error::Codec(e.to_string()))
}

/// Atomically write `snapshot` to `path`: encode, write to a sibling temp
/// file in the same directory, then rename over the target. The rename is
/// what makes this atomic — a reader never observes a partially written
/// file, and a crash mid-write leaves the previous snapshot intact.
pub fn write_atomic(path: &Path, snapshot: &Snapshot) -> Result<()> {
    let bytes = encode(snapshot)?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(&bytes)?;
    tmp.flush()?;
    tmp.persist(path)
        .map_err(|e| Error::FilesystemIo(e.error))?;
    Ok(())
}

/// Read and decode the snapshot at `path`. A missing file is treated the
/// same as an empty one (`None`) rather than an error, since the very first
/// run of a fresh driver has no snapshot yet.
pub fn read(path: &Path) -> Result<Option<Snapshot>> {
    match std::fs::read(path) {
        Ok(bytes) => decode(&bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::FilesystemIo(e)),
    }
}

//! The entry record stored under each cache key, and the options that shape it.

use crate::identifier::Identifier;
use crate::ports::Clock;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-entry overrides a caller may supply on `set`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EntryOptions {
    /// Milliseconds until expiration; `0` means "never expires".
    #[serde(default)]
    pub ttl: u64,
    /// Identifiers whose invalidation keys should also expire this entry.
    #[serde(default)]
    pub invalidated_by: Vec<Identifier>,
}

/// A stored cache entry. `data` is opaque — the engine never interprets it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entry {
    pub identifier: Identifier,
    pub data: Vec<u8>,
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
    pub hits: u64,
    pub ctime: DateTime<Utc>,
    pub atime: DateTime<Utc>,
    pub options: EntryOptions,
}

impl Entry {
    /// Build a fresh entry. `ctime == atime`, `hits == 0`, and `options`
    /// falls back to `EntryOptions::default()` for any field the caller left
    /// unset (ttl 0, no invalidation tags) — matching the "merged with
    /// caller overrides" construction rule.
    pub fn new(
        clock: &dyn Clock,
        identifier: Identifier,
        data: Vec<u8>,
        metadata: Option<serde_json::Map<String, serde_json::Value>>,
        options: EntryOptions,
    ) -> Self {
        let now = clock.now();
        Self {
            identifier,
            data,
            metadata,
            hits: 0,
            ctime: now,
            atime: now,
            options,
        }
    }

    /// Serialized length used for size accounting and admission.
    /// Bincode gives a stable, allocation-cheap length without writing to disk.
    pub fn serialized_len(&self) -> u64 {
        bincode::serialized_size(self).unwrap_or(0)
    }

    /// Whether this entry has already expired as of `now`, given its `ctime`
    /// and `ttl`. `ttl == 0` means "never expires".
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        if self.options.ttl == 0 {
            return false;
        }
        let expires_at = self.ctime + chrono::Duration::milliseconds(self.options.ttl as i64);
        expires_at <= now
    }

    /// Remaining time-to-live in milliseconds as of `now`; `0` if already expired
    /// or never expiring is not meaningful to ask for (callers should check
    /// `options.ttl == 0` first).
    pub fn remaining_ttl_ms(&self, now: DateTime<Utc>) -> u64 {
        if self.options.ttl == 0 {
            return 0;
        }
        let expires_at = self.ctime + chrono::Duration::milliseconds(self.options.ttl as i64);
        (expires_at - now).num_milliseconds().max(0) as u64
    }
}

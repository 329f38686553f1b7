//! Per-policy TTL timer ownership.
//!
//! Each policy owns a map from tracked key to an outstanding timer handle.
//! Registering a timer goes through the injected [`TimerScheduler`]; firing
//! posts a [`TtlEvent`] onto a channel the driver drains in a background
//! task, rather than calling back into policy state directly — timers are
//! not reentrant into the mutex-guarded policy state they describe.

use super::kind::PolicyKind;
use cache_core::{CacheKey, TimerHandle, TimerScheduler};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Posted when a registered TTL elapses without being cleared first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtlEvent {
    pub policy: PolicyKind,
    pub key: CacheKey,
}

pub struct TtlRegistry {
    policy: PolicyKind,
    scheduler: Arc<dyn TimerScheduler>,
    events_tx: mpsc::UnboundedSender<TtlEvent>,
    handles: HashMap<CacheKey, TimerHandle>,
}

impl TtlRegistry {
    pub fn new(
        policy: PolicyKind,
        scheduler: Arc<dyn TimerScheduler>,
        events_tx: mpsc::UnboundedSender<TtlEvent>,
    ) -> Self {
        Self {
            policy,
            scheduler,
            events_tx,
            handles: HashMap::new(),
        }
    }

    /// Register a TTL for `key`, cancelling any prior timer for the same key
    /// first — re-registering a TTL cancels the previous one.
    pub fn register(&mut self, key: CacheKey, duration: Duration) {
        self.clear(&key);
        let policy = self.policy;
        let tx = self.events_tx.clone();
        let event_key = key.clone();
        let handle = self.scheduler.schedule(
            duration,
            Box::new(move || {
                let _ = tx.send(TtlEvent {
                    policy,
                    key: event_key,
                });
            }),
        );
        self.handles.insert(key, handle);
    }

    /// Cancel `key`'s outstanding timer, if any. Idempotent: a second clear
    /// on a key with no pending timer is a no-op and returns `false`.
    pub fn clear(&mut self, key: &CacheKey) -> bool {
        match self.handles.remove(key) {
            Some(handle) => handle.cancel(),
            None => false,
        }
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.handles.contains_key(key)
    }
}

impl std::fmt::Debug for TtlRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlRegistry")
            .field("policy", &self.policy)
            .field("outstanding", &self.handles.len())
            .finish()
    }
}

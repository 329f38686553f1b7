//! The in-process memory driver.
//!
//! One [`parking_lot::Mutex`]-guarded [`PolicyState`] per policy: the
//! mutex-per-policy granularity means the entry table, invalidation index,
//! and the policy's own ordering structures all move together under one
//! lock. A mirrored `AtomicU64` per policy lets admission read every
//! *other* policy's current byte total without acquiring its mutex, which is
//! what keeps the common (no cross-policy eviction needed) path to a single
//! lock acquisition.

use crate::driver::{EvictionReason, PolicyUsage, ResourceUsage};
use crate::index::InvalidationIndex;
use crate::policy::{Policy, PolicyKind, TtlEvent};
use crate::snapshot::{self, Snapshot};
use cache_core::{
    CacheKey, Clock, Counter, Entry, EntryOptions, Error, Identifier, InvalidationKey, Level,
    LogFields, Logger, Result, Telemetry, TelemetryAttrs, TimerScheduler,
};
use cache_core::config::DriverConfig;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

struct PolicyState {
    policy: Policy,
    entries: HashMap<CacheKey, Entry>,
    invalidation: InvalidationIndex,
    bytes: u64,
}

/// A driver bound over in-process memory, with an optional background
/// snapshot writer.
pub struct MemoryDriver {
    config: DriverConfig,
    states: [Mutex<PolicyState>; 6],
    bytes_mirror: [AtomicU64; 6],
    clock: Arc<dyn Clock>,
    logger: Arc<dyn Logger>,
    telemetry: Arc<dyn Telemetry>,
    ttl_rx: Mutex<Option<mpsc::UnboundedReceiver<TtlEvent>>>,
}

impl MemoryDriver {
    pub fn new(
        config: DriverConfig,
        clock: Arc<dyn Clock>,
        scheduler: Arc<dyn TimerScheduler>,
        logger: Arc<dyn Logger>,
        telemetry: Arc<dyn Telemetry>,
        rng_seed: Option<u64>,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let states = PolicyKind::ALL.map(|kind| {
            Mutex::new(PolicyState {
                policy: Policy::new(kind, Arc::clone(&scheduler), tx.clone(), rng_seed),
                entries: HashMap::new(),
                invalidation: InvalidationIndex::new(),
                bytes: 0,
            })
        });
        Arc::new(Self {
            config,
            states,
            bytes_mirror: Default::default(),
            clock,
            logger,
            telemetry,
            ttl_rx: Mutex::new(Some(rx)),
        })
    }

    /// Start the background TTL drain task and, if recovery is enabled,
    /// replay the snapshot and start the periodic snapshot writer. Must be
    /// called once, on an `Arc`-wrapped driver, before serving traffic.
    pub fn init(self: &Arc<Self>) -> Result<()> {
        self.spawn_ttl_drain();
        if self.config.recovery.enabled {
            self.replay_snapshot()?;
            self.spawn_snapshot_writer();
        }
        Ok(())
    }

    fn attrs(&self, policy: PolicyKind, key: &CacheKey) -> TelemetryAttrs {
        TelemetryAttrs {
            driver: "memory",
            policy: policy.as_str().to_string(),
            hash: key.0.clone(),
        }
    }

    fn emit_eviction_telemetry(&self, policy: PolicyKind, key: &CacheKey, reason: EvictionReason) {
        let counter = match reason {
            EvictionReason::SizeLimit => Counter::CacheEvictionsSizeLimitTotal,
            EvictionReason::Ttl => Counter::CacheEvictionsTtlTotal,
            EvictionReason::Invalidation => Counter::CacheEvictionsInvalidationTotal,
            EvictionReason::Manual => return,
        };
        let attrs = self.attrs(policy, key);
        self.telemetry.incr_counter(Counter::CacheEvictionsTotal, &attrs);
        self.telemetry.incr_counter(counter, &attrs);
    }

    /// Remove `key` from `state` (policy ordering, entry table, invalidation
    /// index), updating byte counters and emitting eviction telemetry. A
    /// no-op if `key` isn't present.
    fn remove_entry_locked(
        &self,
        state: &mut PolicyState,
        policy: PolicyKind,
        key: &CacheKey,
        reason: EvictionReason,
    ) {
        // `Ttl` means the timer itself fired; any other reason removing a
        // key with a still-pending TTL is a `ttlCleared`, not a `ttlExpired`.
        let ttl_cleared = reason != EvictionReason::Ttl && state.policy.clear_ttl(key);
        state.policy.stop_tracking(key);
        if ttl_cleared {
            self.logger.log(
                Level::Debug,
                "ttlCleared",
                &LogFields::new().driver("memory").policy(policy.as_str()).hash(key.0.clone()),
            );
        }
        if let Some(entry) = state.entries.remove(key) {
            state.bytes = state.bytes.saturating_sub(entry.serialized_len());
            self.bytes_mirror[policy.index()].store(state.bytes, Ordering::Relaxed);
            let invalidation_keys: Vec<InvalidationKey> = entry
                .options
                .invalidated_by
                .iter()
                .map(InvalidationKey::from_identifier)
                .collect();
            state.invalidation.unlink_cache_key(&invalidation_keys, key);
            self.emit_eviction_telemetry(policy, key, reason);
        }
    }

    fn finish_set(&self, state: &mut PolicyState, policy: PolicyKind, key: CacheKey, entry: Entry) {
        state.policy.track(&key);
        if entry.options.ttl > 0 {
            state
                .policy
                .register_ttl(key.clone(), Duration::from_millis(entry.options.ttl));
        }
        for id in &entry.options.invalidated_by {
            state
                .invalidation
                .link(InvalidationKey::from_identifier(id), key.clone());
        }
        state.bytes += entry.serialized_len();
        self.bytes_mirror[policy.index()].store(state.bytes, Ordering::Relaxed);
        state.entries.insert(key, entry);
    }

    /// Sum of every *other* policy's mirrored byte count, read without
    /// locking any of them.
    fn other_bytes(&self, target: PolicyKind) -> u64 {
        PolicyKind::ALL
            .iter()
            .filter(|k| **k != target)
            .map(|k| self.bytes_mirror[k.index()].load(Ordering::Relaxed))
            .sum()
    }

    /// Admit `entry` of `size` bytes into `policy`'s table, evicting as
    /// needed. `state` is the already-locked target policy; on
    /// success the entry has been inserted and `state` reflects it.
    ///
    /// The fast path only ever holds `policy`'s own lock: it self-evicts
    /// until either there's room or the policy is empty, checking total size
    /// against the other five policies' lock-free byte mirrors each
    /// iteration — recomputed fresh every pass rather than cached, since the
    /// loop condition is "have we freed enough yet", not "have we freed one
    /// cache". Only if self-eviction alone can't make room, and
    /// `evictFromOthers` is set, does it drop its own lock and re-acquire
    /// *all six* policy mutexes in the fixed declared order before
    /// continuing — the one place in
    /// this driver where more than one policy mutex is ever held at once,
    /// and always in the same global order, so no interleaving of
    /// concurrent `set` calls across policies can deadlock.
    fn admit<'a>(
        &'a self,
        mut state: parking_lot::MutexGuard<'a, PolicyState>,
        policy: PolicyKind,
        size: u64,
    ) -> Result<parking_lot::MutexGuard<'a, PolicyState>> {
        loop {
            let total = state.bytes + self.other_bytes(policy);
            if total + size <= self.config.max_size {
                return Ok(state);
            }
            if let Some(victim) = state.policy.evict() {
                self.remove_entry_locked(&mut state, policy, &victim, EvictionReason::SizeLimit);
                continue;
            }
            break;
        }
        if !self.config.evict_from_others {
            return Err(Error::NoCachesToEvict {
                policy: policy.as_str().to_string(),
                size,
            });
        }
        drop(state);

        let mut guards: Vec<parking_lot::MutexGuard<PolicyState>> =
            PolicyKind::ALL.iter().map(|k| self.states[k.index()].lock()).collect();
        loop {
            let total: u64 = guards.iter().map(|g| g.bytes).sum();
            if total + size <= self.config.max_size {
                break;
            }
            // Target policy first, then the rest in declared order; stop at
            // the first eviction that actually frees anything so the size
            // condition is re-tested after every single victim, not after a
            // full sweep of the other five policies.
            let victim = guards[policy.index()].policy.evict().map(|key| (policy, key)).or_else(|| {
                PolicyKind::ALL.into_iter().filter(|&other| other != policy).find_map(|other| {
                    guards[other.index()].policy.evict().map(|key| (other, key))
                })
            });
            match victim {
                Some((victim_policy, victim_key)) => {
                    let g = &mut guards[victim_policy.index()];
                    self.remove_entry_locked(g, victim_policy, &victim_key, EvictionReason::SizeLimit);
                }
                None => {
                    return Err(Error::NoCachesToEvict {
                        policy: policy.as_str().to_string(),
                        size,
                    });
                }
            }
        }
        Ok(guards.swap_remove(policy.index()))
    }

    pub fn get(&self, identifier: &Identifier, policy: PolicyKind) -> Result<Option<Entry>> {
        let key = CacheKey::from_identifier(identifier);
        let attrs = self.attrs(policy, &key);
        self.telemetry.incr_counter(Counter::CacheLookupsTotal, &attrs);
        let mut state = self.states[policy.index()].lock();
        if !state.entries.contains_key(&key) {
            self.telemetry.incr_counter(Counter::CacheMissesTotal, &attrs);
            return Ok(None);
        }
        state.policy.hit(&key);
        let now = self.clock.now();
        let entry = state.entries.get_mut(&key).expect("just checked contains_key");
        entry.hits += 1;
        entry.atime = now;
        self.telemetry.incr_counter(Counter::CacheHitsTotal, &attrs);
        Ok(Some(entry.clone()))
    }

    pub fn set(
        &self,
        identifier: &Identifier,
        policy: PolicyKind,
        data: Vec<u8>,
        metadata: Option<serde_json::Map<String, serde_json::Value>>,
        options: EntryOptions,
        force: bool,
    ) -> Result<bool> {
        let key = CacheKey::from_identifier(identifier);
        let entry = Entry::new(self.clock.as_ref(), identifier.clone(), data, metadata, options);
        let size = entry.serialized_len();
        if size > self.config.max_size {
            return Err(Error::CacheTooBig {
                size,
                max_size: self.config.max_size,
            });
        }

        let mut state = self.states[policy.index()].lock();
        let already_present = state.entries.contains_key(&key);
        if already_present && !force {
            return Ok(false);
        }
        if already_present {
            self.remove_entry_locked(&mut state, policy, &key, EvictionReason::Manual);
        }

        let mut state = self.admit(state, policy, size)?;
        self.finish_set(&mut state, policy, key.clone(), entry);
        drop(state);
        self.telemetry
            .incr_counter(Counter::CachesCreatedTotal, &self.attrs(policy, &key));
        Ok(true)
    }

    pub fn delete(&self, identifier: &Identifier, policy: PolicyKind) -> Result<()> {
        let key = CacheKey::from_identifier(identifier);
        let mut state = self.states[policy.index()].lock();
        if !state.entries.contains_key(&key) {
            return Err(Error::NotFound);
        }
        self.remove_entry_locked(&mut state, policy, &key, EvictionReason::Manual);
        drop(state);
        self.telemetry
            .incr_counter(Counter::CachesDeletedTotal, &self.attrs(policy, &key));
        Ok(())
    }

    pub fn invalidate(&self, identifiers: &[Identifier], policy: PolicyKind) -> Result<()> {
        for identifier in identifiers {
            let invalidation_key = InvalidationKey::from_identifier(identifier);
            let mut state = self.states[policy.index()].lock();
            let cache_keys = state.invalidation.take(&invalidation_key);
            for cache_key in cache_keys {
                self.remove_entry_locked(&mut state, policy, &cache_key, EvictionReason::Invalidation);
            }
        }
        Ok(())
    }

    pub fn resource_usage(&self) -> ResourceUsage {
        let mut usage = ResourceUsage::default();
        for kind in PolicyKind::ALL {
            let state = self.states[kind.index()].lock();
            let bytes = state.bytes;
            let entries = state.entries.len() as u64;
            usage.total_bytes += bytes;
            usage.total_entries += entries;
            let fraction = if self.config.max_size > 0 {
                bytes as f64 / self.config.max_size as f64
            } else {
                0.0
            };
            usage.policies.insert(
                kind,
                PolicyUsage {
                    bytes,
                    entries,
                    fraction,
                },
            );
        }
        usage
    }

    fn replay_snapshot(&self) -> Result<()> {
        let path = self.config.recovery.snapshot_file_path.clone();
        let snapshot = match snapshot::read(&path) {
            Ok(maybe) => maybe,
            Err(e) => {
                let wrapped = Error::SnapshotReadFailed(e.to_string());
                self.logger.log(
                    Level::Warn,
                    &format!("snapshot read failed, starting empty: {wrapped}"),
                    &LogFields::new().driver("memory"),
                );
                None
            }
        };
        let Some(snapshot) = snapshot else {
            return Ok(());
        };
        let now = self.clock.now();
        for kind in PolicyKind::ALL {
            let Some(entries) = snapshot.caches.get(&kind) else {
                continue;
            };
            let mut state = self.states[kind.index()].lock();
            let mut valid_keys = std::collections::HashSet::new();
            for (key, entry) in entries {
                if entry.options.ttl > 0 && entry.is_expired_at(now) {
                    continue;
                }
                valid_keys.insert(key.clone());
                if entry.options.ttl > 0 {
                    let remaining = entry.remaining_ttl_ms(now).max(1);
                    state.policy.register_ttl(key.clone(), Duration::from_millis(remaining));
                }
                for id in &entry.options.invalidated_by {
                    state
                        .invalidation
                        .link(InvalidationKey::from_identifier(id), key.clone());
                }
                state.bytes += entry.serialized_len();
                state.entries.insert(key.clone(), entry.clone());
            }
            if let Some(policy_snapshot) = snapshot.policies.get(&kind) {
                state.policy.apply_snapshot(&valid_keys, policy_snapshot);
            }
            self.bytes_mirror[kind.index()].store(state.bytes, Ordering::Relaxed);
        }
        Ok(())
    }

    fn write_snapshot(&self) -> Result<()> {
        let mut snapshot = Snapshot::new();
        for kind in PolicyKind::ALL {
            let state = self.states[kind.index()].lock();
            let entries: std::collections::BTreeMap<CacheKey, Entry> =
                state.entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            snapshot.caches.insert(kind, entries);
            snapshot.policies.insert(kind, state.policy.snapshot());
        }
        snapshot::write_atomic(&self.config.recovery.snapshot_file_path, &snapshot)
    }

    fn spawn_ttl_drain(self: &Arc<Self>) {
        let driver = Arc::clone(self);
        let mut rx = driver
            .ttl_rx
            .lock()
            .take()
            .expect("init() called more than once");
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let mut state = driver.states[event.policy.index()].lock();
                if state.entries.contains_key(&event.key) {
                    driver.remove_entry_locked(&mut state, event.policy, &event.key, EvictionReason::Ttl);
                }
            }
        });
    }

    fn spawn_snapshot_writer(self: &Arc<Self>) {
        let driver = Arc::clone(self);
        let interval = driver.config.recovery.snapshot_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                ticker.tick().await;
                if let Err(e) = driver.write_snapshot() {
                    let wrapped = Error::SnapshotWriteFailed(e.to_string());
                    driver.logger.log(
                        Level::Warn,
                        &format!("snapshot write failed, retrying next interval: {wrapped}"),
                        &LogFields::new().driver("memory"),
                    );
                }
            }
        });
    }
}

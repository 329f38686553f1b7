//! The on-disk driver: one file per entry, plus a per-policy
//! invalidation-index file and TTL-table file, all guarded by filesystem
//! exclusive locks (`fs2`) rather than the in-memory-only guarantees the
//! memory driver relies on.
//!
//! Unlike the memory driver, entry *payloads* never live in process memory
//! between calls — only the policy's ordering state, the invalidation index,
//! and a lightweight `key → serialized size` map needed for admission
//! accounting do. Reading `data` back always re-reads the file.

use crate::driver::{EvictionReason, PolicyUsage, ResourceUsage};
use crate::index::InvalidationIndex;
use crate::policy::{Policy, PolicyKind, TtlEvent};
use cache_core::config::FileSystemDriverConfig;
use cache_core::{
    CacheKey, Clock, Counter, Entry, EntryOptions, Error, Identifier, InvalidationKey, Level,
    LogFields, Logger, Result, Telemetry, TelemetryAttrs, TimerScheduler,
};
use fs2::FileExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const INVALIDATION_FILE: &str = "invalidation-identifiers.dat";
const TTL_FILE: &str = "ttl.dat";

/// A file handle holding an exclusive filesystem lock for its lifetime,
/// released on drop regardless of how the holder exits, including error
/// paths.
struct LockedFile(File);

impl LockedFile {
    fn open_existing(path: &Path) -> std::io::Result<Option<Self>> {
        match OpenOptions::new().read(true).write(true).open(path) {
            Ok(file) => {
                file.lock_exclusive()?;
                Ok(Some(Self(file)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn create(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).create(true).open(path)?;
        file.lock_exclusive()?;
        Ok(Self(file))
    }
}

impl std::ops::Deref for LockedFile {
    type Target = File;
    fn deref(&self) -> &File {
        &self.0
    }
}

impl std::ops::DerefMut for LockedFile {
    fn deref_mut(&mut self) -> &mut File {
        &mut self.0
    }
}

impl Drop for LockedFile {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.0);
    }
}

struct DiskPolicyState {
    policy: Policy,
    invalidation: InvalidationIndex,
    /// Absolute expiration (epoch milliseconds), mirroring `ttl.dat`.
    ttl_table: HashMap<CacheKey, i64>,
    /// Last known serialized size of each tracked entry's file, for
    /// lock-free admission accounting without holding the entry's payload
    /// in memory.
    sizes: HashMap<CacheKey, u64>,
    bytes: u64,
}

/// A driver bound over a directory tree, one subdirectory per policy.
pub struct DiskDriver {
    config: FileSystemDriverConfig,
    states: [Mutex<DiskPolicyState>; 6],
    bytes_mirror: [AtomicU64; 6],
    clock: Arc<dyn Clock>,
    logger: Arc<dyn Logger>,
    telemetry: Arc<dyn Telemetry>,
    ttl_rx: Mutex<Option<mpsc::UnboundedReceiver<TtlEvent>>>,
}

impl DiskDriver {
    pub fn new(
        config: FileSystemDriverConfig,
        clock: Arc<dyn Clock>,
        scheduler: Arc<dyn TimerScheduler>,
        logger: Arc<dyn Logger>,
        telemetry: Arc<dyn Telemetry>,
        rng_seed: Option<u64>,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let states = PolicyKind::ALL.map(|kind| {
            Mutex::new(DiskPolicyState {
                policy: Policy::new(kind, Arc::clone(&scheduler), tx.clone(), rng_seed),
                invalidation: InvalidationIndex::new(),
                ttl_table: HashMap::new(),
                sizes: HashMap::new(),
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

    fn policy_dir(&self, policy: PolicyKind) -> PathBuf {
        self.config.mount_path.join(policy.as_str())
    }

    fn entry_path(&self, policy: PolicyKind, key: &CacheKey) -> PathBuf {
        self.policy_dir(policy).join(format!("{}.dat", key.0))
    }

    fn invalidation_path(&self, policy: PolicyKind) -> PathBuf {
        self.policy_dir(policy).join(INVALIDATION_FILE)
    }

    fn ttl_path(&self, policy: PolicyKind) -> PathBuf {
        self.policy_dir(policy).join(TTL_FILE)
    }

    fn attrs(&self, policy: PolicyKind, key: &CacheKey) -> TelemetryAttrs {
        TelemetryAttrs {
            driver: "disk",
            policy: policy.as_str().to_string(),
            hash: key.0.clone(),
        }
    }

    fn log_fields(&self, policy: PolicyKind, key: &CacheKey) -> LogFields {
        LogFields::new()
            .driver("disk")
            .policy(policy.as_str())
            .hash(key.0.clone())
    }

    fn read_entry(&self, policy: PolicyKind, key: &CacheKey) -> Result<Option<Entry>> {
        let path = self.entry_path(policy, key);
        let Some(mut file) = LockedFile::open_existing(&path).map_err(Error::FilesystemIo)? else {
            return Ok(None);
        };
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes).map_err(Error::FilesystemIo)?;
        if bytes.is_empty() {
            return Ok(None);
        }
        bincode::deserialize(&bytes)
            .map(Some)
            .map_err(|e| Error::Codec(e.to_string()))
    }

    fn write_entry(&self, policy: PolicyKind, key: &CacheKey, entry: &Entry) -> Result<()> {
        std::fs::create_dir_all(self.policy_dir(policy))?;
        let bytes = bincode::serialize(entry).map_err(|e| Error::Codec(e.to_string()))?;
        let mut file = LockedFile::create(&self.entry_path(policy, key)).map_err(Error::FilesystemIo)?;
        file.set_len(0).map_err(Error::FilesystemIo)?;
        file.seek(SeekFrom::Start(0)).map_err(Error::FilesystemIo)?;
        file.write_all(&bytes).map_err(Error::FilesystemIo)?;
        Ok(())
    }

    fn delete_entry_file(&self, policy: PolicyKind, key: &CacheKey) -> Result<()> {
        match std::fs::remove_file(self.entry_path(policy, key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::FilesystemIo(e)),
        }
    }

    fn read_invalidation(&self, policy: PolicyKind) -> Result<InvalidationIndex> {
        let Some(mut file) =
            LockedFile::open_existing(&self.invalidation_path(policy)).map_err(Error::FilesystemIo)?
        else {
            return Ok(InvalidationIndex::new());
        };
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes).map_err(Error::FilesystemIo)?;
        if bytes.is_empty() {
            return Ok(InvalidationIndex::new());
        }
        bincode::deserialize(&bytes).map_err(|e| Error::Codec(e.to_string()))
    }

    fn write_invalidation(&self, policy: PolicyKind, index: &InvalidationIndex) -> Result<()> {
        std::fs::create_dir_all(self.policy_dir(policy))?;
        let bytes = bincode::serialize(index).map_err(|e| Error::Codec(e.to_string()))?;
        let mut file =
            LockedFile::create(&self.invalidation_path(policy)).map_err(Error::FilesystemIo)?;
        file.set_len(0).map_err(Error::FilesystemIo)?;
        file.seek(SeekFrom::Start(0)).map_err(Error::FilesystemIo)?;
        file.write_all(&bytes).map_err(Error::FilesystemIo)?;
        Ok(())
    }

    fn read_ttl_table(&self, policy: PolicyKind) -> Result<HashMap<CacheKey, i64>> {
        let Some(mut file) = LockedFile::open_existing(&self.ttl_path(policy)).map_err(Error::FilesystemIo)?
        else {
            return Ok(HashMap::new());
        };
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes).map_err(Error::FilesystemIo)?;
        if bytes.is_empty() {
            return Ok(HashMap::new());
        }
        bincode::deserialize(&bytes).map_err(|e| Error::Codec(e.to_string()))
    }

    fn write_ttl_table(&self, policy: PolicyKind, table: &HashMap<CacheKey, i64>) -> Result<()> {
        std::fs::create_dir_all(self.policy_dir(policy))?;
        let bytes = bincode::serialize(table).map_err(|e| Error::Codec(e.to_string()))?;
        let mut file = LockedFile::create(&self.ttl_path(policy)).map_err(Error::FilesystemIo)?;
        file.set_len(0).map_err(Error::FilesystemIo)?;
        file.seek(SeekFrom::Start(0)).map_err(Error::FilesystemIo)?;
        file.write_all(&bytes).map_err(Error::FilesystemIo)?;
        Ok(())
    }

    fn persist_indices(&self, policy: PolicyKind, state: &DiskPolicyState) -> Result<()> {
        self.write_invalidation(policy, &state.invalidation)?;
        self.write_ttl_table(policy, &state.ttl_table)?;
        Ok(())
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

    /// Stop tracking `key`, drop its file and TTL/invalidation bookkeeping,
    /// and persist the updated index files.
    fn remove_entry_locked(
        &self,
        state: &mut DiskPolicyState,
        policy: PolicyKind,
        key: &CacheKey,
        reason: EvictionReason,
    ) -> Result<()> {
        // `Ttl` means the timer itself fired; any other reason removing a
        // key with a still-pending TTL is a `ttlCleared`, not a `ttlExpired`.
        let ttl_cleared = reason != EvictionReason::Ttl && state.policy.clear_ttl(key);
        state.policy.stop_tracking(key);
        if ttl_cleared {
            self.logger.log(
                Level::Debug,
                "ttlCleared",
                &LogFields::new().driver("disk").policy(policy.as_str()).hash(key.0.clone()),
            );
        }
        state.ttl_table.remove(key);
        if let Some(size) = state.sizes.remove(key) {
            state.bytes = state.bytes.saturating_sub(size);
            self.bytes_mirror[policy.index()].store(state.bytes, Ordering::Relaxed);
        }
        if let Some(entry) = self.read_entry(policy, key)? {
            let invalidation_keys: Vec<InvalidationKey> = entry
                .options
                .invalidated_by
                .iter()
                .map(InvalidationKey::from_identifier)
                .collect();
            state.invalidation.unlink_cache_key(&invalidation_keys, key);
        }
        self.delete_entry_file(policy, key)?;
        self.persist_indices(policy, state)?;
        self.emit_eviction_telemetry(policy, key, reason);
        Ok(())
    }

    fn finish_set(
        &self,
        state: &mut DiskPolicyState,
        policy: PolicyKind,
        key: CacheKey,
        entry: Entry,
    ) -> Result<()> {
        state.policy.track(&key);
        if entry.options.ttl > 0 {
            state
                .policy
                .register_ttl(key.clone(), Duration::from_millis(entry.options.ttl));
            let expires_at = entry.ctime.timestamp_millis() + entry.options.ttl as i64;
            state.ttl_table.insert(key.clone(), expires_at);
        }
        for id in &entry.options.invalidated_by {
            state
                .invalidation
                .link(InvalidationKey::from_identifier(id), key.clone());
        }
        let size = entry.serialized_len();
        state.sizes.insert(key.clone(), size);
        state.bytes += size;
        self.bytes_mirror[policy.index()].store(state.bytes, Ordering::Relaxed);
        self.write_entry(policy, &key, &entry)?;
        self.persist_indices(policy, state)?;
        Ok(())
    }

    fn other_bytes(&self, target: PolicyKind) -> u64 {
        PolicyKind::ALL
            .iter()
            .filter(|k| **k != target)
            .map(|k| self.bytes_mirror[k.index()].load(Ordering::Relaxed))
            .sum()
    }

    /// Admission and overflow eviction, identical in structure to the
    /// memory driver's: a single-lock self-eviction fast path, escalating to
    /// all six policy mutexes in declared order only when
    /// `evictFromOthers` eviction across policies is actually needed.
    fn admit<'a>(
        &'a self,
        mut state: parking_lot::MutexGuard<'a, DiskPolicyState>,
        policy: PolicyKind,
        size: u64,
    ) -> Result<parking_lot::MutexGuard<'a, DiskPolicyState>> {
        loop {
            let total = state.bytes + self.other_bytes(policy);
            if total + size <= self.config.max_size {
                return Ok(state);
            }
            if let Some(victim) = state.policy.evict() {
                self.remove_entry_locked(&mut state, policy, &victim, EvictionReason::SizeLimit)?;
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

        let mut guards: Vec<parking_lot::MutexGuard<DiskPolicyState>> =
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
                    self.remove_entry_locked(g, victim_policy, &victim_key, EvictionReason::SizeLimit)?;
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

    /// Create the per-policy directories and index files, drop expired
    /// entries found in `ttl.dat`, and re-track whatever cache files remain.
    /// Must be called once, before serving traffic.
    pub fn init(self: &Arc<Self>) -> Result<()> {
        self.spawn_ttl_drain();
        for policy in PolicyKind::ALL {
            self.init_policy(policy)?;
        }
        Ok(())
    }

    fn init_policy(&self, policy: PolicyKind) -> Result<()> {
        let dir = self.policy_dir(policy);
        std::fs::create_dir_all(&dir)?;
        if !self.invalidation_path(policy).exists() {
            self.write_invalidation(policy, &InvalidationIndex::new())?;
        }
        if !self.ttl_path(policy).exists() {
            self.write_ttl_table(policy, &HashMap::new())?;
        }

        let invalidation = self.read_invalidation(policy)?;
        let ttl_table = self.read_ttl_table(policy)?;
        let now_ms = self.clock.now().timestamp_millis();

        let mut live_ttl = HashMap::new();
        for (key, expires_at) in ttl_table {
            if expires_at <= now_ms {
                self.delete_entry_file(policy, &key)?;
            } else {
                live_ttl.insert(key, expires_at);
            }
        }

        let mut state = self.states[policy.index()].lock();
        state.invalidation = invalidation;

        let mut bytes = 0u64;
        for dir_entry in std::fs::read_dir(&dir)?.flatten() {
            let Some(name) = dir_entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name == INVALIDATION_FILE || name == TTL_FILE {
                continue;
            }
            let Some(stripped) = name.strip_suffix(".dat") else {
                continue;
            };
            let Ok(metadata) = dir_entry.metadata() else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            let key = CacheKey(stripped.to_string());
            state.policy.track(&key);
            state.sizes.insert(key.clone(), metadata.len());
            bytes += metadata.len();
            if let Some(expires_at) = live_ttl.get(&key).copied() {
                let remaining = (expires_at - now_ms).max(1) as u64;
                state.policy.register_ttl(key, Duration::from_millis(remaining));
            }
        }
        state.bytes = bytes;
        state.ttl_table = live_ttl;
        self.bytes_mirror[policy.index()].store(bytes, Ordering::Relaxed);
        self.write_ttl_table(policy, &state.ttl_table)?;
        Ok(())
    }

    pub fn get(&self, identifier: &Identifier, policy: PolicyKind) -> Result<Option<Entry>> {
        let key = CacheKey::from_identifier(identifier);
        let attrs = self.attrs(policy, &key);
        self.telemetry.incr_counter(Counter::CacheLookupsTotal, &attrs);
        let mut state = self.states[policy.index()].lock();
        if !state.policy.contains(&key) {
            self.telemetry.incr_counter(Counter::CacheMissesTotal, &attrs);
            return Ok(None);
        }
        let Some(mut entry) = self.read_entry(policy, &key)? else {
            // Tracked in memory but the file is gone: treat as a miss and
            // drop the stale tracking rather than returning an error.
            state.policy.stop_tracking(&key);
            self.telemetry.incr_counter(Counter::CacheMissesTotal, &attrs);
            return Ok(None);
        };
        state.policy.hit(&key);
        entry.hits += 1;
        entry.atime = self.clock.now();
        self.write_entry(policy, &key, &entry)?;
        self.telemetry.incr_counter(Counter::CacheHitsTotal, &attrs);
        Ok(Some(entry))
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
        let tracked = state.policy.contains(&key);
        if tracked && !force {
            return Ok(false);
        }
        if tracked {
            self.remove_entry_locked(&mut state, policy, &key, EvictionReason::Manual)?;
        }

        let mut state = self.admit(state, policy, size)?;
        self.finish_set(&mut state, policy, key.clone(), entry)?;
        drop(state);
        self.telemetry
            .incr_counter(Counter::CachesCreatedTotal, &self.attrs(policy, &key));
        Ok(true)
    }

    pub fn delete(&self, identifier: &Identifier, policy: PolicyKind) -> Result<()> {
        let key = CacheKey::from_identifier(identifier);
        let mut state = self.states[policy.index()].lock();
        if !state.policy.contains(&key) {
            return Err(Error::NotFound);
        }
        self.remove_entry_locked(&mut state, policy, &key, EvictionReason::Manual)?;
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
                self.remove_entry_locked(&mut state, policy, &cache_key, EvictionReason::Invalidation)?;
            }
        }
        Ok(())
    }

    /// Counts only regular files under each policy's subdirectory,
    /// which includes the index files alongside entry files.
    pub fn resource_usage(&self) -> ResourceUsage {
        let mut usage = ResourceUsage::default();
        for policy in PolicyKind::ALL {
            let mut bytes = 0u64;
            let mut entries = 0u64;
            if let Ok(read_dir) = std::fs::read_dir(self.policy_dir(policy)) {
                for dir_entry in read_dir.flatten() {
                    if let Ok(metadata) = dir_entry.metadata() {
                        if metadata.is_file() {
                            bytes += metadata.len();
                            entries += 1;
                        }
                    }
                }
            }
            usage.total_bytes += bytes;
            usage.total_entries += entries;
            let fraction = if self.config.max_size > 0 {
                bytes as f64 / self.config.max_size as f64
            } else {
                0.0
            };
            usage.policies.insert(
                policy,
                PolicyUsage {
                    bytes,
                    entries,
                    fraction,
                },
            );
        }
        usage
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
                if state.policy.contains(&event.key) {
                    if let Err(e) =
                        driver.remove_entry_locked(&mut state, event.policy, &event.key, EvictionReason::Ttl)
                    {
                        driver.logger.log(
                            Level::Warn,
                            &format!("ttl eviction cleanup failed: {e}"),
                            &driver.log_fields(event.policy, &event.key),
                        );
                    }
                }
            }
        });
    }
}

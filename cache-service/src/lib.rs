//! Wiring that wouldn't belong in either `cache-core` or `cache-storage`
//! alone: turning a loaded [`cache_core::config`] into a pair of running
//! drivers, with the workspace's usual logger/telemetry defaults installed.
//!
//! This crate is deliberately thin — it has no HTTP surface, no request
//! schema, no clustering launcher, no web UI. What it does own is the
//! boundary a real shell would sit behind: load config once, build both
//! drivers from it, initialize them, and hand back something a caller can
//! hold onto for the life of the process.

use cache_core::config::{self, DriverConfig, FileSystemDriverConfig};
use cache_core::{
    Clock, Logger, MetricsTelemetry, Result, SystemClock, Telemetry, TimerScheduler,
    TokioTimerScheduler, TracingLogger,
};
use cache_storage::{DiskDriver, MemoryDriver};
use std::path::Path;
use std::sync::Arc;

/// The two storage drivers a process binds over one loaded configuration,
/// both already `init()`-ed and ready to serve `get`/`set`/`delete`/
/// `invalidate` calls.
pub struct Engine {
    pub memory: Arc<MemoryDriver>,
    pub disk: Arc<DiskDriver>,
}

impl Engine {
    /// Build both drivers from already-resolved configuration, using this
    /// workspace's batteries-included `Clock`/`TimerScheduler`/`Logger`/
    /// `Telemetry` implementations. `rng_seed` is threaded through to
    /// both drivers' RR policies — pass `None` in production for OS entropy,
    /// a fixed seed in tests.
    pub fn new(
        memory_config: DriverConfig,
        disk_config: FileSystemDriverConfig,
        rng_seed: Option<u64>,
    ) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let scheduler: Arc<dyn TimerScheduler> = Arc::new(TokioTimerScheduler);
        let logger: Arc<dyn Logger> = Arc::new(TracingLogger);
        let telemetry: Arc<dyn Telemetry> = Arc::new(MetricsTelemetry);

        let memory = MemoryDriver::new(
            memory_config,
            Arc::clone(&clock),
            Arc::clone(&scheduler),
            Arc::clone(&logger),
            Arc::clone(&telemetry),
            rng_seed,
        );
        let disk = DiskDriver::new(disk_config, clock, scheduler, logger, telemetry, rng_seed);

        Self { memory, disk }
    }

    /// Replay snapshots (memory) / reconcile the on-disk layout (disk) and
    /// start each driver's background tasks. Must be called once before
    /// either driver serves traffic.
    pub fn init(&self) -> Result<()> {
        self.memory.init()?;
        self.disk.init()?;
        Ok(())
    }
}

/// Load configuration from `config_path` (falling back to compiled-in
/// defaults and `CACHE_`-prefixed environment variables) and build a
/// ready-to-use [`Engine`] from it.
pub fn bootstrap(config_path: Option<&Path>) -> Result<Engine> {
    let (memory_config, disk_config) = config::load(config_path)?;
    let engine = Engine::new(memory_config, disk_config, None);
    engine.init()?;
    Ok(engine)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cache_core::config::{FileSystemDriverConfig, RecoveryConfig};
    use std::time::Duration;

    fn disk_config(mount: &Path) -> FileSystemDriverConfig {
        FileSystemDriverConfig {
            max_size: 1 << 20,
            evict_from_others: false,
            mount_path: mount.to_path_buf(),
        }
    }

    #[tokio::test]
    async fn engine_inits_both_drivers_from_resolved_config() {
        let dir = tempfile::tempdir().unwrap();
        let memory_config = DriverConfig {
            max_size: 1 << 20,
            evict_from_others: false,
            recovery: RecoveryConfig {
                enabled: false,
                snapshot_file_path: dir.path().join("snapshot.dat"),
                snapshot_interval: Duration::from_secs(300),
            },
        };
        let engine = Engine::new(memory_config, disk_config(dir.path()), Some(1));
        engine.init().expect("both drivers should initialize cleanly");

        let id = serde_json::json!({"k": "v"});
        assert!(engine
            .memory
            .set(&id, cache_storage::PolicyKind::Lru, vec![1, 2, 3], None, Default::default(), false)
            .unwrap());
    }
}

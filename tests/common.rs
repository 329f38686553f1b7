//! Shared fixtures for the integration test binaries in this crate. Not a
//! test target itself — included via `mod common;` from each one.

use cache_core::config::{DriverConfig, FileSystemDriverConfig, RecoveryConfig};
use cache_core::{Clock, Logger, MetricsTelemetry, SystemClock, TimerScheduler, TokioTimerScheduler, TracingLogger};
use cache_storage::{DiskDriver, MemoryDriver};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub fn clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}

pub fn scheduler() -> Arc<dyn TimerScheduler> {
    Arc::new(TokioTimerScheduler)
}

pub fn logger() -> Arc<dyn Logger> {
    Arc::new(TracingLogger)
}

pub fn telemetry() -> Arc<dyn cache_core::Telemetry> {
    Arc::new(MetricsTelemetry)
}

pub fn memory_config(max_size: u64, evict_from_others: bool) -> DriverConfig {
    DriverConfig {
        max_size,
        evict_from_others,
        recovery: RecoveryConfig {
            enabled: false,
            snapshot_file_path: PathBuf::from("unused.dat"),
            snapshot_interval: Duration::from_secs(300),
        },
    }
}

pub fn memory_config_with_recovery(max_size: u64, snapshot_path: &Path) -> DriverConfig {
    DriverConfig {
        max_size,
        evict_from_others: false,
        recovery: RecoveryConfig {
            enabled: true,
            snapshot_file_path: snapshot_path.to_path_buf(),
            snapshot_interval: Duration::from_secs(300),
        },
    }
}

pub fn disk_config(mount_path: &Path, max_size: u64, evict_from_others: bool) -> FileSystemDriverConfig {
    FileSystemDriverConfig {
        max_size,
        evict_from_others,
        mount_path: mount_path.to_path_buf(),
    }
}

pub fn build_memory_driver(config: DriverConfig, rng_seed: Option<u64>) -> Arc<MemoryDriver> {
    MemoryDriver::new(config, clock(), scheduler(), logger(), telemetry(), rng_seed)
}

pub fn build_disk_driver(config: FileSystemDriverConfig, rng_seed: Option<u64>) -> Arc<DiskDriver> {
    DiskDriver::new(config, clock(), scheduler(), logger(), telemetry(), rng_seed)
}

pub fn id(label: &str) -> serde_json::Value {
    serde_json::json!({ "label": label })
}

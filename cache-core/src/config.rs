//! Layered configuration loading and percentage resolution.
//!
//! The core never parses a config file or environment variable itself — it
//! only ever consumes a resolved [`DriverConfig`] / [`FileSystemDriverConfig`]
//! pair. This module is the loader that gets it there: compiled-in defaults,
//! layered with an optional TOML file, layered with `CACHE_`-prefixed
//! environment variables, via the `config` crate every other ambient-concern
//! module in this workspace also reaches for.

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A `maxSize` value before it's resolved against a host's RAM/disk: either
/// an absolute byte count or a percentage string like `"50%"`.
#[derive(Debug, Clone, PartialEq)]
enum RawMaxSize {
    Absolute(u64),
    Percentage(f64),
}

impl Default for RawMaxSize {
    fn default() -> Self {
        RawMaxSize::Percentage(10.0)
    }
}

impl<'de> Deserialize<'de> for RawMaxSize {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Int(u64),
            Text(String),
        }
        match Repr::deserialize(deserializer)? {
            Repr::Int(n) => Ok(RawMaxSize::Absolute(n)),
            Repr::Text(s) => {
                if let Some(pct) = s.trim().strip_suffix('%') {
                    let value: f64 = pct.trim().parse().map_err(|_| {
                        serde::de::Error::custom(format!("invalid maxSize percentage: {s}"))
                    })?;
                    Ok(RawMaxSize::Percentage(value))
                } else {
                    let value: u64 = s.trim().parse().map_err(|_| {
                        serde::de::Error::custom(format!("invalid maxSize: {s}"))
                    })?;
                    Ok(RawMaxSize::Absolute(value))
                }
            }
        }
    }
}

impl RawMaxSize {
    /// Resolve against `basis` bytes (total RAM for the memory driver, free
    /// disk space at `mountPath` for the disk driver).
    fn resolve(&self, basis: u64) -> Result<u64> {
        match self {
            RawMaxSize::Absolute(n) => {
                if *n == 0 {
                    return Err(Error::Config("maxSize must be greater than zero".into()));
                }
                Ok(*n)
            }
            RawMaxSize::Percentage(p) => {
                if !(*p > 0.0 && *p < 100.0) {
                    return Err(Error::Config(format!(
                        "maxSize percentage {p} must fall strictly between 0 and 100"
                    )));
                }
                Ok(((basis as f64) * (p / 100.0)).floor() as u64)
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct RawRecoverySettings {
    enabled: bool,
    #[serde(alias = "snapshotFilePath")]
    snapshot_file_path: String,
    #[serde(alias = "snapshotInterval")]
    snapshot_interval: u64,
}

impl Default for RawRecoverySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            snapshot_file_path: "cache-nest-memory.dat".to_string(),
            snapshot_interval: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct RawMemorySettings {
    #[serde(alias = "maxSize")]
    max_size: RawMaxSize,
    #[serde(alias = "evictFromOthers")]
    evict_from_others: bool,
    recovery: RawRecoverySettings,
}

impl Default for RawMemorySettings {
    fn default() -> Self {
        Self {
            max_size: RawMaxSize::default(),
            evict_from_others: false,
            recovery: RawRecoverySettings::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct RawFileSystemSettings {
    #[serde(alias = "maxSize")]
    max_size: RawMaxSize,
    #[serde(alias = "mountPath")]
    mount_path: String,
    #[serde(alias = "evictFromOthers")]
    evict_from_others: bool,
}

impl Default for RawFileSystemSettings {
    fn default() -> Self {
        Self {
            max_size: RawMaxSize::default(),
            mount_path: "./cache-nest".to_string(),
            evict_from_others: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDrivers {
    memory: RawMemorySettings,
    #[serde(alias = "fileSystem")]
    file_system: RawFileSystemSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    drivers: RawDrivers,
}

/// Resolved recovery (snapshot) configuration the memory driver consumes.
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    pub enabled: bool,
    pub snapshot_file_path: PathBuf,
    pub snapshot_interval: Duration,
}

/// Resolved memory-driver configuration the core actually consumes.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub max_size: u64,
    pub evict_from_others: bool,
    pub recovery: RecoveryConfig,
}

/// Resolved disk-driver configuration the core actually consumes.
#[derive(Debug, Clone)]
pub struct FileSystemDriverConfig {
    pub max_size: u64,
    pub evict_from_others: bool,
    pub mount_path: PathBuf,
}

fn cfg_err(e: impl std::fmt::Display) -> Error {
    Error::Config(e.to_string())
}

fn validate_snapshot_path(path: &Path) -> Result<()> {
    let ok = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("dat"))
        .unwrap_or(false);
    if !ok {
        return Err(Error::Config(format!(
            "recovery.snapshotFilePath must end in .dat, got {}",
            path.display()
        )));
    }
    Ok(())
}

fn load_raw(file_path: Option<&Path>) -> Result<RawSettings> {
    let mut builder = config::Config::builder()
        .set_default("drivers.memory.max_size", "10%")
        .map_err(cfg_err)?
        .set_default("drivers.memory.evict_from_others", false)
        .map_err(cfg_err)?
        .set_default("drivers.memory.recovery.enabled", false)
        .map_err(cfg_err)?
        .set_default(
            "drivers.memory.recovery.snapshot_file_path",
            "cache-nest-memory.dat",
        )
        .map_err(cfg_err)?
        .set_default("drivers.memory.recovery.snapshot_interval", 300i64)
        .map_err(cfg_err)?
        .set_default("drivers.file_system.max_size", "10%")
        .map_err(cfg_err)?
        .set_default("drivers.file_system.mount_path", "./cache-nest")
        .map_err(cfg_err)?
        .set_default("drivers.file_system.evict_from_others", false)
        .map_err(cfg_err)?;

    if let Some(path) = file_path {
        builder = builder.add_source(config::File::from(path).required(false));
    }
    builder = builder.add_source(
        config::Environment::with_prefix("CACHE")
            .separator("__")
            .try_parsing(true),
    );

    let built = builder.build().map_err(cfg_err)?;
    built.try_deserialize::<RawSettings>().map_err(cfg_err)
}

/// Total installed RAM in bytes, used as the percentage basis for the memory
/// driver's `maxSize`.
pub fn total_system_memory_bytes() -> u64 {
    use sysinfo::System;
    let mut sys = System::new();
    sys.refresh_memory();
    sys.total_memory()
}

/// Free disk space in bytes at `path`, used as the percentage basis for the
/// disk driver's `maxSize`. Creates `path` if it doesn't exist yet, mirroring
/// the disk driver's own `init()` behavior, so resolution never fails merely
/// because the cache root hasn't been created yet.
pub fn free_disk_space_bytes(path: &Path) -> Result<u64> {
    std::fs::create_dir_all(path)?;
    fs2::available_space(path).map_err(Error::FilesystemIo)
}

/// Load and fully resolve both driver configs from layered sources.
///
/// Sources, later overriding earlier: compiled-in defaults, an optional TOML
/// file at `file_path`, then `CACHE_`-prefixed environment variables (double
/// underscore as the path separator, e.g. `CACHE_DRIVERS__MEMORY__MAX_SIZE`).
pub fn load(file_path: Option<&Path>) -> Result<(DriverConfig, FileSystemDriverConfig)> {
    let raw = load_raw(file_path)?;
    let ram = total_system_memory_bytes();
    let memory = resolve_memory(&raw.drivers.memory, ram)?;

    let mount_path = PathBuf::from(&raw.drivers.file_system.mount_path);
    let disk_basis = free_disk_space_bytes(&mount_path)?;
    let file_system = resolve_file_system(&raw.drivers.file_system, disk_basis)?;

    Ok((memory, file_system))
}

fn resolve_memory(raw: &RawMemorySettings, total_ram_bytes: u64) -> Result<DriverConfig> {
    let max_size = raw.max_size.resolve(total_ram_bytes)?;
    let snapshot_file_path = PathBuf::from(&raw.recovery.snapshot_file_path);
    validate_snapshot_path(&snapshot_file_path)?;
    Ok(DriverConfig {
        max_size,
        evict_from_others: raw.evict_from_others,
        recovery: RecoveryConfig {
            enabled: raw.recovery.enabled,
            snapshot_file_path,
            snapshot_interval: Duration::from_secs(raw.recovery.snapshot_interval),
        },
    })
}

fn resolve_file_system(
    raw: &RawFileSystemSettings,
    free_disk_bytes: u64,
) -> Result<FileSystemDriverConfig> {
    let max_size = raw.max_size.resolve(free_disk_bytes)?;
    Ok(FileSystemDriverConfig {
        max_size,
        evict_from_others: raw.evict_from_others,
        mount_path: PathBuf::from(&raw.mount_path),
    })
}

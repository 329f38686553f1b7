use thiserror::Error;

/// Errors surfaced by the cache engine to its caller.
///
/// Policy-internal anomalies (redundant `track`, evicting an empty policy, ...)
/// are never represented here — they are warnings logged through [`crate::ports::Logger`],
/// not propagated failures.
#[derive(Error, Debug)]
pub enum Error {
    /// The entry alone is larger than the driver's `maxSize`; admission never starts.
    #[error("cache entry of {size} bytes exceeds max size of {max_size} bytes")]
    CacheTooBig { size: u64, max_size: u64 },

    /// Admission could not free enough space, even after consulting every
    /// eligible policy (all policies if `evictFromOthers`, just the target otherwise).
    #[error("unable to evict enough entries to admit {size} bytes under policy {policy}")]
    NoCachesToEvict { policy: String, size: u64 },

    /// `get`/`delete` targeted an identifier with no corresponding entry.
    #[error("no cache entry found for the given identifier")]
    NotFound,

    /// Reading the snapshot blob failed; the driver continues with empty state.
    #[error("failed to read snapshot: {0}")]
    SnapshotReadFailed(String),

    /// Writing the snapshot blob failed; retried on the next timer tick.
    #[error("failed to write snapshot: {0}")]
    SnapshotWriteFailed(String),

    /// An I/O failure in the disk driver unrelated to recovery (create/read/write/lock).
    #[error("filesystem I/O error: {0}")]
    FilesystemIo(#[from] std::io::Error),

    /// The loaded configuration failed validation before a driver was constructed.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The snapshot blob's binary encoding could not be decoded.
    #[error("snapshot codec error: {0}")]
    Codec(String),
}

pub type Result<T> = std::result::Result<T, Error>;


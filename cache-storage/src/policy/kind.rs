//! The closed set of replacement policies, and their declared lock order.

use serde::{Deserialize, Serialize};

/// One of the six replacement policies a driver binds over its entry table.
///
/// Declaration order here is the fixed lock-acquisition order the overflow
/// eviction loop uses to avoid deadlock when it needs to evict from a
/// policy other than the one being written to: `Lru < Mru < Lfu < Mfu
/// < Fifo < Rr`, exactly as the `derive(Ord)` below gives for free.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum PolicyKind {
    Lru,
    Mru,
    Lfu,
    Mfu,
    Fifo,
    Rr,
}

impl PolicyKind {
    pub const ALL: [PolicyKind; 6] = [
        PolicyKind::Lru,
        PolicyKind::Mru,
        PolicyKind::Lfu,
        PolicyKind::Mfu,
        PolicyKind::Fifo,
        PolicyKind::Rr,
    ];

    /// Index into a fixed six-element array, in declared lock order.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Lowercase name, used for the disk driver's per-policy subdirectory
    /// and as the `policy` log/telemetry attribute.
    pub fn as_str(self) -> &'static str {
        match self {
            PolicyKind::Lru => "lru",
            PolicyKind::Mru => "mru",
            PolicyKind::Lfu => "lfu",
            PolicyKind::Mfu => "mfu",
            PolicyKind::Fifo => "fifo",
            PolicyKind::Rr => "rr",
        }
    }
}

impl std::fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

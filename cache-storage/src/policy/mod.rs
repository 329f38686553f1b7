//! Replacement policies: six concrete variants behind one sum type.
//!
//! A tagged variant beats virtual dispatch on an abstract base here — the
//! set of policies is closed and the driver branches on it rarely (admission
//! and snapshot code paths only). [`Policy`] is that sum type: every
//! operation is a single `match` over the six variants, each backed by the
//! ordering primitives in [`order`].

mod kind;
mod order;
mod ttl;

pub use kind::PolicyKind;
pub use order::{CountOrder, LinkedOrder, SetOrder};
pub use ttl::{TtlEvent, TtlRegistry};

use cache_core::{CacheKey, TimerScheduler};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// The variant-specific ordering structure a policy carries. LRU and MRU
/// share [`LinkedOrder`] (they differ only in which end `evict` takes from);
/// FIFO also uses it, but never repositions on `track`/`hit`. LFU and MFU
/// share [`CountOrder`].
#[derive(Debug, Clone)]
enum OrderingState {
    Linked(LinkedOrder),
    Counted(CountOrder),
    Set(SetOrder),
}

/// The opaque per-policy state a snapshot carries: the ordering
/// structure, serialized so a restored policy reconstructs the same
/// eviction order. TTL state is deliberately absent — on recovery the driver
/// re-derives remaining TTLs from each entry's `ctime`/`ttl` rather than from
/// the policy's own bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PolicySnapshot {
    Linked { order: Vec<CacheKey> },
    Counted { order: Vec<(CacheKey, u64)> },
    Set { keys: Vec<CacheKey> },
}

/// One replacement policy instance, bound to a single driver/policy pair.
/// Never thread-safe in isolation — the driver's per-policy mutex is
/// what makes access to this type safe.
pub struct Policy {
    pub kind: PolicyKind,
    ordering: OrderingState,
    ttl: TtlRegistry,
    rng: Option<StdRng>,
}

impl std::fmt::Debug for Policy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Policy")
            .field("kind", &self.kind)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl Policy {
    /// Construct a fresh, empty policy of `kind`. `rng_seed` seeds RR's
    /// random victim selection — a seeded per-driver generator keeps RR
    /// testable — pass a fixed seed in tests, `None` for OS entropy in
    /// production.
    pub fn new(
        kind: PolicyKind,
        scheduler: Arc<dyn TimerScheduler>,
        events_tx: mpsc::UnboundedSender<TtlEvent>,
        rng_seed: Option<u64>,
    ) -> Self {
        let ordering = match kind {
            PolicyKind::Lru | PolicyKind::Mru | PolicyKind::Fifo => {
                OrderingState::Linked(LinkedOrder::new())
            }
            PolicyKind::Lfu | PolicyKind::Mfu => OrderingState::Counted(CountOrder::new()),
            PolicyKind::Rr => OrderingState::Set(SetOrder::new()),
        };
        let rng = matches!(kind, PolicyKind::Rr).then(|| match rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        });
        Self {
            kind,
            ordering,
            ttl: TtlRegistry::new(kind, scheduler, events_tx),
            rng,
        }
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        match &self.ordering {
            OrderingState::Linked(o) => o.contains(key),
            OrderingState::Counted(o) => o.contains(key),
            OrderingState::Set(o) => o.contains(key),
        }
    }

    pub fn len(&self) -> usize {
        match &self.ordering {
            OrderingState::Linked(o) => o.len(),
            OrderingState::Counted(o) => o.len(),
            OrderingState::Set(o) => o.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Start tracking `key`. Returns `false` if it was already tracked (a
    /// no-op, logged by the caller).
    pub fn track(&mut self, key: &CacheKey) -> bool {
        match (&mut self.ordering, self.kind) {
            (OrderingState::Linked(o), PolicyKind::Fifo) => o.insert_if_absent_at_tail(key),
            (OrderingState::Linked(o), PolicyKind::Lru | PolicyKind::Mru) => {
                if o.contains(key) {
                    false
                } else {
                    o.move_to_tail(key);
                    true
                }
            }
            (OrderingState::Counted(o), _) => o.insert_if_absent(key),
            (OrderingState::Set(o), _) => o.insert_if_absent(key),
            _ => unreachable!("ordering state always matches its policy kind"),
        }
    }

    /// Stop tracking `key` and cancel its TTL. Returns `false` if it wasn't
    /// tracked (a no-op).
    pub fn stop_tracking(&mut self, key: &CacheKey) -> bool {
        self.ttl.clear(key);
        match &mut self.ordering {
            OrderingState::Linked(o) => o.remove(key),
            OrderingState::Counted(o) => o.remove(key),
            OrderingState::Set(o) => o.remove(key),
        }
    }

    /// Record an access. A no-op for FIFO and RR.
    pub fn hit(&mut self, key: &CacheKey) {
        match (&mut self.ordering, self.kind) {
            (OrderingState::Linked(o), PolicyKind::Lru | PolicyKind::Mru) => {
                if o.contains(key) {
                    o.move_to_tail(key);
                }
            }
            (OrderingState::Linked(_), PolicyKind::Fifo) => {}
            (OrderingState::Counted(o), _) => o.increment(key),
            (OrderingState::Set(_), PolicyKind::Rr) => {}
            _ => unreachable!("ordering state always matches its policy kind"),
        }
    }

    /// Choose and remove the next victim, clearing its TTL. `None` when
    /// empty.
    pub fn evict(&mut self) -> Option<CacheKey> {
        let victim = match (&self.ordering, self.kind) {
            (OrderingState::Linked(o), PolicyKind::Lru | PolicyKind::Fifo) => o.head(),
            (OrderingState::Linked(o), PolicyKind::Mru) => o.tail(),
            (OrderingState::Counted(o), PolicyKind::Lfu) => o.front_of_lowest(),
            (OrderingState::Counted(o), PolicyKind::Mfu) => o.back_of_highest(),
            (OrderingState::Set(o), PolicyKind::Rr) => {
                let rng = self.rng.as_mut().expect("RR policy always carries an rng");
                o.random_key(rng)
            }
            _ => unreachable!("ordering state always matches its policy kind"),
        };
        if let Some(key) = &victim {
            self.stop_tracking(key);
        }
        victim
    }

    pub fn register_ttl(&mut self, key: CacheKey, duration: Duration) {
        self.ttl.register(key, duration);
    }

    /// Returns `true` if a pending TTL was actually cancelled (so the caller
    /// can decide whether `ttlCleared` fired).
    pub fn clear_ttl(&mut self, key: &CacheKey) -> bool {
        self.ttl.clear(key)
    }

    pub fn snapshot(&self) -> PolicySnapshot {
        match &self.ordering {
            OrderingState::Linked(o) => PolicySnapshot::Linked {
                order: o.ordered_keys(),
            },
            OrderingState::Counted(o) => PolicySnapshot::Counted {
                order: o.ordered_entries(),
            },
            OrderingState::Set(o) => PolicySnapshot::Set {
                keys: o.all_keys(),
            },
        }
    }

    /// Restore from a dumped snapshot, discarding any key absent from
    /// `valid_keys`. A snapshot of the wrong shape for this
    /// policy's kind is ignored — the policy is left empty rather than
    /// panicking, since a corrupt/foreign snapshot is a recoverable anomaly,
    /// not a crash.
    pub fn apply_snapshot(&mut self, valid_keys: &HashSet<CacheKey>, snapshot: &PolicySnapshot) {
        self.ordering = match (snapshot, self.kind) {
            (PolicySnapshot::Linked { order }, PolicyKind::Lru | PolicyKind::Mru | PolicyKind::Fifo) => {
                OrderingState::Linked(LinkedOrder::rebuild(order, valid_keys))
            }
            (PolicySnapshot::Counted { order }, PolicyKind::Lfu | PolicyKind::Mfu) => {
                OrderingState::Counted(CountOrder::rebuild(order, valid_keys))
            }
            (PolicySnapshot::Set { keys }, PolicyKind::Rr) => {
                OrderingState::Set(SetOrder::rebuild(keys, valid_keys))
            }
            _ => return,
        };
    }
}

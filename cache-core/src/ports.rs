//! Trait seams at which the cache engine is decoupled from its ambient stack.
//!
//! The logger, telemetry facility, clock, and timer scheduler are treated as
//! things provided by the host process. Each trait here ships a
//! batteries-included default built on the crate this workspace already uses
//! for the concern (`tracing`, `metrics`, `chrono`/`tokio`), so the engine
//! runs standalone, but a host application is free to substitute its own.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Structured log levels the core emits through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Error,
    Warn,
    Info,
    Verbose,
    Debug,
}

/// Contextual fields attached to most core log lines (`driver`, `policy`, `hash`).
#[derive(Debug, Clone, Default)]
pub struct LogFields {
    pub driver: Option<&'static str>,
    pub policy: Option<String>,
    pub hash: Option<String>,
}

impl LogFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn driver(mut self, driver: &'static str) -> Self {
        self.driver = Some(driver);
        self
    }

    pub fn policy(mut self, policy: impl Into<String>) -> Self {
        self.policy = Some(policy.into());
        self
    }

    pub fn hash(mut self, hash: impl Into<String>) -> Self {
        self.hash = Some(hash.into());
        self
    }
}

/// A structured logger. The default implementation forwards to `tracing`.
pub trait Logger: Send + Sync {
    fn log(&self, level: Level, message: &str, fields: &LogFields);
}

/// `tracing`-backed `Logger`, matching how every other crate in this
/// workspace emits logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, level: Level, message: &str, fields: &LogFields) {
        let driver = fields.driver.unwrap_or("-");
        let policy = fields.policy.as_deref().unwrap_or("-");
        let hash = fields.hash.as_deref().unwrap_or("-");
        match level {
            Level::Error => tracing::error!(driver, policy, hash, "{message}"),
            Level::Warn => tracing::warn!(driver, policy, hash, "{message}"),
            Level::Info => tracing::info!(driver, policy, hash, "{message}"),
            Level::Verbose => tracing::info!(driver, policy, hash, verbose = true, "{message}"),
            Level::Debug => tracing::debug!(driver, policy, hash, "{message}"),
        }
    }
}

/// Attributes carried by every telemetry counter increment.
#[derive(Debug, Clone, Default)]
pub struct TelemetryAttrs {
    pub driver: &'static str,
    pub policy: String,
    pub hash: String,
}

/// The nine counters the core emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    CachesCreatedTotal,
    CachesDeletedTotal,
    CacheLookupsTotal,
    CacheHitsTotal,
    CacheMissesTotal,
    CacheEvictionsTotal,
    CacheEvictionsTtlTotal,
    CacheEvictionsInvalidationTotal,
    CacheEvictionsSizeLimitTotal,
}

impl Counter {
    pub fn name(self) -> &'static str {
        match self {
            Counter::CachesCreatedTotal => "caches_created_total",
            Counter::CachesDeletedTotal => "caches_deleted_total",
            Counter::CacheLookupsTotal => "cache_lookups_total",
            Counter::CacheHitsTotal => "cache_hits_total",
            Counter::CacheMissesTotal => "cache_misses_total",
            Counter::CacheEvictionsTotal => "cache_evictions_total",
            Counter::CacheEvictionsTtlTotal => "cache_evictions_ttl_total",
            Counter::CacheEvictionsInvalidationTotal => "cache_evictions_invalidation_total",
            Counter::CacheEvictionsSizeLimitTotal => "cache_evictions_size_limit_total",
        }
    }
}

/// A tracer span the core opens for a unit of work; dropping it ends the span.
pub trait Span: Send {
    fn set_attribute(&mut self, key: &'static str, value: String);
}

/// The telemetry facility the core records through.
pub trait Telemetry: Send + Sync {
    fn incr_counter(&self, counter: Counter, attrs: &TelemetryAttrs);
    fn start_span(&self, name: &'static str, attrs: &TelemetryAttrs) -> Box<dyn Span>;
}

/// `metrics`-backed `Telemetry`. Spans are recorded as `tracing` spans since
/// this workspace's tracer is `tracing`-based; `metrics` handles the counters
/// so a host already exporting Prometheus via `metrics-prometheus` picks up
/// cache counters automatically.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsTelemetry;

struct NoopSpan;
impl Span for NoopSpan {
    fn set_attribute(&mut self, _key: &'static str, _value: String) {}
}

struct TracingSpan {
    _guard: tracing::span::EnteredSpan,
}
impl Span for TracingSpan {
    fn set_attribute(&mut self, key: &'static str, value: String) {
        tracing::Span::current().record(key, tracing::field::display(value));
    }
}

impl Telemetry for MetricsTelemetry {
    fn incr_counter(&self, counter: Counter, attrs: &TelemetryAttrs) {
        metrics::counter!(
            counter.name(),
            "driver" => attrs.driver,
            "policy" => attrs.policy.clone(),
            "hash" => attrs.hash.clone(),
        )
        .increment(1);
    }

    fn start_span(&self, name: &'static str, attrs: &TelemetryAttrs) -> Box<dyn Span> {
        let span = tracing::info_span!(
            "cache_operation",
            operation = name,
            driver = attrs.driver,
            policy = attrs.policy.as_str(),
            hash = attrs.hash.as_str(),
        );
        Box::new(TracingSpan { _guard: span.entered() })
    }
}

/// A `Telemetry` that does nothing — useful for tests that don't want to
/// install a global metrics recorder.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {
    fn incr_counter(&self, _counter: Counter, _attrs: &TelemetryAttrs) {}
    fn start_span(&self, _name: &'static str, _attrs: &TelemetryAttrs) -> Box<dyn Span> {
        Box::new(NoopSpan)
    }
}

/// A current-time source, injected so tests can control `ctime`/`atime` and
/// TTL expiry without sleeping real wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A cancellable one-shot timer handle. Cancellation is idempotent: calling
/// `cancel` after the timer already fired (or after a previous `cancel`) is a
/// no-op.
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
    abort: tokio::task::AbortHandle,
}

impl TimerHandle {
    /// Cancel the timer. Returns `true` if this call is the one that
    /// transitioned it from pending to cancelled. Callers still need to
    /// check *why* they're cancelling: a removal driven by the timer's own
    /// fire event is not a `ttlCleared`, only a removal for any other
    /// reason is (see `Policy::clear_ttl` and its driver call sites).
    pub fn cancel(&self) -> bool {
        let was_cancelled = self.cancelled.swap(true, Ordering::SeqCst);
        self.abort.abort();
        !was_cancelled
    }
}

/// A one-shot timer scheduler. The default implementation spawns a `tokio`
/// task that sleeps for `duration` and then, unless cancelled first, runs
/// `callback`.
pub trait TimerScheduler: Send + Sync {
    fn schedule(&self, duration: Duration, callback: BoxedCallback) -> TimerHandle;
}

pub type BoxedCallback = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioTimerScheduler;

impl TimerScheduler for TokioTimerScheduler {
    fn schedule(&self, duration: Duration, callback: BoxedCallback) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let cancelled_for_task = cancelled.clone();
        let join = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if !cancelled_for_task.load(Ordering::SeqCst) {
                callback();
            }
        });
        TimerHandle {
            cancelled,
            abort: join.abort_handle(),
        }
    }
}

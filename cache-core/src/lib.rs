//! Domain model and trait seams for the cache engine.
//!
//! This crate holds everything the cache engine's callers and the
//! `cache-storage` crate share: the structured identifier and its digest,
//! the entry record and its construction rules, the error taxonomy, the
//! layered configuration loader, and the four trait seams — logger,
//! telemetry, clock, timer scheduler — that decouple the engine from its
//! ambient stack.

pub mod config;
pub mod entry;
pub mod error;
pub mod identifier;
pub mod ports;

pub use entry::{Entry, EntryOptions};
pub use error::{Error, Result};
pub use identifier::{cache_key, invalidation_key, CacheKey, Identifier, InvalidationKey, KeyKind};
pub use ports::{
    BoxedCallback, Clock, Counter, Level, LogFields, Logger, MetricsTelemetry, NoopTelemetry,
    Span, SystemClock, Telemetry, TelemetryAttrs, TimerHandle, TimerScheduler, TokioTimerScheduler,
    TracingLogger,
};

//! # quote-collector
//!
//! A cost-optimized financial quote collector. Given a set of tracked
//! symbols, periodically acquires current market quotes across a priority
//! cascade of backends — an embedded TTL cache, a free backend, and a paid
//! backend metered against a hard monetary budget — and hands normalized
//! quotes to pluggable output sinks.
//!
//! ## Architecture
//!
//! - [`cost_tracker`] — process-wide accountant for the paid backend's budget
//! - [`cache`] — SQLite-backed TTL cache deduplicating backend calls
//! - [`circuit_breaker`] — per-backend CLOSED/OPEN/HALF_OPEN guard
//! - [`backends`] — the uniform adapter interface plus free/paid implementations
//! - [`hybrid_source`] — composes the above into the priority cascade
//! - [`scheduler`] — periodic collection, budget reset, and cache sweep
//! - [`sinks`] — CSV/JSONL output writers
//!
//! Components form a DAG: `HybridSource` owns `Cache`, `CostTracker`, the
//! breakers, and the adapters; `Scheduler` owns the `HybridSource` and the
//! sinks. There are no back-edges, and no process-wide singleton — the
//! composition root (the CLI binary) owns every long-lived value and passes
//! references down.

pub mod backends;
pub mod cache;
pub mod circuit_breaker;
pub mod clock;
pub mod config;
pub mod cost_tracker;
pub mod domain;
pub mod error;
pub mod hybrid_source;
pub mod scheduler;
pub mod sinks;

pub mod prelude {
    pub use crate::backends::{free::FreeAdapter, paid::PaidAdapter, BackendAdapter};
    pub use crate::cache::Cache;
    pub use crate::circuit_breaker::CircuitBreaker;
    pub use crate::clock::{Clock, FixedClock, SystemClock};
    pub use crate::config::Config;
    pub use crate::cost_tracker::CostTracker;
    pub use crate::domain::{AssetClass, BackendTag, Quote};
    pub use crate::error::{CollectorError, Result};
    pub use crate::hybrid_source::HybridSource;
    pub use crate::scheduler::{Scheduler, TrackedSymbol};
    pub use crate::sinks::{CsvSink, JsonlSink, QuoteSink};
}

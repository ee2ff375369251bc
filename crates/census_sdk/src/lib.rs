//! In-process tracing and stats SDK
//!
//! Records distributed-tracing spans and application measurements inside one
//! process, keeps everything under fixed memory bounds, and hands ended spans to
//! pluggable handlers from a background tokio task.
//!
//! - [`trace`]: span lifecycle, bounded per-span buffers, tracer and current-span scopes
//! - [`stats`]: measures, views and their cumulative or interval aggregations
//! - [`export`]: handler fan-out dispatcher and the local sampled span store
//! - [`provider`]: the [`Telemetry`] object that wires the above together
//!
//! Handler traits use native async fn in traits (no `#[async_trait]` macro).

pub mod bounded;
pub mod clock;
pub mod export;
pub(crate) mod invariants;
pub mod provider;
pub mod stats;
pub mod trace;

// Re-export main types
pub use bounded::{BoundedList, BoundedMap, BoundedSnapshot};
pub use clock::{Clock, SystemClock, TestClock, Timestamp, TimestampConverter};
pub use export::{
    DispatchMetrics, DispatcherConfig, ExportComponent, ExportError, Handler, HandlerBoxed,
    InProcessSampledSpanStore, SampledSpanStore, SpanBatch, SpanDispatcher,
};
pub use provider::{Telemetry, TelemetryBuilder};
pub use stats::{Aggregation, AggregationData, Measure, StatsManager, View, ViewData, ViewError};
pub use trace::{Span, SpanContext, SpanData, SpanStateError, StartEndHandler, Status, Tracer};

//! Distributed-tracing spans.

pub mod config;
pub mod context;
pub mod events;
pub mod sampler;
pub mod span;
pub mod tracer;

pub use config::TraceParams;
pub use context::{SpanContext, SpanId, TraceId, TraceOptions, Tracestate};
pub use events::{
    Annotation, AttributeValue, CanonicalCode, EndSpanOptions, Link, LinkType, MessageEvent,
    MessageEventType, SpanKind, Status, TimedEvent,
};
pub use sampler::{AlwaysSample, NeverSample, Sampler};
pub use span::{
    Attributes, Links, NoopStartEndHandler, Span, SpanData, SpanStateError, StartEndHandler,
    StartEndHandlers, TimedEvents,
};
pub use tracer::{SpanBuilder, SpanScope, Tracer};

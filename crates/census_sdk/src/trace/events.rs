use crate::clock::Timestamp;
use crate::trace::context::{SpanContext, SpanId, TraceId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Attribute value types for span metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::String(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Int(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Float(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

/// Text annotation with optional attributes, recorded at a point in a span's life.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub description: String,
    pub attributes: HashMap<String, AttributeValue>,
}

impl Annotation {
    pub fn from_description(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attributes(
        description: impl Into<String>,
        attributes: HashMap<String, AttributeValue>,
    ) -> Self {
        Self {
            description: description.into(),
            attributes,
        }
    }
}

/// Direction of a message event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageEventType {
    Sent,
    Received,
}

/// A message sent or received by the operation a span covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageEvent {
    pub event_type: MessageEventType,
    pub message_id: u64,
    pub uncompressed_size: u64,
    pub compressed_size: u64,
}

impl MessageEvent {
    pub fn new(event_type: MessageEventType, message_id: u64) -> Self {
        Self {
            event_type,
            message_id,
            uncompressed_size: 0,
            compressed_size: 0,
        }
    }

    #[must_use]
    pub fn with_uncompressed_size(mut self, size: u64) -> Self {
        self.uncompressed_size = size;
        self
    }

    #[must_use]
    pub fn with_compressed_size(mut self, size: u64) -> Self {
        self.compressed_size = size;
        self
    }
}

/// Relationship of a linked span to the span holding the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkType {
    ChildLinkedSpan,
    ParentLinkedSpan,
}

/// Pointer from one span to another, possibly in a different trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub link_type: LinkType,
    pub attributes: HashMap<String, AttributeValue>,
}

impl Link {
    pub fn from_span_context(context: &SpanContext, link_type: LinkType) -> Self {
        Self {
            trace_id: context.trace_id(),
            span_id: context.span_id(),
            link_type,
            attributes: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_attributes(mut self, attributes: HashMap<String, AttributeValue>) -> Self {
        self.attributes = attributes;
        self
    }
}

/// An event plus the wall time it was recorded at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedEvent<T> {
    pub timestamp: Timestamp,
    pub event: T,
}

/// Span kind, when known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpanKind {
    /// Server-side handling of a remote request
    Server,
    /// Client-side wrapper of a remote request
    Client,
}

/// Canonical status codes, as used by gRPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CanonicalCode {
    Ok,
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl CanonicalCode {
    /// Every code except `Ok`, in numeric order.
    pub const ERRORS: [CanonicalCode; 16] = [
        CanonicalCode::Cancelled,
        CanonicalCode::Unknown,
        CanonicalCode::InvalidArgument,
        CanonicalCode::DeadlineExceeded,
        CanonicalCode::NotFound,
        CanonicalCode::AlreadyExists,
        CanonicalCode::PermissionDenied,
        CanonicalCode::ResourceExhausted,
        CanonicalCode::FailedPrecondition,
        CanonicalCode::Aborted,
        CanonicalCode::OutOfRange,
        CanonicalCode::Unimplemented,
        CanonicalCode::Internal,
        CanonicalCode::Unavailable,
        CanonicalCode::DataLoss,
        CanonicalCode::Unauthenticated,
    ];

    pub fn is_ok(self) -> bool {
        self == CanonicalCode::Ok
    }
}

/// Outcome of the operation a span covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Status {
    pub code: CanonicalCode,
    pub description: Option<String>,
}

impl Status {
    pub const OK: Status = Status::from_code(CanonicalCode::Ok);
    pub const CANCELLED: Status = Status::from_code(CanonicalCode::Cancelled);
    pub const UNKNOWN: Status = Status::from_code(CanonicalCode::Unknown);
    pub const INVALID_ARGUMENT: Status = Status::from_code(CanonicalCode::InvalidArgument);
    pub const DEADLINE_EXCEEDED: Status = Status::from_code(CanonicalCode::DeadlineExceeded);
    pub const NOT_FOUND: Status = Status::from_code(CanonicalCode::NotFound);
    pub const ABORTED: Status = Status::from_code(CanonicalCode::Aborted);
    pub const INTERNAL: Status = Status::from_code(CanonicalCode::Internal);
    pub const UNAVAILABLE: Status = Status::from_code(CanonicalCode::Unavailable);

    pub const fn from_code(code: CanonicalCode) -> Self {
        Self {
            code,
            description: None,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn is_ok(&self) -> bool {
        self.code.is_ok()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.description {
            Some(desc) => write!(f, "{:?}: {}", self.code, desc),
            None => write!(f, "{:?}", self.code),
        }
    }
}

/// Options applied at the end transition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndSpanOptions {
    /// Overrides any status set earlier with `Span::set_status`.
    pub status: Option<Status>,
    /// Hand the ended span to the local sampled span store.
    pub sample_to_local_span_store: bool,
}

impl EndSpanOptions {
    #[must_use]
    pub fn with_status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn with_sample_to_local_span_store(mut self, sample: bool) -> Self {
        self.sample_to_local_span_store = sample;
        self
    }
}

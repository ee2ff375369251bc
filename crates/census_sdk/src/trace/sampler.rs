use crate::trace::context::{SpanContext, SpanId, TraceId};
use crate::trace::events::Link;

/// Decides whether a new span is sampled.
///
/// Consulted once per span at start. A sampled span sets the sampled bit in its
/// trace options, which routes it to the export dispatcher when it ends.
pub trait Sampler: Send + Sync {
    fn should_sample(
        &self,
        parent: Option<&SpanContext>,
        has_remote_parent: bool,
        trace_id: TraceId,
        span_id: SpanId,
        name: &str,
        links: &[Link],
    ) -> bool;

    /// Short name for logs.
    fn description(&self) -> &'static str;
}

/// Samples every span.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysSample;

impl Sampler for AlwaysSample {
    fn should_sample(
        &self,
        _parent: Option<&SpanContext>,
        _has_remote_parent: bool,
        _trace_id: TraceId,
        _span_id: SpanId,
        _name: &str,
        _links: &[Link],
    ) -> bool {
        true
    }

    fn description(&self) -> &'static str {
        "AlwaysSampleSampler"
    }
}

/// Samples nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverSample;

impl Sampler for NeverSample {
    fn should_sample(
        &self,
        _parent: Option<&SpanContext>,
        _has_remote_parent: bool,
        _trace_id: TraceId,
        _span_id: SpanId,
        _name: &str,
        _links: &[Link],
    ) -> bool {
        false
    }

    fn description(&self) -> &'static str {
        "NeverSampleSampler"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trivial_samplers() {
        let trace_id = TraceId(7);
        let span_id = SpanId(9);
        assert!(AlwaysSample.should_sample(None, false, trace_id, span_id, "x", &[]));
        assert!(!NeverSample.should_sample(None, false, trace_id, span_id, "x", &[]));
        assert_eq!(AlwaysSample.description(), "AlwaysSampleSampler");
    }
}

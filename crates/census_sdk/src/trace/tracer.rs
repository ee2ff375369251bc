//! Span creation and current-span scoping.
//!
//! [`Tracer`] owns everything a new span needs: per-span limits, the default
//! sampler, the clock and the start/end observer. Spans are built through
//! [`SpanBuilder`]; the current span of a thread is installed with
//! [`Tracer::with_span`] and restored when the returned [`SpanScope`] drops.

use crate::clock::Clock;
use crate::trace::config::TraceParams;
use crate::trace::context::{SpanContext, SpanId, TraceId, TraceOptions, Tracestate};
use crate::trace::events::{Link, SpanKind};
use crate::trace::sampler::Sampler;
use crate::trace::span::{Span, StartEndHandler};
use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::Arc;

thread_local! {
    static CURRENT_SPAN: RefCell<Option<Arc<Span>>> = const { RefCell::new(None) };
}

/// Factory for spans.
#[derive(Clone)]
pub struct Tracer {
    params: TraceParams,
    sampler: Arc<dyn Sampler>,
    clock: Arc<dyn Clock>,
    handler: Arc<dyn StartEndHandler>,
}

impl std::fmt::Debug for Tracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracer")
            .field("params", &self.params)
            .field("sampler", &self.sampler.description())
            .finish_non_exhaustive()
    }
}

impl Tracer {
    pub fn new(
        params: TraceParams,
        sampler: Arc<dyn Sampler>,
        clock: Arc<dyn Clock>,
        handler: Arc<dyn StartEndHandler>,
    ) -> Self {
        Self {
            params,
            sampler,
            clock,
            handler,
        }
    }

    pub fn params(&self) -> &TraceParams {
        &self.params
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn span_builder(&self, name: impl Into<String>) -> SpanBuilder<'_> {
        SpanBuilder {
            tracer: self,
            name: name.into(),
            parent: Parent::None,
            sampler: None,
            record_events: false,
            kind: None,
            links: Vec::new(),
        }
    }

    /// Makes `span` the current span of this thread until the scope drops.
    pub fn with_span(&self, span: Arc<Span>) -> SpanScope {
        SpanScope::enter(span)
    }

    /// Current span of this thread, if any scope is open.
    pub fn current_span() -> Option<Arc<Span>> {
        CURRENT_SPAN.with(|current| current.borrow().clone())
    }
}

enum Parent<'a> {
    None,
    Local(&'a Span),
    Remote(SpanContext),
}

/// Configures one span before starting it.
pub struct SpanBuilder<'a> {
    tracer: &'a Tracer,
    name: String,
    parent: Parent<'a>,
    sampler: Option<Arc<dyn Sampler>>,
    record_events: bool,
    kind: Option<SpanKind>,
    links: Vec<Link>,
}

impl<'a> SpanBuilder<'a> {
    /// Child of a span in this process; shares its time base.
    #[must_use]
    pub fn with_parent(mut self, parent: &'a Span) -> Self {
        self.parent = Parent::Local(parent);
        self
    }

    /// Child of a span propagated from another process.
    #[must_use]
    pub fn with_remote_parent(mut self, parent: SpanContext) -> Self {
        self.parent = Parent::Remote(parent);
        self
    }

    /// Overrides both the tracer's default sampler and the parent's decision.
    #[must_use]
    pub fn with_sampler(mut self, sampler: Arc<dyn Sampler>) -> Self {
        self.sampler = Some(sampler);
        self
    }

    /// Records events even if the span is not sampled.
    #[must_use]
    pub fn with_record_events(mut self, record_events: bool) -> Self {
        self.record_events = record_events;
        self
    }

    #[must_use]
    pub fn with_kind(mut self, kind: SpanKind) -> Self {
        self.kind = Some(kind);
        self
    }

    #[must_use]
    pub fn with_links(mut self, links: Vec<Link>) -> Self {
        self.links = links;
        self
    }

    pub fn start(self) -> Span {
        let tracer = self.tracer;
        let (parent_context, has_remote_parent, converter) = match self.parent {
            Parent::None => (None, false, None),
            Parent::Local(span) => (
                Some(span.context().clone()),
                false,
                Some(span.timestamp_converter()),
            ),
            Parent::Remote(context) => (Some(context), true, None),
        };
        let parent_context = parent_context.filter(SpanContext::is_valid);

        let mut rng = rand::thread_rng();
        let (trace_id, tracestate, parent_span_id) = match &parent_context {
            Some(parent) => (
                parent.trace_id(),
                parent.tracestate().clone(),
                Some(parent.span_id()),
            ),
            None => (TraceId::random(&mut rng), Tracestate::empty(), None),
        };
        let span_id = SpanId::random(&mut rng);

        let sampled = match (&self.sampler, &parent_context) {
            (Some(sampler), _) => sampler.should_sample(
                parent_context.as_ref(),
                has_remote_parent,
                trace_id,
                span_id,
                &self.name,
                &self.links,
            ),
            (None, Some(parent)) => parent.is_sampled(),
            (None, None) => tracer.sampler.should_sample(
                None,
                has_remote_parent,
                trace_id,
                span_id,
                &self.name,
                &self.links,
            ),
        };

        let options = parent_context
            .as_ref()
            .map_or(TraceOptions::DEFAULT, SpanContext::trace_options)
            .with_sampled(sampled);
        let context = SpanContext::new(trace_id, span_id, options, tracestate);

        let span = Span::start(
            context,
            self.record_events || sampled,
            self.name,
            self.kind,
            parent_span_id,
            has_remote_parent,
            &tracer.params,
            Arc::clone(&tracer.handler),
            converter,
            Arc::clone(&tracer.clock),
        );
        for link in self.links {
            span.add_link(link);
        }
        span
    }
}

/// Guard returned by [`Tracer::with_span`]. Restores the previous current span on drop.
///
/// Bound to the thread that created it.
#[must_use = "the span is only current while the scope is alive"]
pub struct SpanScope {
    previous: Option<Arc<Span>>,
    _not_send: PhantomData<*const ()>,
}

impl SpanScope {
    fn enter(span: Arc<Span>) -> Self {
        let previous = CURRENT_SPAN.with(|current| current.borrow_mut().replace(span));
        Self {
            previous,
            _not_send: PhantomData,
        }
    }
}

impl Drop for SpanScope {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT_SPAN.with(|current| *current.borrow_mut() = previous);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{TestClock, Timestamp};
    use crate::trace::events::LinkType;
    use crate::trace::sampler::{AlwaysSample, NeverSample};
    use crate::trace::span::NoopStartEndHandler;
    use std::time::Duration;

    fn tracer(sampler: Arc<dyn Sampler>) -> (Tracer, Arc<TestClock>) {
        let clock = Arc::new(TestClock::new(Timestamp::from_secs(100)));
        let tracer = Tracer::new(
            TraceParams::default(),
            sampler,
            clock.clone(),
            Arc::new(NoopStartEndHandler),
        );
        (tracer, clock)
    }

    #[test]
    fn test_root_span_uses_default_sampler() {
        let (tracer, _) = tracer(Arc::new(AlwaysSample));
        let span = tracer.span_builder("root").start();

        assert!(span.context().is_valid());
        assert!(span.context().is_sampled());
        assert!(span.is_recording_events());
        assert_eq!(span.parent_span_id(), None);

        let (tracer, _) = self::tracer(Arc::new(NeverSample));
        let span = tracer.span_builder("root").start();
        assert!(!span.context().is_sampled());
        assert!(!span.is_recording_events());
    }

    #[test]
    fn test_record_events_without_sampling() {
        let (tracer, _) = tracer(Arc::new(NeverSample));
        let span = tracer.span_builder("root").with_record_events(true).start();
        assert!(!span.context().is_sampled());
        assert!(span.is_recording_events());
    }

    #[test]
    fn test_child_inherits_trace_and_time_base() {
        let (tracer, clock) = tracer(Arc::new(AlwaysSample));
        let parent = tracer.span_builder("parent").start();
        clock.advance(Duration::from_nanos(500));
        let child = tracer
            .span_builder("child")
            .with_parent(&parent)
            .with_kind(SpanKind::Client)
            .start();

        assert_eq!(child.context().trace_id(), parent.context().trace_id());
        assert_ne!(child.context().span_id(), parent.context().span_id());
        assert_eq!(child.parent_span_id(), Some(parent.context().span_id()));
        assert!(!child.has_remote_parent());
        assert_eq!(child.timestamp_converter(), parent.timestamp_converter());
        assert_eq!(
            child.start_timestamp(),
            parent.start_timestamp().add_nanos(500)
        );
        assert_eq!(child.kind(), Some(SpanKind::Client));
    }

    #[test]
    fn test_remote_parent_keeps_sampling_decision_and_tracestate() {
        let (tracer, _) = tracer(Arc::new(NeverSample));
        let remote = SpanContext::new(
            TraceId(0xfeed),
            SpanId(0xbeef),
            TraceOptions::DEFAULT.with_sampled(true),
            Tracestate::empty().with_entry("vendor", "x"),
        );

        let child = tracer
            .span_builder("server")
            .with_remote_parent(remote.clone())
            .start();
        assert_eq!(child.context().trace_id(), TraceId(0xfeed));
        assert!(child.context().is_sampled());
        assert!(child.has_remote_parent());
        assert_eq!(child.context().tracestate().get("vendor"), Some("x"));

        // An explicit sampler wins over the parent
        let child = tracer
            .span_builder("server")
            .with_remote_parent(remote)
            .with_sampler(Arc::new(NeverSample))
            .start();
        assert!(!child.context().is_sampled());
    }

    #[test]
    fn test_invalid_parent_starts_new_trace() {
        let (tracer, _) = tracer(Arc::new(AlwaysSample));
        let span = tracer
            .span_builder("orphan")
            .with_remote_parent(SpanContext::INVALID)
            .start();
        assert!(span.context().trace_id().is_valid());
        assert_eq!(span.parent_span_id(), None);
    }

    #[test]
    fn test_links_are_recorded() {
        let (tracer, _) = tracer(Arc::new(AlwaysSample));
        let other = tracer.span_builder("other").start();
        let link = Link::from_span_context(other.context(), LinkType::ParentLinkedSpan);

        let span = tracer
            .span_builder("linked")
            .with_links(vec![link.clone()])
            .start();
        span.end();
        assert_eq!(span.to_span_data().unwrap().links.links, vec![link]);
    }

    #[test]
    fn test_scope_restores_previous_span() {
        let (tracer, _) = tracer(Arc::new(AlwaysSample));
        let outer = Arc::new(tracer.span_builder("outer").start());
        let inner = Arc::new(tracer.span_builder("inner").start());

        assert!(Tracer::current_span().is_none());
        {
            let _outer_scope = tracer.with_span(Arc::clone(&outer));
            {
                let _inner_scope = tracer.with_span(Arc::clone(&inner));
                let current = Tracer::current_span().unwrap();
                assert!(Arc::ptr_eq(&current, &inner));
            }
            let current = Tracer::current_span().unwrap();
            assert!(Arc::ptr_eq(&current, &outer));
        }
        assert!(Tracer::current_span().is_none());
    }

    #[test]
    fn test_scope_restored_on_unwind() {
        let (tracer, _) = tracer(Arc::new(AlwaysSample));
        let span = Arc::new(tracer.span_builder("panicky").start());

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _scope = tracer.with_span(Arc::clone(&span));
            panic!("boom");
        }));

        assert!(result.is_err());
        assert!(Tracer::current_span().is_none());
    }
}

//! Span lifecycle.
//!
//! A [`Span`] is `Active` from creation until the first [`Span::end`] call and
//! `Ended` forever after. While active it accepts attributes, annotations, message
//! events and links into independently bounded buffers. The end transition freezes
//! everything into an immutable [`SpanData`], which is what observers and exporters
//! see; the mutable span itself is never shared with them.
//!
//! All mutators take `&self` and are safe to call from many threads at once. A
//! single mutex guards the buffers; the `ended` flag is the one serialization point
//! for the end transition (compare-and-swap, so concurrent `end` calls collapse to
//! one).

use crate::bounded::{BoundedList, BoundedMap};
use crate::clock::{Clock, Timestamp, TimestampConverter};
use crate::trace::config::TraceParams;
use crate::trace::context::{SpanContext, SpanId};
use crate::trace::events::{
    Annotation, AttributeValue, EndSpanOptions, Link, MessageEvent, SpanKind, Status, TimedEvent,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Reading frozen span state at the wrong point in the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SpanStateError {
    /// The span has not ended yet; its buffers may still change
    #[error("span is still running")]
    Running,
    /// The span was started without event recording, so there is nothing to freeze
    #[error("span does not record events")]
    NotRecordingEvents,
}

/// Observer of span start and end transitions.
///
/// Both hooks run synchronously on the thread driving the transition, and only for
/// spans that record events. Keep them short.
pub trait StartEndHandler: Send + Sync {
    /// Called once, right after the span is created.
    fn on_start(&self, span: &Span);

    /// Called once, right after the span ends, with its frozen data.
    fn on_end(&self, data: &Arc<SpanData>);
}

/// Handler that observes nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStartEndHandler;

impl StartEndHandler for NoopStartEndHandler {
    fn on_start(&self, _span: &Span) {}

    fn on_end(&self, _data: &Arc<SpanData>) {}
}

/// Fans each transition out to several handlers, in registration order.
#[derive(Default, Clone)]
pub struct StartEndHandlers {
    handlers: Vec<Arc<dyn StartEndHandler>>,
}

impl StartEndHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, handler: Arc<dyn StartEndHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl StartEndHandler for StartEndHandlers {
    fn on_start(&self, span: &Span) {
        for handler in &self.handlers {
            handler.on_start(span);
        }
    }

    fn on_end(&self, data: &Arc<SpanData>) {
        for handler in &self.handlers {
            handler.on_end(data);
        }
    }
}

/// Frozen attribute map plus the number of attributes evicted.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Attributes {
    pub attribute_map: HashMap<String, AttributeValue>,
    pub dropped_attributes_count: u32,
}

/// Frozen timed events, oldest first, plus the number evicted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedEvents<T> {
    pub events: Vec<TimedEvent<T>>,
    pub dropped_events_count: u32,
}

/// Frozen links, oldest first, plus the number evicted.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Links {
    pub links: Vec<Link>,
    pub dropped_links_count: u32,
}

/// Immutable record of an ended span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanData {
    pub context: SpanContext,
    pub parent_span_id: Option<SpanId>,
    pub has_remote_parent: bool,
    pub name: String,
    pub kind: Option<SpanKind>,
    pub start_timestamp: Timestamp,
    pub attributes: Attributes,
    pub annotations: TimedEvents<Annotation>,
    pub message_events: TimedEvents<MessageEvent>,
    pub links: Links,
    pub status: Status,
    pub end_timestamp: Timestamp,
    /// Local routing flag, not part of the exported record.
    #[serde(skip)]
    pub sample_to_local_span_store: bool,
}

impl SpanData {
    /// Wall time between start and end.
    pub fn latency(&self) -> Duration {
        self.end_timestamp
            .saturating_duration_since(self.start_timestamp)
    }
}

struct SpanState {
    name: String,
    status: Option<Status>,
    attributes: BoundedMap<String, AttributeValue>,
    annotations: BoundedList<TimedEvent<Annotation>>,
    message_events: BoundedList<TimedEvent<MessageEvent>>,
    links: BoundedList<Link>,
    end_timestamp: Option<Timestamp>,
    sample_to_local_span_store: bool,
    frozen: Option<Arc<SpanData>>,
}

/// A single timed operation within a trace.
pub struct Span {
    context: SpanContext,
    parent_span_id: Option<SpanId>,
    has_remote_parent: bool,
    record_events: bool,
    kind: Option<SpanKind>,
    start_timestamp: Timestamp,
    converter: TimestampConverter,
    clock: Arc<dyn Clock>,
    handler: Arc<dyn StartEndHandler>,
    ended: AtomicBool,
    state: Mutex<SpanState>,
}

impl std::fmt::Debug for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Span")
            .field("context", &self.context)
            .field("parent_span_id", &self.parent_span_id)
            .field("record_events", &self.record_events)
            .field("ended", &self.has_ended())
            .finish_non_exhaustive()
    }
}

impl Span {
    /// Creates and starts a span.
    ///
    /// `converter` should be the parent's converter for children of a local parent,
    /// so the whole local trace shares one time base; `None` anchors a new one.
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        context: SpanContext,
        record_events: bool,
        name: impl Into<String>,
        kind: Option<SpanKind>,
        parent_span_id: Option<SpanId>,
        has_remote_parent: bool,
        params: &TraceParams,
        handler: Arc<dyn StartEndHandler>,
        converter: Option<TimestampConverter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let converter = converter.unwrap_or_else(|| TimestampConverter::now(clock.as_ref()));
        let start_timestamp = converter.convert_nanos(clock.now_nanos());

        let span = Self {
            context,
            parent_span_id,
            has_remote_parent,
            record_events,
            kind,
            start_timestamp,
            converter,
            clock,
            handler,
            ended: AtomicBool::new(false),
            state: Mutex::new(SpanState {
                name: name.into(),
                status: None,
                attributes: BoundedMap::new(params.max_number_of_attributes),
                annotations: BoundedList::new(params.max_number_of_annotations),
                message_events: BoundedList::new(params.max_number_of_message_events),
                links: BoundedList::new(params.max_number_of_links),
                end_timestamp: None,
                sample_to_local_span_store: false,
                frozen: None,
            }),
        };

        if span.record_events {
            span.handler.on_start(&span);
        }
        span
    }

    pub fn context(&self) -> &SpanContext {
        &self.context
    }

    pub fn parent_span_id(&self) -> Option<SpanId> {
        self.parent_span_id
    }

    pub fn has_remote_parent(&self) -> bool {
        self.has_remote_parent
    }

    pub fn is_recording_events(&self) -> bool {
        self.record_events
    }

    pub fn kind(&self) -> Option<SpanKind> {
        self.kind
    }

    pub fn start_timestamp(&self) -> Timestamp {
        self.start_timestamp
    }

    /// Converter children should share to stay on this span's time base.
    pub fn timestamp_converter(&self) -> TimestampConverter {
        self.converter
    }

    pub fn has_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    pub fn name(&self) -> String {
        self.state.lock().name.clone()
    }

    /// Renames the span. Ignored once ended.
    pub fn update_name(&self, name: impl Into<String>) {
        let mut state = self.state.lock();
        if self.has_ended() {
            return;
        }
        state.name = name.into();
    }

    /// Current status; `Ok` until something else is set.
    pub fn status(&self) -> Status {
        self.state.lock().status.clone().unwrap_or(Status::OK)
    }

    /// Overwrites the status. Ignored once ended.
    pub fn set_status(&self, status: Status) {
        let mut state = self.state.lock();
        if self.has_ended() {
            return;
        }
        state.status = Some(status);
    }

    pub fn put_attribute(&self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        if !self.record_events {
            return;
        }
        let mut state = self.state.lock();
        if self.has_ended() {
            return;
        }
        state.attributes.put(key.into(), value.into());
    }

    pub fn put_attributes<I>(&self, attributes: I)
    where
        I: IntoIterator<Item = (String, AttributeValue)>,
    {
        if !self.record_events {
            return;
        }
        let mut state = self.state.lock();
        if self.has_ended() {
            return;
        }
        for (key, value) in attributes {
            state.attributes.put(key, value);
        }
    }

    pub fn add_annotation(&self, annotation: Annotation) {
        if !self.record_events {
            return;
        }
        let timestamp = self.now();
        let mut state = self.state.lock();
        if self.has_ended() {
            return;
        }
        state.annotations.add(TimedEvent {
            timestamp,
            event: annotation,
        });
    }

    pub fn add_message_event(&self, event: MessageEvent) {
        if !self.record_events {
            return;
        }
        let timestamp = self.now();
        let mut state = self.state.lock();
        if self.has_ended() {
            return;
        }
        state.message_events.add(TimedEvent { timestamp, event });
    }

    pub fn add_link(&self, link: Link) {
        if !self.record_events {
            return;
        }
        let mut state = self.state.lock();
        if self.has_ended() {
            return;
        }
        state.links.add(link);
    }

    /// Ends the span with default options.
    pub fn end(&self) {
        self.end_with(EndSpanOptions::default());
    }

    /// Ends the span. Only the first call has any effect.
    pub fn end_with(&self, options: EndSpanOptions) {
        if self
            .ended
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(span_id = %self.context.span_id(), "end() called on an ended span");
            return;
        }

        let end_timestamp = self.now();
        let frozen = {
            let mut state = self.state.lock();
            if let Some(status) = options.status {
                state.status = Some(status);
            }
            let status = state.status.get_or_insert(Status::OK).clone();
            state.sample_to_local_span_store = options.sample_to_local_span_store;
            state.end_timestamp = Some(end_timestamp);

            if !self.record_events {
                return;
            }

            let data = Arc::new(self.freeze(&state, status, end_timestamp));
            state.frozen = Some(Arc::clone(&data));
            data
        };

        self.handler.on_end(&frozen);
    }

    /// Frozen view of the ended span.
    ///
    /// Fails while the span is running, and for spans that do not record events.
    /// Every call after the end returns the same data.
    pub fn to_span_data(&self) -> Result<Arc<SpanData>, SpanStateError> {
        if !self.record_events {
            return Err(SpanStateError::NotRecordingEvents);
        }
        self.state
            .lock()
            .frozen
            .clone()
            .ok_or(SpanStateError::Running)
    }

    /// Whether the span was routed to the local sampled span store. Only known after end.
    pub fn is_sample_to_local_span_store(&self) -> Result<bool, SpanStateError> {
        let state = self.state.lock();
        match state.end_timestamp {
            Some(_) => Ok(state.sample_to_local_span_store),
            None => Err(SpanStateError::Running),
        }
    }

    fn now(&self) -> Timestamp {
        self.converter.convert_nanos(self.clock.now_nanos())
    }

    fn freeze(&self, state: &SpanState, status: Status, end_timestamp: Timestamp) -> SpanData {
        let attributes = state.attributes.snapshot();
        let annotations = state.annotations.snapshot();
        let message_events = state.message_events.snapshot();
        let links = state.links.snapshot();

        SpanData {
            context: self.context.clone(),
            parent_span_id: self.parent_span_id,
            has_remote_parent: self.has_remote_parent,
            name: state.name.clone(),
            kind: self.kind,
            start_timestamp: self.start_timestamp,
            attributes: Attributes {
                attribute_map: attributes.items.into_iter().collect(),
                dropped_attributes_count: attributes.dropped_count,
            },
            annotations: TimedEvents {
                events: annotations.items,
                dropped_events_count: annotations.dropped_count,
            },
            message_events: TimedEvents {
                events: message_events.items,
                dropped_events_count: message_events.dropped_count,
            },
            links: Links {
                links: links.items,
                dropped_links_count: links.dropped_count,
            },
            status,
            end_timestamp,
            sample_to_local_span_store: state.sample_to_local_span_store,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use crate::trace::context::{TraceId, TraceOptions, Tracestate};
    use crate::trace::events::{LinkType, MessageEventType};
    use std::sync::atomic::AtomicUsize;

    const SPAN_NAME: &str = "MySpanName";
    const ANNOTATION_DESCRIPTION: &str = "MyAnnotation";

    #[derive(Default)]
    struct CountingHandler {
        started: AtomicUsize,
        ended: AtomicUsize,
        last: Mutex<Option<Arc<SpanData>>>,
    }

    impl StartEndHandler for CountingHandler {
        fn on_start(&self, _span: &Span) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }

        fn on_end(&self, data: &Arc<SpanData>) {
            self.ended.fetch_add(1, Ordering::SeqCst);
            *self.last.lock() = Some(Arc::clone(data));
        }
    }

    struct Fixture {
        context: SpanContext,
        parent: SpanId,
        clock: Arc<TestClock>,
        handler: Arc<CountingHandler>,
        start: Timestamp,
    }

    impl Fixture {
        fn new() -> Self {
            let start = Timestamp::from_secs(1234).add_nanos(5678);
            Self {
                context: SpanContext::new(
                    TraceId(0xabcdef),
                    SpanId(0x1234),
                    TraceOptions::DEFAULT,
                    Tracestate::empty(),
                ),
                parent: SpanId(0x99),
                clock: Arc::new(TestClock::new(start)),
                handler: Arc::new(CountingHandler::default()),
                start,
            }
        }

        fn span(&self, record_events: bool, params: &TraceParams) -> Span {
            Span::start(
                self.context.clone(),
                record_events,
                SPAN_NAME,
                None,
                Some(self.parent),
                false,
                params,
                self.handler.clone(),
                None,
                self.clock.clone(),
            )
        }

        fn advance(&self, nanos: u64) {
            self.clock.advance(Duration::from_nanos(nanos));
        }
    }

    fn sample_attributes() -> Vec<(String, AttributeValue)> {
        vec![
            ("MyStringAttributeKey".to_string(), "MyStringAttributeValue".into()),
            ("MyLongAttributeKey".to_string(), 123i64.into()),
            ("MyBooleanAttributeKey".to_string(), false.into()),
        ]
    }

    #[test]
    fn test_no_record_events_discards_and_cannot_freeze() {
        let fx = Fixture::new();
        let span = fx.span(false, &TraceParams::default());

        span.put_attributes(sample_attributes());
        span.add_annotation(Annotation::from_description(ANNOTATION_DESCRIPTION));
        span.add_message_event(MessageEvent::new(MessageEventType::Received, 1));
        span.add_link(Link::from_span_context(&fx.context, LinkType::ChildLinkedSpan));
        span.end();

        assert_eq!(span.to_span_data(), Err(SpanStateError::NotRecordingEvents));
        assert_eq!(fx.handler.started.load(Ordering::SeqCst), 0);
        assert_eq!(fx.handler.ended.load(Ordering::SeqCst), 0);
        // The end transition still happened
        assert!(span.has_ended());
        assert_eq!(span.is_sample_to_local_span_store(), Ok(false));
    }

    #[test]
    fn test_to_span_data_before_end_fails() {
        let fx = Fixture::new();
        let span = fx.span(true, &TraceParams::default());
        span.put_attribute("k", "v");

        assert_eq!(span.to_span_data(), Err(SpanStateError::Running));
        assert_eq!(fx.handler.started.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_no_events_recorded_after_end() {
        let fx = Fixture::new();
        let span = fx.span(true, &TraceParams::default());
        span.end();
        let before = span.to_span_data().unwrap();

        span.put_attributes(sample_attributes());
        span.put_attribute("MySingleStringAttributeKey", "MySingleStringAttributeValue");
        span.add_annotation(Annotation::from_description(ANNOTATION_DESCRIPTION));
        span.add_message_event(
            MessageEvent::new(MessageEventType::Received, 1).with_uncompressed_size(3),
        );
        span.add_link(Link::from_span_context(&fx.context, LinkType::ChildLinkedSpan));
        span.update_name("renamed");
        span.set_status(Status::CANCELLED);

        let data = span.to_span_data().unwrap();
        assert_eq!(*data, *before);
        assert_eq!(data.start_timestamp, fx.start);
        assert!(data.attributes.attribute_map.is_empty());
        assert!(data.annotations.events.is_empty());
        assert!(data.message_events.events.is_empty());
        assert!(data.links.links.is_empty());
        assert_eq!(data.status, Status::OK);
        assert_eq!(data.end_timestamp, fx.start);
        assert_eq!(data.name, SPAN_NAME);
        assert_eq!(span.status(), Status::OK);
    }

    #[test]
    fn test_span_data_of_ended_span() {
        let fx = Fixture::new();
        let span = Span::start(
            fx.context.clone(),
            true,
            SPAN_NAME,
            Some(SpanKind::Server),
            Some(fx.parent),
            true,
            &TraceParams::default(),
            fx.handler.clone(),
            None,
            fx.clock.clone(),
        );

        span.put_attribute("MySingleStringAttributeKey", "MySingleStringAttributeValue");
        span.put_attributes(sample_attributes());
        fx.advance(100);
        span.add_annotation(Annotation::from_description(ANNOTATION_DESCRIPTION));
        fx.advance(100);
        let annotated = Annotation::with_attributes(
            ANNOTATION_DESCRIPTION,
            sample_attributes().into_iter().collect(),
        );
        span.add_annotation(annotated.clone());
        fx.advance(100);
        let network_event =
            MessageEvent::new(MessageEventType::Received, 1).with_uncompressed_size(3);
        span.add_message_event(network_event);
        let link = Link::from_span_context(&fx.context, LinkType::ChildLinkedSpan);
        span.add_link(link.clone());
        fx.advance(100);
        span.end_with(EndSpanOptions::default().with_status(Status::CANCELLED));

        let data = span.to_span_data().unwrap();
        assert_eq!(data.context, fx.context);
        assert_eq!(data.name, SPAN_NAME);
        assert_eq!(data.kind, Some(SpanKind::Server));
        assert_eq!(data.parent_span_id, Some(fx.parent));
        assert!(data.has_remote_parent);

        let mut expected: HashMap<String, AttributeValue> = sample_attributes().into_iter().collect();
        expected.insert(
            "MySingleStringAttributeKey".to_string(),
            "MySingleStringAttributeValue".into(),
        );
        assert_eq!(data.attributes.attribute_map, expected);
        assert_eq!(data.attributes.dropped_attributes_count, 0);

        assert_eq!(data.annotations.dropped_events_count, 0);
        assert_eq!(data.annotations.events.len(), 2);
        assert_eq!(data.annotations.events[0].timestamp, fx.start.add_nanos(100));
        assert_eq!(
            data.annotations.events[0].event,
            Annotation::from_description(ANNOTATION_DESCRIPTION)
        );
        assert_eq!(data.annotations.events[1].timestamp, fx.start.add_nanos(200));
        assert_eq!(data.annotations.events[1].event, annotated);

        assert_eq!(data.message_events.events.len(), 1);
        assert_eq!(data.message_events.events[0].timestamp, fx.start.add_nanos(300));
        assert_eq!(data.message_events.events[0].event, network_event);

        assert_eq!(data.links.links, vec![link]);
        assert_eq!(data.links.dropped_links_count, 0);

        assert_eq!(data.start_timestamp, fx.start);
        assert_eq!(data.status, Status::CANCELLED);
        assert_eq!(data.end_timestamp, fx.start.add_nanos(400));
        assert_eq!(data.latency(), Duration::from_nanos(400));

        assert_eq!(fx.handler.started.load(Ordering::SeqCst), 1);
        assert_eq!(fx.handler.ended.load(Ordering::SeqCst), 1);
        let observed = fx.handler.last.lock().clone().unwrap();
        assert!(Arc::ptr_eq(&observed, &data));
    }

    #[test]
    fn test_status_via_set_status() {
        let fx = Fixture::new();
        let span = fx.span(true, &TraceParams::default());
        fx.advance(100);

        assert_eq!(span.status(), Status::OK);
        span.set_status(Status::CANCELLED);
        assert_eq!(span.status(), Status::CANCELLED);
        span.end();
        assert_eq!(span.status(), Status::CANCELLED);
        assert_eq!(span.to_span_data().unwrap().status, Status::CANCELLED);
    }

    #[test]
    fn test_status_via_end_options_overrides_manual_status() {
        let fx = Fixture::new();
        let span = fx.span(true, &TraceParams::default());
        fx.advance(100);

        span.set_status(Status::CANCELLED);
        span.end_with(EndSpanOptions::default().with_status(Status::ABORTED));
        assert_eq!(span.status(), Status::ABORTED);

        // Setting status after the end is ignored
        span.set_status(Status::INTERNAL);
        assert_eq!(span.status(), Status::ABORTED);
    }

    #[test]
    fn test_end_twice_notifies_once() {
        let fx = Fixture::new();
        let span = fx.span(true, &TraceParams::default());

        span.end_with(EndSpanOptions::default().with_status(Status::NOT_FOUND));
        fx.advance(50);
        span.end_with(EndSpanOptions::default().with_status(Status::ABORTED));

        assert_eq!(fx.handler.ended.load(Ordering::SeqCst), 1);
        let data = span.to_span_data().unwrap();
        assert_eq!(data.status, Status::NOT_FOUND);
        assert_eq!(data.end_timestamp, fx.start);
    }

    #[test]
    fn test_dropping_attributes() {
        let fx = Fixture::new();
        let max = 8;
        let span = fx.span(true, &TraceParams::default().with_max_attributes(max));

        for i in 0..2 * max {
            span.put_attributes([(format!("MyStringAttributeKey{i}"), AttributeValue::Int(i as i64))]);
        }
        span.end();

        let data = span.to_span_data().unwrap();
        assert_eq!(data.attributes.dropped_attributes_count, max as u32);
        assert_eq!(data.attributes.attribute_map.len(), max);
        for i in max..2 * max {
            assert_eq!(
                data.attributes.attribute_map[&format!("MyStringAttributeKey{i}")],
                AttributeValue::Int(i as i64)
            );
        }

        // Re-reading after end returns identical counts
        let again = span.to_span_data().unwrap();
        assert_eq!(again.attributes, data.attributes);
    }

    #[test]
    fn test_dropping_and_re_adding_attributes() {
        let fx = Fixture::new();
        let max = 8;
        let span = fx.span(true, &TraceParams::default().with_max_attributes(max));

        for i in 0..2 * max {
            span.put_attribute(format!("MyStringAttributeKey{i}"), i as i64);
        }
        for i in 0..max / 2 {
            span.put_attribute(format!("MyStringAttributeKey{i}"), i as i64);
        }
        span.end();

        let data = span.to_span_data().unwrap();
        assert_eq!(data.attributes.dropped_attributes_count, (max * 3 / 2) as u32);
        assert_eq!(data.attributes.attribute_map.len(), max);
        // Newest half of the second round survives...
        for i in max * 3 / 2..2 * max {
            assert_eq!(
                data.attributes.attribute_map[&format!("MyStringAttributeKey{i}")],
                AttributeValue::Int(i as i64)
            );
        }
        // ...alongside the re-added initial keys
        for i in 0..max / 2 {
            assert_eq!(
                data.attributes.attribute_map[&format!("MyStringAttributeKey{i}")],
                AttributeValue::Int(i as i64)
            );
        }
    }

    #[test]
    fn test_dropping_annotations() {
        let fx = Fixture::new();
        let max = 8;
        let span = fx.span(true, &TraceParams::default().with_max_annotations(max));
        let annotation = Annotation::from_description(ANNOTATION_DESCRIPTION);

        for _ in 0..2 * max {
            span.add_annotation(annotation.clone());
            fx.advance(100);
        }
        span.end();

        let data = span.to_span_data().unwrap();
        assert_eq!(data.annotations.dropped_events_count, max as u32);
        assert_eq!(data.annotations.events.len(), max);
        for (i, event) in data.annotations.events.iter().enumerate() {
            assert_eq!(event.timestamp, fx.start.add_nanos(100 * (max + i) as u64));
            assert_eq!(event.event, annotation);
        }
    }

    #[test]
    fn test_dropping_message_events() {
        let fx = Fixture::new();
        let max = 8;
        let span = fx.span(true, &TraceParams::default().with_max_message_events(max));
        let event = MessageEvent::new(MessageEventType::Received, 1).with_uncompressed_size(3);

        for _ in 0..2 * max {
            span.add_message_event(event);
            fx.advance(100);
        }
        span.end();

        let data = span.to_span_data().unwrap();
        assert_eq!(data.message_events.dropped_events_count, max as u32);
        assert_eq!(data.message_events.events.len(), max);
        for (i, timed) in data.message_events.events.iter().enumerate() {
            assert_eq!(timed.timestamp, fx.start.add_nanos(100 * (max + i) as u64));
            assert_eq!(timed.event, event);
        }
    }

    #[test]
    fn test_dropping_links() {
        let fx = Fixture::new();
        let max = 8;
        let span = fx.span(true, &TraceParams::default().with_max_links(max));
        let link = Link::from_span_context(&fx.context, LinkType::ChildLinkedSpan);

        for _ in 0..2 * max {
            span.add_link(link.clone());
        }
        span.end();

        let data = span.to_span_data().unwrap();
        assert_eq!(data.links.dropped_links_count, max as u32);
        assert_eq!(data.links.links.len(), max);
        assert!(data.links.links.iter().all(|l| *l == link));
    }

    #[test]
    fn test_sample_to_local_span_store() {
        let fx = Fixture::new();
        let span = fx.span(true, &TraceParams::default());
        span.end_with(EndSpanOptions::default().with_sample_to_local_span_store(true));
        assert_eq!(span.is_sample_to_local_span_store(), Ok(true));
        assert!(span.to_span_data().unwrap().sample_to_local_span_store);

        let span2 = fx.span(true, &TraceParams::default());
        span2.end();
        assert_eq!(span2.is_sample_to_local_span_store(), Ok(false));

        assert_eq!(fx.handler.ended.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_sample_to_local_span_store_running_span() {
        let fx = Fixture::new();
        let span = fx.span(true, &TraceParams::default());
        assert_eq!(span.is_sample_to_local_span_store(), Err(SpanStateError::Running));
    }

    #[test]
    fn test_update_name_before_end() {
        let fx = Fixture::new();
        let span = fx.span(true, &TraceParams::default());
        span.update_name("GET /users");
        span.end();
        assert_eq!(span.to_span_data().unwrap().name, "GET /users");
    }

    #[test]
    fn test_concurrent_end_notifies_once() {
        let fx = Fixture::new();
        let span = Arc::new(fx.span(true, &TraceParams::default().with_max_attributes(1000)));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let span = Arc::clone(&span);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        span.put_attribute(format!("t{t}-{i}"), i as i64);
                    }
                    span.end();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(fx.handler.ended.load(Ordering::SeqCst), 1);
        let data = span.to_span_data().unwrap();
        assert!(data.attributes.attribute_map.len() <= 800);
        assert_eq!(data.attributes.dropped_attributes_count, 0);
    }

    #[test]
    fn test_composite_handler_fans_out() {
        let fx = Fixture::new();
        let second = Arc::new(CountingHandler::default());
        let handlers = StartEndHandlers::new()
            .with(fx.handler.clone())
            .with(second.clone())
            .with(Arc::new(NoopStartEndHandler));
        assert_eq!(handlers.len(), 3);

        let span = Span::start(
            fx.context.clone(),
            true,
            SPAN_NAME,
            None,
            None,
            false,
            &TraceParams::default(),
            Arc::new(handlers),
            None,
            fx.clock.clone(),
        );
        span.end();

        assert_eq!(fx.handler.ended.load(Ordering::SeqCst), 1);
        assert_eq!(second.started.load(Ordering::SeqCst), 1);
        assert_eq!(second.ended.load(Ordering::SeqCst), 1);
    }
}

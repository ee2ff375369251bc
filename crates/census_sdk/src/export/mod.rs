//! Where ended spans go: the handler dispatcher and the local sampled span store.

pub mod dispatcher;
pub mod handler;
pub mod sampled_store;

pub use dispatcher::{DispatchMetrics, DispatcherConfig, SpanDispatcher};
pub use handler::{
    ExportError, Handler, HandlerBoxed, JsonFileHandler, LoggingHandler, NullHandler, SpanBatch,
};
pub use sampled_store::{
    ErrorFilter, InProcessSampledSpanStore, LatencyBucket, LatencyFilter, NoopSampledSpanStore,
    PerSpanNameSummary, QueryError, SampledSpanStore, SampledSpanStoreConfig,
    SampledSpanStoreSummary,
};

use crate::trace::span::{Span, SpanData, StartEndHandler};
use std::sync::Arc;

/// Routes every ended span: sampled spans to the dispatcher, spans flagged for the
/// local store to the sampled span store. A span can go to both.
#[derive(Clone)]
pub struct ExportComponent {
    dispatcher: Arc<SpanDispatcher>,
    sampled_span_store: Arc<dyn SampledSpanStore>,
}

impl std::fmt::Debug for ExportComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportComponent")
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

impl ExportComponent {
    pub fn new(
        dispatcher: Arc<SpanDispatcher>,
        sampled_span_store: Arc<dyn SampledSpanStore>,
    ) -> Self {
        Self {
            dispatcher,
            sampled_span_store,
        }
    }

    pub fn dispatcher(&self) -> &Arc<SpanDispatcher> {
        &self.dispatcher
    }

    pub fn sampled_span_store(&self) -> &Arc<dyn SampledSpanStore> {
        &self.sampled_span_store
    }
}

impl StartEndHandler for ExportComponent {
    fn on_start(&self, _span: &Span) {}

    fn on_end(&self, data: &Arc<SpanData>) {
        if data.sample_to_local_span_store {
            self.sampled_span_store.consider_for_sampling(data);
        }
        self.dispatcher.on_end(data);
    }
}

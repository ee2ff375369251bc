//! Wires tracer, export pipeline and stats into one explicit object.
//!
//! ```no_run
//! use census_sdk::provider::Telemetry;
//! use census_sdk::export::LoggingHandler;
//! use std::sync::Arc;
//!
//! # async fn run() {
//! let telemetry = Telemetry::builder()
//!     .with_handler("log", Arc::new(LoggingHandler::new()))
//!     .build();
//!
//! let span = telemetry.tracer().span_builder("work").start();
//! span.end();
//!
//! telemetry.shutdown().await;
//! # }
//! ```

use crate::clock::{Clock, SystemClock};
use crate::export::{
    DispatcherConfig, ExportComponent, HandlerBoxed, InProcessSampledSpanStore,
    NoopSampledSpanStore, SampledSpanStore, SampledSpanStoreConfig, SpanDispatcher,
};
use crate::stats::StatsManager;
use crate::trace::{AlwaysSample, Sampler, StartEndHandler, StartEndHandlers, TraceParams, Tracer};
use std::sync::Arc;

/// Assembles a [`Telemetry`].
pub struct TelemetryBuilder {
    trace_params: TraceParams,
    sampler: Arc<dyn Sampler>,
    clock: Arc<dyn Clock>,
    dispatcher_config: DispatcherConfig,
    sampled_span_store: Option<Arc<dyn SampledSpanStore>>,
    handlers: Vec<(String, Arc<dyn HandlerBoxed>)>,
    observers: Vec<Arc<dyn StartEndHandler>>,
}

impl Default for TelemetryBuilder {
    fn default() -> Self {
        Self {
            trace_params: TraceParams::default(),
            sampler: Arc::new(AlwaysSample),
            clock: Arc::new(SystemClock::new()),
            dispatcher_config: DispatcherConfig::default(),
            sampled_span_store: None,
            handlers: Vec::new(),
            observers: Vec::new(),
        }
    }
}

impl TelemetryBuilder {
    #[must_use]
    pub fn with_trace_params(mut self, params: TraceParams) -> Self {
        self.trace_params = params;
        self
    }

    #[must_use]
    pub fn with_sampler(mut self, sampler: Arc<dyn Sampler>) -> Self {
        self.sampler = sampler;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_dispatcher_config(mut self, config: DispatcherConfig) -> Self {
        self.dispatcher_config = config;
        self
    }

    /// Keeps latency and error samples locally. Without this, or
    /// [`TelemetryBuilder::with_sampled_span_store`], the store is a no-op.
    #[must_use]
    pub fn with_in_process_sampled_span_store(mut self, config: SampledSpanStoreConfig) -> Self {
        self.sampled_span_store = Some(Arc::new(InProcessSampledSpanStore::new(config)));
        self
    }

    /// Installs a custom sampled span store.
    #[must_use]
    pub fn with_sampled_span_store(mut self, store: Arc<dyn SampledSpanStore>) -> Self {
        self.sampled_span_store = Some(store);
        self
    }

    #[must_use]
    pub fn with_handler(mut self, name: impl Into<String>, handler: Arc<dyn HandlerBoxed>) -> Self {
        self.handlers.push((name.into(), handler));
        self
    }

    /// Adds an observer notified alongside the export pipeline.
    #[must_use]
    pub fn with_start_end_handler(mut self, handler: Arc<dyn StartEndHandler>) -> Self {
        self.observers.push(handler);
        self
    }

    /// Builds the component graph.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn build(self) -> Telemetry {
        let dispatcher = Arc::new(SpanDispatcher::start(self.dispatcher_config));
        for (name, handler) in self.handlers {
            dispatcher.register_handler(name, handler);
        }

        let store: Arc<dyn SampledSpanStore> = match self.sampled_span_store {
            Some(store) => store,
            None => Arc::new(NoopSampledSpanStore::new()),
        };
        let export = ExportComponent::new(dispatcher, store);

        let span_handler: Arc<dyn StartEndHandler> = if self.observers.is_empty() {
            Arc::new(export.clone())
        } else {
            let fan_out = self
                .observers
                .into_iter()
                .fold(StartEndHandlers::new().with(Arc::new(export.clone())), |acc, h| {
                    acc.with(h)
                });
            Arc::new(fan_out)
        };

        let tracer = Tracer::new(
            self.trace_params,
            self.sampler,
            Arc::clone(&self.clock),
            span_handler,
        );
        let stats = Arc::new(StatsManager::new(self.clock));

        Telemetry {
            tracer,
            export,
            stats,
        }
    }
}

/// Tracing and stats for one process, with no global state.
#[derive(Debug, Clone)]
pub struct Telemetry {
    tracer: Tracer,
    export: ExportComponent,
    stats: Arc<StatsManager>,
}

impl Telemetry {
    pub fn builder() -> TelemetryBuilder {
        TelemetryBuilder::default()
    }

    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    pub fn export(&self) -> &ExportComponent {
        &self.export
    }

    pub fn dispatcher(&self) -> &Arc<SpanDispatcher> {
        self.export.dispatcher()
    }

    pub fn sampled_span_store(&self) -> &Arc<dyn SampledSpanStore> {
        self.export.sampled_span_store()
    }

    pub fn stats(&self) -> &Arc<StatsManager> {
        &self.stats
    }

    /// Delivers queued spans and stops the dispatcher.
    pub async fn shutdown(&self) {
        self.export.dispatcher().shutdown().await;
    }
}

use crate::trace::span::SpanData;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Error types for handler export operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExportError {
    /// Transport-layer error (file system, network)
    #[error("transport error: {0}")]
    Transport(String),
    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Backend refused the batch
    #[error("batch rejected: {0}")]
    Rejected(String),
}

/// Ended spans delivered to handlers in one dispatch cycle, in end order.
#[derive(Debug, Clone, Default)]
pub struct SpanBatch {
    pub spans: Vec<Arc<SpanData>>,
}

impl SpanBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, span: Arc<SpanData>) {
        self.spans.push(span);
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }
}

impl From<Vec<Arc<SpanData>>> for SpanBatch {
    fn from(spans: Vec<Arc<SpanData>>) -> Self {
        Self { spans }
    }
}

/// Receives batches of ended, sampled spans from the dispatcher.
///
/// Uses native async fn in traits instead of `#[async_trait]`. Use
/// [`HandlerBoxed`] for dynamic dispatch.
pub trait Handler: Send + Sync {
    /// Exports a batch of spans.
    fn export(&self, batch: SpanBatch) -> impl Future<Output = Result<(), ExportError>> + Send;

    /// Returns the handler name for debugging.
    fn name(&self) -> &str;
}

/// Object-safe version of [`Handler`] for dynamic dispatch.
pub trait HandlerBoxed: Send + Sync {
    /// Exports a batch of spans (boxed future for object safety).
    fn export_boxed(
        &self,
        batch: SpanBatch,
    ) -> std::pin::Pin<Box<dyn Future<Output = Result<(), ExportError>> + Send + '_>>;

    /// Returns the handler name for debugging.
    fn name(&self) -> &str;
}

/// Blanket implementation: any Handler can be used as HandlerBoxed
impl<T: Handler> HandlerBoxed for T {
    fn export_boxed(
        &self,
        batch: SpanBatch,
    ) -> std::pin::Pin<Box<dyn Future<Output = Result<(), ExportError>> + Send + '_>> {
        Box::pin(self.export(batch))
    }

    fn name(&self) -> &str {
        Handler::name(self)
    }
}

/// Logs every span through `tracing`, for local debugging
#[derive(Debug, Default)]
pub struct LoggingHandler;

impl LoggingHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Handler for LoggingHandler {
    async fn export(&self, batch: SpanBatch) -> Result<(), ExportError> {
        for span in &batch.spans {
            info!(
                trace_id = %span.context.trace_id(),
                span_id = %span.context.span_id(),
                name = %span.name,
                latency_ns = span.latency().as_nanos() as u64,
                status = %span.status,
                "span ended"
            );
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "logging"
    }
}

/// Writes each batch to a file as pretty JSON, replacing the previous contents
#[derive(Debug)]
pub struct JsonFileHandler {
    file_path: String,
}

impl JsonFileHandler {
    pub fn new(file_path: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
        }
    }
}

impl Handler for JsonFileHandler {
    async fn export(&self, batch: SpanBatch) -> Result<(), ExportError> {
        let spans: Vec<&SpanData> = batch.spans.iter().map(AsRef::as_ref).collect();
        let json = serde_json::to_string_pretty(&spans)
            .map_err(|e| ExportError::Serialization(e.to_string()))?;

        tokio::fs::write(&self.file_path, json)
            .await
            .map_err(|e| ExportError::Transport(e.to_string()))?;

        Ok(())
    }

    fn name(&self) -> &str {
        "json_file"
    }
}

/// Discards every batch (for benchmarking)
#[derive(Debug, Default)]
pub struct NullHandler;

impl Handler for NullHandler {
    async fn export(&self, _batch: SpanBatch) -> Result<(), ExportError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "null"
    }
}

/// Test handler that records every exported span for verification
#[cfg(test)]
#[derive(Default)]
pub struct TestHandler {
    spans: parking_lot::Mutex<Vec<Arc<SpanData>>>,
    batches: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl TestHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exported_count(&self) -> usize {
        self.spans.lock().len()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn span_names(&self) -> Vec<String> {
        self.spans.lock().iter().map(|s| s.name.clone()).collect()
    }
}

#[cfg(test)]
impl Handler for TestHandler {
    async fn export(&self, batch: SpanBatch) -> Result<(), ExportError> {
        self.batches
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.spans.lock().extend(batch.spans);
        Ok(())
    }

    fn name(&self) -> &str {
        "test"
    }
}

/// Handler that always fails, or panics, for isolation tests
#[cfg(test)]
pub struct FailingHandler {
    pub panic: bool,
}

#[cfg(test)]
impl Handler for FailingHandler {
    async fn export(&self, _batch: SpanBatch) -> Result<(), ExportError> {
        if self.panic {
            panic!("handler blew up");
        }
        Err(ExportError::Rejected("backend unavailable".to_string()))
    }

    fn name(&self) -> &str {
        "failing"
    }
}

/// Slow handler for backpressure testing
#[cfg(test)]
pub struct SlowHandler {
    pub delay: std::time::Duration,
    pub inner: TestHandler,
}

#[cfg(test)]
impl Handler for SlowHandler {
    async fn export(&self, batch: SpanBatch) -> Result<(), ExportError> {
        tokio::time::sleep(self.delay).await;
        self.inner.export(batch).await
    }

    fn name(&self) -> &str {
        "slow"
    }
}

#[cfg(test)]
pub(crate) fn ended_span_data(name: &str, sampled: bool) -> Arc<SpanData> {
    use crate::clock::{TestClock, Timestamp};
    use crate::trace::config::TraceParams;
    use crate::trace::context::{SpanContext, SpanId, TraceId, TraceOptions, Tracestate};
    use crate::trace::span::{NoopStartEndHandler, Span};

    let context = SpanContext::new(
        TraceId(1),
        SpanId(2),
        TraceOptions::DEFAULT.with_sampled(sampled),
        Tracestate::empty(),
    );
    let span = Span::start(
        context,
        true,
        name,
        None,
        None,
        false,
        &TraceParams::default(),
        Arc::new(NoopStartEndHandler),
        None,
        Arc::new(TestClock::new(Timestamp::from_secs(1))),
    );
    span.end();
    span.to_span_data().expect("span was ended")
}

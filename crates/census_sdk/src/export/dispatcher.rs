//! Background delivery of ended spans to registered handlers.
//!
//! Producers call [`SpanDispatcher::add_span`], which only pushes onto a bounded
//! queue. One tokio task drains the queue every `export_interval` (or earlier,
//! once `max_batch_size` spans are waiting) and hands each batch to every handler
//! concurrently. A failing or panicking handler is logged and counted; the other
//! handlers still get the batch.

use crate::bounded::BoundedList;
use crate::export::handler::{ExportError, HandlerBoxed, SpanBatch};
use crate::trace::span::{Span, SpanData, StartEndHandler};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

/// Configuration for the span dispatcher
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Spans held while waiting for the next cycle; the oldest are dropped beyond this
    pub queue_capacity: usize,
    /// Time between dispatch cycles
    pub export_interval: Duration,
    /// Largest batch handed to a handler in one call
    pub max_batch_size: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 2048,
            export_interval: Duration::from_secs(5),
            max_batch_size: 512,
        }
    }
}

/// Thread-safe dispatch counters (uses atomics)
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    /// Spans accepted by `add_span`
    pub spans_enqueued: AtomicU64,
    /// Spans evicted from a full queue
    pub spans_dropped: AtomicU64,
    /// Spans in batches at least one handler accepted
    pub spans_exported: AtomicU64,
    /// Batches at least one handler accepted
    pub batches_exported: AtomicU64,
    /// Failed or panicked handler calls
    pub export_errors: AtomicU64,
}

impl DispatchMetrics {
    pub fn spans_enqueued(&self) -> u64 {
        self.spans_enqueued.load(Ordering::Relaxed)
    }

    pub fn spans_dropped(&self) -> u64 {
        self.spans_dropped.load(Ordering::Relaxed)
    }

    pub fn spans_exported(&self) -> u64 {
        self.spans_exported.load(Ordering::Relaxed)
    }

    pub fn batches_exported(&self) -> u64 {
        self.batches_exported.load(Ordering::Relaxed)
    }

    pub fn export_errors(&self) -> u64 {
        self.export_errors.load(Ordering::Relaxed)
    }

    fn record_success(&self, span_count: u64) {
        self.spans_exported.fetch_add(span_count, Ordering::Relaxed);
        self.batches_exported.fetch_add(1, Ordering::Relaxed);
    }

    fn record_error(&self) {
        self.export_errors.fetch_add(1, Ordering::Relaxed);
    }
}

struct Shared {
    queue: Mutex<BoundedList<Arc<SpanData>>>,
    closed: AtomicBool,
    handlers: RwLock<HashMap<String, Arc<dyn HandlerBoxed>>>,
    metrics: DispatchMetrics,
    wake: Notify,
    max_batch_size: usize,
}

impl Shared {
    /// Takes everything queued. Once `close` is set, nothing more is ever accepted.
    fn drain(&self, close: bool) -> Vec<Arc<SpanData>> {
        let mut queue = self.queue.lock();
        if close {
            self.closed.store(true, Ordering::Release);
        }
        queue.drain()
    }

    async fn run_cycle(&self, close: bool) {
        let spans = self.drain(close);
        if spans.is_empty() {
            return;
        }

        let handlers: Vec<(String, Arc<dyn HandlerBoxed>)> = self
            .handlers
            .read()
            .iter()
            .map(|(name, handler)| (name.clone(), Arc::clone(handler)))
            .collect();
        if handlers.is_empty() {
            debug!(spans = spans.len(), "no handlers registered, discarding spans");
            return;
        }

        for chunk in spans.chunks(self.max_batch_size.max(1)) {
            self.deliver(&handlers, SpanBatch::from(chunk.to_vec())).await;
        }
    }

    async fn deliver(&self, handlers: &[(String, Arc<dyn HandlerBoxed>)], batch: SpanBatch) {
        let span_count = batch.len() as u64;
        let mut export_tasks: JoinSet<(String, Result<(), ExportError>)> = JoinSet::new();
        for (name, handler) in handlers {
            let name = name.clone();
            let handler = Arc::clone(handler);
            let batch = batch.clone();
            export_tasks.spawn(async move {
                let result = handler.export_boxed(batch).await;
                (name, result)
            });
        }

        let mut accepted = false;
        while let Some(result) = export_tasks.join_next().await {
            match result {
                Ok((_, Ok(()))) => accepted = true,
                Ok((name, Err(e))) => {
                    self.metrics.record_error();
                    warn!(handler = %name, error = %e, "handler export failed");
                }
                Err(e) => {
                    self.metrics.record_error();
                    warn!(error = %e, "handler task panicked");
                }
            }
        }
        if accepted {
            self.metrics.record_success(span_count);
        }
    }
}

/// Bounded, drop-oldest export queue with multi-handler fan-out.
pub struct SpanDispatcher {
    shared: Arc<Shared>,
    flush_tx: mpsc::UnboundedSender<oneshot::Sender<()>>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    dispatch_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for SpanDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpanDispatcher")
            .field("queued", &self.shared.queue.lock().len())
            .field("handlers", &self.shared.handlers.read().len())
            .field("metrics", &self.shared.metrics)
            .finish_non_exhaustive()
    }
}

impl SpanDispatcher {
    /// Starts the dispatcher and its background loop.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start(config: DispatcherConfig) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(BoundedList::new(config.queue_capacity)),
            closed: AtomicBool::new(false),
            handlers: RwLock::new(HashMap::new()),
            metrics: DispatchMetrics::default(),
            wake: Notify::new(),
            max_batch_size: config.max_batch_size,
        });

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let (flush_tx, mut flush_rx) = mpsc::unbounded_channel::<oneshot::Sender<()>>();

        let shared_clone = Arc::clone(&shared);
        let export_interval = config.export_interval;
        let dispatch_task = tokio::spawn(async move {
            // First cycle one full interval after start
            let mut interval = tokio::time::interval_at(
                tokio::time::Instant::now() + export_interval,
                export_interval,
            );
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        // Drain remaining spans once, then stop
                        shared_clone.run_cycle(true).await;
                        break;
                    }

                    Some(done) = flush_rx.recv() => {
                        shared_clone.run_cycle(false).await;
                        let _ = done.send(());
                    }

                    () = shared_clone.wake.notified() => {
                        shared_clone.run_cycle(false).await;
                    }

                    _ = interval.tick() => {
                        shared_clone.run_cycle(false).await;
                    }
                }
            }
            debug!("dispatch loop stopped");
        });

        Self {
            shared,
            flush_tx,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            dispatch_task: Mutex::new(Some(dispatch_task)),
        }
    }

    /// Queues an ended span for the next cycle. Never blocks on handlers.
    pub fn add_span(&self, span: Arc<SpanData>) {
        let queued = {
            let mut queue = self.shared.queue.lock();
            if self.shared.closed.load(Ordering::Acquire) {
                return;
            }
            let dropped_before = queue.dropped_count();
            queue.add(span);
            if queue.dropped_count() != dropped_before {
                self.shared
                    .metrics
                    .spans_dropped
                    .fetch_add(1, Ordering::Relaxed);
            }
            queue.len()
        };
        self.shared
            .metrics
            .spans_enqueued
            .fetch_add(1, Ordering::Relaxed);

        if queued >= self.shared.max_batch_size {
            self.shared.wake.notify_one();
        }
    }

    /// Adds a handler, replacing any handler registered under the same name.
    pub fn register_handler(&self, name: impl Into<String>, handler: Arc<dyn HandlerBoxed>) {
        let name = name.into();
        info!(handler = %name, "registered span handler");
        self.shared.handlers.write().insert(name, handler);
    }

    pub fn unregister_handler(&self, name: &str) {
        if self.shared.handlers.write().remove(name).is_some() {
            info!(handler = %name, "unregistered span handler");
        }
    }

    pub fn handler_names(&self) -> Vec<String> {
        self.shared.handlers.read().keys().cloned().collect()
    }

    pub fn metrics(&self) -> &DispatchMetrics {
        &self.shared.metrics
    }

    /// Runs one dispatch cycle now and waits for it. Returns at once after shutdown.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.flush_tx.send(done_tx).is_err() {
            return;
        }
        let _ = done_rx.await;
    }

    /// Delivers what is still queued, then stops the loop. Later spans are discarded.
    pub async fn shutdown(&self) {
        let shutdown_tx = self.shutdown_tx.lock().take();
        if let Some(tx) = shutdown_tx {
            let _ = tx.send(());
        }

        let task = self.dispatch_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "dispatch loop ended abnormally");
            }
            info!(
                spans_exported = self.shared.metrics.spans_exported(),
                spans_dropped = self.shared.metrics.spans_dropped(),
                "span dispatcher shut down"
            );
        }
    }
}

impl Drop for SpanDispatcher {
    fn drop(&mut self) {
        if let Some(task) = self.dispatch_task.lock().take() {
            task.abort();
        }
    }
}

impl StartEndHandler for SpanDispatcher {
    fn on_start(&self, _span: &Span) {}

    fn on_end(&self, data: &Arc<SpanData>) {
        if data.context.is_sampled() {
            self.add_span(Arc::clone(data));
        }
    }
}

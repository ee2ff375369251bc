//! # Tracing and Stats Demo
//!
//! Simulates a small RPC service instrumented with the SDK:
//!
//! - Concurrent worker tasks open a server span per request and a client span
//!   per downstream call, with attributes, annotations and message events
//! - About one request in ten fails and is sampled into the local span store
//! - Request latency and payload size are recorded against two views
//! - Ended spans go to a `LoggingHandler` and, with `--json <path>`, to a file
//!
//! ## Running
//!
//! ```bash
//! # Quick mode (2 workers, 20 requests each)
//! cargo run -p census_sdk --bin demo --release -- --quick
//!
//! # Full mode (8 workers, 200 requests each), spans also written as JSON
//! RUST_LOG=census_sdk=info cargo run -p census_sdk --bin demo --release -- --json spans.json
//! ```

use census_sdk::export::{
    DispatcherConfig, ErrorFilter, JsonFileHandler, LatencyFilter, LoggingHandler,
    SampledSpanStoreConfig,
};
use census_sdk::stats::{
    Aggregation, AggregationData, AggregationWindow, BucketBoundaries, Measure, TagContext,
    TagKey, View, ViewName,
};
use census_sdk::trace::{
    Annotation, EndSpanOptions, MessageEvent, MessageEventType, SpanKind, Status,
};
use census_sdk::Telemetry;
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::info;
use tracing_subscriber::EnvFilter;

const SPAN_NAME: &str = "Recv.users.Get";

struct DemoConfig {
    workers: usize,
    requests_per_worker: usize,
    json_path: Option<String>,
}

impl DemoConfig {
    fn from_args() -> Self {
        let args: Vec<String> = std::env::args().collect();
        let quick = args.iter().any(|a| a == "--quick");
        let json_path = args
            .iter()
            .position(|a| a == "--json")
            .and_then(|i| args.get(i + 1).cloned());

        Self {
            workers: if quick { 2 } else { 8 },
            requests_per_worker: if quick { 20 } else { 200 },
            json_path,
        }
    }
}

struct Instruments {
    method: TagKey,
    latency_ms: Measure,
    payload_bytes: Measure,
}

fn register_views(telemetry: &Telemetry) -> Instruments {
    let method = TagKey::new("method");
    let latency_ms = Measure::double("rpc/latency", "server-side request latency", "ms");
    let payload_bytes = Measure::long("rpc/payload", "response payload size", "By");

    let stats = telemetry.stats();
    let views = [
        View::new(
            ViewName::new("rpc/latency/distribution"),
            "latency distribution by method",
            latency_ms.clone(),
            Aggregation::Distribution(
                BucketBoundaries::new(vec![1.0, 2.0, 5.0, 10.0, 20.0, 50.0])
                    .expect("boundaries are sorted"),
            ),
            vec![method.clone()],
        ),
        View::new(
            ViewName::new("rpc/payload/sum"),
            "bytes sent by method",
            payload_bytes.clone(),
            Aggregation::Sum,
            vec![method.clone()],
        ),
        View::new(
            ViewName::new("rpc/latency/recent_mean"),
            "mean latency over the last minute",
            latency_ms.clone(),
            Aggregation::Mean,
            vec![],
        )
        .with_window(AggregationWindow::Interval(Duration::from_secs(60))),
    ];
    for view in views {
        if let Err(e) = stats.register_view(view) {
            tracing::warn!(error = %e, "view registration failed");
        }
    }

    Instruments {
        method,
        latency_ms,
        payload_bytes,
    }
}

async fn handle_request(
    telemetry: &Telemetry,
    instruments: &Instruments,
    worker: usize,
    seq: usize,
) {
    let tracer = telemetry.tracer();
    let started = Instant::now();

    let (latency_ms, payload, failed) = {
        let mut rng = rand::thread_rng();
        (
            rng.gen_range(0.5..40.0),
            rng.gen_range(64..8192_i64),
            rng.gen_bool(0.1),
        )
    };

    let server = tracer
        .span_builder(SPAN_NAME)
        .with_kind(SpanKind::Server)
        .start();
    server.put_attribute("worker", worker as i64);
    server.put_attribute("seq", seq as i64);
    server.add_message_event(
        MessageEvent::new(MessageEventType::Received, seq as u64).with_uncompressed_size(128),
    );

    let client = tracer
        .span_builder("Sent.db.Query")
        .with_parent(&server)
        .with_kind(SpanKind::Client)
        .start();
    client.add_annotation(Annotation::from_description("query issued"));
    tokio::time::sleep(Duration::from_micros((latency_ms * 100.0) as u64)).await;
    client.end();

    server.add_message_event(
        MessageEvent::new(MessageEventType::Sent, seq as u64)
            .with_uncompressed_size(payload as u64),
    );
    let status = if failed {
        server.add_annotation(Annotation::from_description("backend unavailable"));
        Status::UNAVAILABLE.with_description("backend unavailable")
    } else {
        Status::OK
    };
    server.end_with(
        EndSpanOptions::default()
            .with_status(status)
            .with_sample_to_local_span_store(true),
    );

    let tags = TagContext::new().with(instruments.method.clone(), "users.Get");
    telemetry
        .stats()
        .new_measure_map()
        .put_double(&instruments.latency_ms, latency_ms)
        .put_long(&instruments.payload_bytes, payload)
        .record(&tags);

    tracing::trace!(worker, seq, elapsed = ?started.elapsed(), "request done");
}

fn print_stats(telemetry: &Telemetry) {
    for view in telemetry.stats().registered_views() {
        let Some(data) = telemetry.stats().get_view(&view.name) else {
            continue;
        };
        println!("\nview {}", view.name.as_str());
        for (tags, aggregation) in &data.aggregation_map {
            match aggregation {
                AggregationData::Distribution(dist) => println!(
                    "  {:?}: count={} mean={:.2} min={:.2} max={:.2} buckets={:?}",
                    tags.0, dist.count, dist.mean, dist.min, dist.max, dist.bucket_counts
                ),
                other => println!("  {:?}: {:?}", tags.0, other),
            }
        }
    }
}

fn print_span_store(telemetry: &Telemetry) {
    let store = telemetry.sampled_span_store();
    let summary = store.summary();
    if let Some(per_name) = summary.per_span_name_summary.get(SPAN_NAME) {
        println!("\nsampled spans for {SPAN_NAME}");
        for (bucket, count) in &per_name.latency_bucket_summaries {
            println!("  latency {bucket:?}: {count}");
        }
        for (code, count) in &per_name.error_bucket_summaries {
            println!("  error {code:?}: {count}");
        }
    }

    let slow = store.latency_sampled_spans(&LatencyFilter {
        span_name: SPAN_NAME.to_string(),
        latency_lower: Duration::from_millis(1),
        latency_upper: Duration::ZERO,
        max_spans: 3,
    });
    if let Ok(slow) = slow {
        for span in slow {
            println!("  slow: {} took {:?}", span.context.span_id(), span.latency());
        }
    }

    let errors = store.error_sampled_spans(&ErrorFilter {
        span_name: SPAN_NAME.to_string(),
        code: None,
        max_spans: 3,
    });
    if let Ok(errors) = errors {
        for span in errors {
            println!("  failed: {} status={}", span.context.span_id(), span.status);
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let config = DemoConfig::from_args();

    let mut builder = Telemetry::builder()
        .with_dispatcher_config(DispatcherConfig {
            export_interval: Duration::from_millis(250),
            ..Default::default()
        })
        .with_in_process_sampled_span_store(SampledSpanStoreConfig::default())
        .with_handler("log", Arc::new(LoggingHandler::new()));
    if let Some(path) = &config.json_path {
        builder = builder.with_handler("json", Arc::new(JsonFileHandler::new(path.clone())));
    }
    let telemetry = Arc::new(builder.build());
    telemetry
        .sampled_span_store()
        .register_span_names_for_collection(&[SPAN_NAME]);
    let instruments = Arc::new(register_views(&telemetry));

    info!(
        workers = config.workers,
        requests = config.requests_per_worker,
        "starting demo"
    );
    let started = Instant::now();

    let mut workers = JoinSet::new();
    for worker in 0..config.workers {
        let telemetry = Arc::clone(&telemetry);
        let instruments = Arc::clone(&instruments);
        let requests = config.requests_per_worker;
        workers.spawn(async move {
            for seq in 0..requests {
                handle_request(&telemetry, &instruments, worker, seq).await;
            }
        });
    }
    while let Some(result) = workers.join_next().await {
        if let Err(e) = result {
            tracing::error!(error = %e, "worker failed");
        }
    }

    telemetry.shutdown().await;
    let elapsed = started.elapsed();

    let metrics = telemetry.dispatcher().metrics();
    println!(
        "\n{} requests in {:.2?}: enqueued={} exported={} dropped={} batches={} errors={}",
        config.workers * config.requests_per_worker,
        elapsed,
        metrics.spans_enqueued(),
        metrics.spans_exported(),
        metrics.spans_dropped(),
        metrics.batches_exported(),
        metrics.export_errors(),
    );

    print_stats(&telemetry);
    print_span_store(&telemetry);
}

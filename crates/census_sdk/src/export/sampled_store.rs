//! Local index of recently ended spans, for debugging pages.
//!
//! Each registered span name gets nine latency buckets and one bucket per error
//! code. A span with an error status lands in its error bucket only; an OK span
//! lands in exactly one latency bucket. Buckets keep the most recent samples and
//! evict the oldest.

use crate::bounded::BoundedList;
use crate::trace::events::CanonicalCode;
use crate::trace::span::SpanData;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Malformed sampled-span query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("latency lower bound {lower:?} is above upper bound {upper:?}")]
    InvalidLatencyRange { lower: Duration, upper: Duration },
    #[error("OK is not an error code")]
    OkStatusNotAnError,
}

/// Fixed latency ranges, each `[lower, upper)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LatencyBucket {
    ZeroTo10Micros,
    Micros10To100,
    Micros100To1Milli,
    Millis1To10,
    Millis10To100,
    Millis100To1Sec,
    Secs1To10,
    Secs10To100,
    Over100Secs,
}

impl LatencyBucket {
    pub const ALL: [LatencyBucket; 9] = [
        LatencyBucket::ZeroTo10Micros,
        LatencyBucket::Micros10To100,
        LatencyBucket::Micros100To1Milli,
        LatencyBucket::Millis1To10,
        LatencyBucket::Millis10To100,
        LatencyBucket::Millis100To1Sec,
        LatencyBucket::Secs1To10,
        LatencyBucket::Secs10To100,
        LatencyBucket::Over100Secs,
    ];

    pub fn lower(self) -> Duration {
        match self {
            LatencyBucket::ZeroTo10Micros => Duration::ZERO,
            LatencyBucket::Micros10To100 => Duration::from_micros(10),
            LatencyBucket::Micros100To1Milli => Duration::from_micros(100),
            LatencyBucket::Millis1To10 => Duration::from_millis(1),
            LatencyBucket::Millis10To100 => Duration::from_millis(10),
            LatencyBucket::Millis100To1Sec => Duration::from_millis(100),
            LatencyBucket::Secs1To10 => Duration::from_secs(1),
            LatencyBucket::Secs10To100 => Duration::from_secs(10),
            LatencyBucket::Over100Secs => Duration::from_secs(100),
        }
    }

    /// Exclusive upper bound; `None` for the last bucket.
    pub fn upper(self) -> Option<Duration> {
        match self {
            LatencyBucket::Over100Secs => None,
            bucket => Some(LatencyBucket::ALL[bucket.index() + 1].lower()),
        }
    }

    pub fn for_latency(latency: Duration) -> Self {
        let index = Self::ALL.partition_point(|bucket| bucket.lower() <= latency);
        // lower() of the first bucket is zero, so index >= 1
        Self::ALL[index.saturating_sub(1)]
    }

    fn index(self) -> usize {
        self as usize
    }
}

fn error_index(code: CanonicalCode) -> Option<usize> {
    CanonicalCode::ERRORS.iter().position(|c| *c == code)
}

/// Retained-sample counts for one span name.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PerSpanNameSummary {
    pub latency_bucket_summaries: BTreeMap<LatencyBucket, usize>,
    pub error_bucket_summaries: BTreeMap<CanonicalCode, usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SampledSpanStoreSummary {
    pub per_span_name_summary: HashMap<String, PerSpanNameSummary>,
}

/// Spans of `span_name` with `latency_lower <= latency < latency_upper`.
///
/// A zero `latency_upper` means no upper bound; a zero `max_spans` means no limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatencyFilter {
    pub span_name: String,
    pub latency_lower: Duration,
    pub latency_upper: Duration,
    pub max_spans: usize,
}

impl LatencyFilter {
    fn validate(&self) -> Result<(), QueryError> {
        if !self.latency_upper.is_zero() && self.latency_lower > self.latency_upper {
            return Err(QueryError::InvalidLatencyRange {
                lower: self.latency_lower,
                upper: self.latency_upper,
            });
        }
        Ok(())
    }

    fn matches(&self, latency: Duration) -> bool {
        latency >= self.latency_lower
            && (self.latency_upper.is_zero() || latency < self.latency_upper)
    }
}

/// Error spans of `span_name`, for one code or every code (`None`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorFilter {
    pub span_name: String,
    pub code: Option<CanonicalCode>,
    pub max_spans: usize,
}

impl ErrorFilter {
    fn validate(&self) -> Result<(), QueryError> {
        if self.code == Some(CanonicalCode::Ok) {
            return Err(QueryError::OkStatusNotAnError);
        }
        Ok(())
    }
}

/// Sampled span store. See the module docs.
pub trait SampledSpanStore: Send + Sync {
    /// Starts collecting the given names. Already registered names are kept as they are.
    fn register_span_names_for_collection(&self, span_names: &[&str]);

    /// Stops collecting the given names and drops their samples.
    fn unregister_span_names_for_collection(&self, span_names: &[&str]);

    fn registered_span_names_for_collection(&self) -> HashSet<String>;

    /// Files `span` under its name, if registered.
    fn consider_for_sampling(&self, span: &Arc<SpanData>);

    fn summary(&self) -> SampledSpanStoreSummary;

    /// Most recently ended first.
    fn latency_sampled_spans(&self, filter: &LatencyFilter)
        -> Result<Vec<Arc<SpanData>>, QueryError>;

    /// Most recently ended first.
    fn error_sampled_spans(&self, filter: &ErrorFilter) -> Result<Vec<Arc<SpanData>>, QueryError>;
}

/// Samples retained per bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampledSpanStoreConfig {
    pub samples_per_latency_bucket: usize,
    pub samples_per_error_bucket: usize,
}

impl Default for SampledSpanStoreConfig {
    fn default() -> Self {
        Self {
            samples_per_latency_bucket: 10,
            samples_per_error_bucket: 5,
        }
    }
}

struct PerSpanNameSamples {
    latency_buckets: Vec<BoundedList<Arc<SpanData>>>,
    error_buckets: Vec<BoundedList<Arc<SpanData>>>,
}

impl PerSpanNameSamples {
    fn new(config: &SampledSpanStoreConfig) -> Self {
        Self {
            latency_buckets: LatencyBucket::ALL
                .iter()
                .map(|_| BoundedList::new(config.samples_per_latency_bucket))
                .collect(),
            error_buckets: CanonicalCode::ERRORS
                .iter()
                .map(|_| BoundedList::new(config.samples_per_error_bucket))
                .collect(),
        }
    }

    fn add(&mut self, span: &Arc<SpanData>) {
        // Errors first, so an error span is never also counted by latency
        if let Some(index) = error_index(span.status.code) {
            self.error_buckets[index].add(Arc::clone(span));
            return;
        }
        let bucket = LatencyBucket::for_latency(span.latency());
        self.latency_buckets[bucket.index()].add(Arc::clone(span));
    }

    fn summary(&self) -> PerSpanNameSummary {
        PerSpanNameSummary {
            latency_bucket_summaries: LatencyBucket::ALL
                .iter()
                .map(|bucket| (*bucket, self.latency_buckets[bucket.index()].len()))
                .collect(),
            error_bucket_summaries: CanonicalCode::ERRORS
                .iter()
                .zip(&self.error_buckets)
                .map(|(code, bucket)| (*code, bucket.len()))
                .collect(),
        }
    }
}

fn most_recent_first(mut spans: Vec<Arc<SpanData>>, max_spans: usize) -> Vec<Arc<SpanData>> {
    spans.sort_by(|a, b| b.end_timestamp.cmp(&a.end_timestamp));
    if max_spans > 0 {
        spans.truncate(max_spans);
    }
    spans
}

/// Store kept in process memory.
#[derive(Default)]
pub struct InProcessSampledSpanStore {
    config: SampledSpanStoreConfig,
    samples: Mutex<HashMap<String, PerSpanNameSamples>>,
}

impl std::fmt::Debug for InProcessSampledSpanStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcessSampledSpanStore")
            .field("config", &self.config)
            .field("registered", &self.samples.lock().len())
            .finish()
    }
}

impl InProcessSampledSpanStore {
    pub fn new(config: SampledSpanStoreConfig) -> Self {
        Self {
            config,
            samples: Mutex::new(HashMap::new()),
        }
    }
}

impl SampledSpanStore for InProcessSampledSpanStore {
    fn register_span_names_for_collection(&self, span_names: &[&str]) {
        let mut samples = self.samples.lock();
        for name in span_names {
            samples
                .entry((*name).to_string())
                .or_insert_with(|| PerSpanNameSamples::new(&self.config));
        }
    }

    fn unregister_span_names_for_collection(&self, span_names: &[&str]) {
        let mut samples = self.samples.lock();
        for name in span_names {
            samples.remove(*name);
        }
    }

    fn registered_span_names_for_collection(&self) -> HashSet<String> {
        self.samples.lock().keys().cloned().collect()
    }

    fn consider_for_sampling(&self, span: &Arc<SpanData>) {
        if let Some(per_name) = self.samples.lock().get_mut(&span.name) {
            per_name.add(span);
        }
    }

    fn summary(&self) -> SampledSpanStoreSummary {
        SampledSpanStoreSummary {
            per_span_name_summary: self
                .samples
                .lock()
                .iter()
                .map(|(name, per_name)| (name.clone(), per_name.summary()))
                .collect(),
        }
    }

    fn latency_sampled_spans(
        &self,
        filter: &LatencyFilter,
    ) -> Result<Vec<Arc<SpanData>>, QueryError> {
        filter.validate()?;
        let samples = self.samples.lock();
        let Some(per_name) = samples.get(&filter.span_name) else {
            return Ok(Vec::new());
        };

        let spans = per_name
            .latency_buckets
            .iter()
            .flat_map(|bucket| bucket.iter().rev())
            .filter(|span| filter.matches(span.latency()))
            .cloned()
            .collect();
        Ok(most_recent_first(spans, filter.max_spans))
    }

    fn error_sampled_spans(&self, filter: &ErrorFilter) -> Result<Vec<Arc<SpanData>>, QueryError> {
        filter.validate()?;
        let samples = self.samples.lock();
        let Some(per_name) = samples.get(&filter.span_name) else {
            return Ok(Vec::new());
        };

        let spans = match filter.code.and_then(error_index) {
            Some(index) => per_name.error_buckets[index].iter().rev().cloned().collect(),
            None => per_name
                .error_buckets
                .iter()
                .flat_map(|bucket| bucket.iter().rev())
                .cloned()
                .collect(),
        };
        Ok(most_recent_first(spans, filter.max_spans))
    }
}

/// Store that tracks registered names but keeps no samples.
///
/// The summary lists each registered name with empty bucket maps. Queries always
/// return nothing, after validating their filters.
#[derive(Debug, Default)]
pub struct NoopSampledSpanStore {
    registered_span_names: Mutex<HashSet<String>>,
}

impl NoopSampledSpanStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SampledSpanStore for NoopSampledSpanStore {
    fn register_span_names_for_collection(&self, span_names: &[&str]) {
        let mut registered = self.registered_span_names.lock();
        for name in span_names {
            registered.insert((*name).to_string());
        }
    }

    fn unregister_span_names_for_collection(&self, span_names: &[&str]) {
        let mut registered = self.registered_span_names.lock();
        for name in span_names {
            registered.remove(*name);
        }
    }

    fn registered_span_names_for_collection(&self) -> HashSet<String> {
        self.registered_span_names.lock().clone()
    }

    fn consider_for_sampling(&self, _span: &Arc<SpanData>) {}

    fn summary(&self) -> SampledSpanStoreSummary {
        SampledSpanStoreSummary {
            per_span_name_summary: self
                .registered_span_names
                .lock()
                .iter()
                .map(|name| (name.clone(), PerSpanNameSummary::default()))
                .collect(),
        }
    }

    fn latency_sampled_spans(
        &self,
        filter: &LatencyFilter,
    ) -> Result<Vec<Arc<SpanData>>, QueryError> {
        filter.validate()?;
        Ok(Vec::new())
    }

    fn error_sampled_spans(&self, filter: &ErrorFilter) -> Result<Vec<Arc<SpanData>>, QueryError> {
        filter.validate()?;
        Ok(Vec::new())
    }
}

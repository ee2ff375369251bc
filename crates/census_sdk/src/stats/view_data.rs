//! Per-view storage of mutable aggregations.
//!
//! Cumulative views keep one map for their whole lifetime. Interval views split
//! their window into [`INTERVAL_SUB_BUCKETS`] equal slices, roll expired slices
//! off as time advances, and merge the live slices when frozen.

use crate::clock::Timestamp;
use crate::stats::aggregation::{AggregationData, MutableAggregation};
use crate::stats::manager::StatsCollectionState;
use crate::stats::view::{AggregationWindow, TagContext, TagValues, View};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// Number of slices an interval window is split into.
pub const INTERVAL_SUB_BUCKETS: usize = 4;

/// Frozen aggregations of one view over `[start, end]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewData {
    pub view: View,
    pub start: Timestamp,
    pub end: Timestamp,
    pub aggregation_map: HashMap<TagValues, AggregationData>,
}

impl ViewData {
    /// Empty data stamped at the epoch, meaning "nothing collected".
    fn disabled(view: &View) -> Self {
        Self {
            view: view.clone(),
            start: Timestamp::ZERO,
            end: Timestamp::ZERO,
            aggregation_map: HashMap::new(),
        }
    }
}

/// Mutable storage for one registered view.
#[derive(Debug)]
pub enum MutableViewData {
    Cumulative(CumulativeViewData),
    Interval(IntervalViewData),
}

impl MutableViewData {
    /// Creates storage matching the view's window, starting at `start`.
    pub fn new(view: View, start: Timestamp) -> Self {
        match view.window {
            AggregationWindow::Cumulative => {
                MutableViewData::Cumulative(CumulativeViewData::new(view, start))
            }
            AggregationWindow::Interval(window) => {
                MutableViewData::Interval(IntervalViewData::new(view, window, start))
            }
        }
    }

    pub fn view(&self) -> &View {
        match self {
            MutableViewData::Cumulative(data) => &data.view,
            MutableViewData::Interval(data) => &data.view,
        }
    }

    pub fn record(&self, context: &TagContext, value: f64, now: Timestamp) {
        match self {
            MutableViewData::Cumulative(data) => data.record(context, value),
            MutableViewData::Interval(data) => data.record(context, value, now),
        }
    }

    pub fn to_view_data(&self, now: Timestamp, state: StatsCollectionState) -> ViewData {
        match self {
            MutableViewData::Cumulative(data) => data.to_view_data(now, state),
            MutableViewData::Interval(data) => data.to_view_data(now, state),
        }
    }

    pub fn clear_stats(&self) {
        match self {
            MutableViewData::Cumulative(data) => data.clear_stats(),
            MutableViewData::Interval(data) => data.clear_stats(),
        }
    }

    pub fn resume_stats_collection(&self, now: Timestamp) {
        match self {
            MutableViewData::Cumulative(data) => data.resume_stats_collection(now),
            MutableViewData::Interval(data) => data.resume_stats_collection(now),
        }
    }
}

fn freeze(
    view: &View,
    map: &HashMap<TagValues, MutableAggregation>,
) -> HashMap<TagValues, AggregationData> {
    let kind = view.measure.kind();
    map.iter()
        .map(|(tags, agg)| (tags.clone(), agg.to_aggregation_data(kind)))
        .collect()
}

/// Aggregates everything since registration or the last resume.
#[derive(Debug)]
pub struct CumulativeViewData {
    view: View,
    start: Mutex<Timestamp>,
    aggregations: DashMap<TagValues, MutableAggregation>,
}

impl CumulativeViewData {
    pub fn new(view: View, start: Timestamp) -> Self {
        Self {
            view,
            start: Mutex::new(start),
            aggregations: DashMap::new(),
        }
    }

    pub fn record(&self, context: &TagContext, value: f64) {
        let tags = TagValues::from_context(context, &self.view.columns);
        // Entry holds the shard lock, so two racing first recordings share one aggregation
        self.aggregations
            .entry(tags)
            .or_insert_with(|| MutableAggregation::new(&self.view.aggregation))
            .add(value);
    }

    pub fn to_view_data(&self, now: Timestamp, state: StatsCollectionState) -> ViewData {
        if state == StatsCollectionState::Disabled {
            return ViewData::disabled(&self.view);
        }

        let kind = self.view.measure.kind();
        let aggregation_map = self
            .aggregations
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().to_aggregation_data(kind)))
            .collect();
        ViewData {
            view: self.view.clone(),
            start: *self.start.lock(),
            end: now,
            aggregation_map,
        }
    }

    pub fn clear_stats(&self) {
        self.aggregations.clear();
    }

    /// Moves the window start; accumulated values are kept.
    pub fn resume_stats_collection(&self, now: Timestamp) {
        *self.start.lock() = now;
    }
}

#[derive(Debug)]
struct SubBucket {
    start: Timestamp,
    aggregations: HashMap<TagValues, MutableAggregation>,
}

impl SubBucket {
    fn new(start: Timestamp) -> Self {
        Self {
            start,
            aggregations: HashMap::new(),
        }
    }
}

/// Aggregates a rolling window, at a resolution of one sub-bucket.
#[derive(Debug)]
pub struct IntervalViewData {
    view: View,
    window: Duration,
    sub_bucket_nanos: u64,
    buckets: Mutex<VecDeque<SubBucket>>,
}

impl IntervalViewData {
    pub fn new(view: View, window: Duration, start: Timestamp) -> Self {
        let sub_bucket_nanos = (window.as_nanos() as u64 / INTERVAL_SUB_BUCKETS as u64).max(1);
        let mut buckets = VecDeque::with_capacity(INTERVAL_SUB_BUCKETS);
        buckets.push_back(SubBucket::new(start));
        Self {
            view,
            window,
            sub_bucket_nanos,
            buckets: Mutex::new(buckets),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Opens new sub-buckets up to `now` and drops the ones that fell out of the window.
    fn refresh(&self, buckets: &mut VecDeque<SubBucket>, now: Timestamp) {
        let current_start = match buckets.back() {
            Some(bucket) => bucket.start,
            None => {
                buckets.push_back(SubBucket::new(now));
                return;
            }
        };

        let elapsed = now.as_nanos().saturating_sub(current_start.as_nanos());
        let steps = elapsed / self.sub_bucket_nanos;
        if steps == 0 {
            return;
        }

        if steps >= INTERVAL_SUB_BUCKETS as u64 {
            // Idle for a whole window: nothing retained is still live
            buckets.clear();
            buckets.push_back(SubBucket::new(
                current_start.add_nanos(steps * self.sub_bucket_nanos),
            ));
            return;
        }

        for step in 1..=steps {
            buckets.push_back(SubBucket::new(
                current_start.add_nanos(step * self.sub_bucket_nanos),
            ));
        }
        while buckets.len() > INTERVAL_SUB_BUCKETS {
            buckets.pop_front();
        }
    }

    pub fn record(&self, context: &TagContext, value: f64, now: Timestamp) {
        let tags = TagValues::from_context(context, &self.view.columns);
        let mut buckets = self.buckets.lock();
        self.refresh(&mut buckets, now);
        if let Some(current) = buckets.back_mut() {
            current
                .aggregations
                .entry(tags)
                .or_insert_with(|| MutableAggregation::new(&self.view.aggregation))
                .add(value);
        }
    }

    pub fn to_view_data(&self, now: Timestamp, state: StatsCollectionState) -> ViewData {
        if state == StatsCollectionState::Disabled {
            return ViewData::disabled(&self.view);
        }

        let mut buckets = self.buckets.lock();
        self.refresh(&mut buckets, now);

        let mut combined: HashMap<TagValues, MutableAggregation> = HashMap::new();
        for bucket in buckets.iter() {
            for (tags, agg) in &bucket.aggregations {
                combined
                    .entry(tags.clone())
                    .or_insert_with(|| MutableAggregation::new(&self.view.aggregation))
                    .combine(agg);
            }
        }
        drop(buckets);

        ViewData {
            view: self.view.clone(),
            start: now.sub_duration(self.window),
            end: now,
            aggregation_map: freeze(&self.view, &combined),
        }
    }

    pub fn clear_stats(&self) {
        for bucket in self.buckets.lock().iter_mut() {
            bucket.aggregations.clear();
        }
    }

    /// Restarts the window at `now`, discarding the old slices.
    pub fn resume_stats_collection(&self, now: Timestamp) {
        let mut buckets = self.buckets.lock();
        buckets.clear();
        buckets.push_back(SubBucket::new(now));
    }
}

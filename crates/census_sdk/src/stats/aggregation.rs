//! Running statistics.
//!
//! [`MutableAggregation`] is the per-tag-combination accumulator a view keeps;
//! [`AggregationData`] is its frozen form. Every consumer matches exhaustively on
//! the variant, so adding an aggregation kind is a compile error everywhere it
//! needs handling.

use crate::invariants::debug_assert_bucket_total;
use crate::stats::measure::MeasureKind;
use crate::stats::view::ViewError;
use serde::{Deserialize, Serialize};

/// Histogram bucket boundaries: finite and strictly increasing.
///
/// `n` boundaries produce `n + 1` buckets. Bucket 0 is `(-inf, b[0])`, bucket `i`
/// is `[b[i-1], b[i])`, and the last is `[b[n-1], +inf)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketBoundaries(Vec<f64>);

impl BucketBoundaries {
    pub fn new(boundaries: Vec<f64>) -> Result<Self, ViewError> {
        if let Some(bad) = boundaries.iter().find(|b| !b.is_finite()) {
            return Err(ViewError::InvalidBucketBoundaries(format!(
                "boundary {bad} is not finite"
            )));
        }
        if let Some(pair) = boundaries.windows(2).find(|w| w[0] >= w[1]) {
            return Err(ViewError::InvalidBucketBoundaries(format!(
                "boundaries must be strictly increasing, found {} then {}",
                pair[0], pair[1]
            )));
        }
        Ok(Self(boundaries))
    }

    pub fn boundaries(&self) -> &[f64] {
        &self.0
    }

    /// Index of the bucket `value` falls into. Values on a boundary go up.
    pub fn bucket_index(&self, value: f64) -> usize {
        self.0.partition_point(|b| *b <= value)
    }

    pub fn bucket_count(&self) -> usize {
        self.0.len() + 1
    }
}

/// Aggregation a view applies to its measure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Aggregation {
    Sum,
    Count,
    Mean,
    Distribution(BucketBoundaries),
    LastValue,
}

/// Running histogram with Welford moments.
#[derive(Debug, Clone, PartialEq)]
pub struct MutableDistribution {
    boundaries: BucketBoundaries,
    bucket_counts: Vec<u64>,
    count: u64,
    mean: f64,
    sum_of_squared_deviation: f64,
    min: f64,
    max: f64,
}

impl MutableDistribution {
    fn new(boundaries: BucketBoundaries) -> Self {
        Self {
            bucket_counts: vec![0; boundaries.bucket_count()],
            boundaries,
            count: 0,
            mean: 0.0,
            sum_of_squared_deviation: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    fn add(&mut self, value: f64) {
        self.bucket_counts[self.boundaries.bucket_index(value)] += 1;

        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.sum_of_squared_deviation += delta * (value - self.mean);
        self.min = self.min.min(value);
        self.max = self.max.max(value);

        debug_assert_bucket_total!(self.bucket_counts, self.count);
    }

    fn combine(&mut self, other: &Self) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = other.clone();
            return;
        }

        // Chan et al. parallel merge of the moments
        let n_a = self.count as f64;
        let n_b = other.count as f64;
        let n = n_a + n_b;
        let delta = other.mean - self.mean;
        self.mean += delta * n_b / n;
        self.sum_of_squared_deviation +=
            other.sum_of_squared_deviation + delta * delta * n_a * n_b / n;
        self.count += other.count;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        for (mine, theirs) in self.bucket_counts.iter_mut().zip(&other.bucket_counts) {
            *mine += theirs;
        }

        debug_assert_bucket_total!(self.bucket_counts, self.count);
    }

    fn snapshot(&self) -> DistributionData {
        let (min, max) = if self.count == 0 {
            (0.0, 0.0)
        } else {
            (self.min, self.max)
        };
        DistributionData {
            count: self.count,
            mean: self.mean,
            sum_of_squared_deviation: self.sum_of_squared_deviation,
            min,
            max,
            bucket_counts: self.bucket_counts.clone(),
        }
    }
}

/// Accumulator for one tag combination of one view.
#[derive(Debug, Clone, PartialEq)]
pub enum MutableAggregation {
    Sum { sum: f64 },
    Count { count: u64 },
    Mean { mean: f64, count: u64 },
    Distribution(MutableDistribution),
    LastValue { value: Option<f64> },
}

impl MutableAggregation {
    pub fn new(aggregation: &Aggregation) -> Self {
        match aggregation {
            Aggregation::Sum => MutableAggregation::Sum { sum: 0.0 },
            Aggregation::Count => MutableAggregation::Count { count: 0 },
            Aggregation::Mean => MutableAggregation::Mean {
                mean: 0.0,
                count: 0,
            },
            Aggregation::Distribution(boundaries) => {
                MutableAggregation::Distribution(MutableDistribution::new(boundaries.clone()))
            }
            Aggregation::LastValue => MutableAggregation::LastValue { value: None },
        }
    }

    pub fn add(&mut self, value: f64) {
        match self {
            MutableAggregation::Sum { sum } => *sum += value,
            MutableAggregation::Count { count } => *count += 1,
            MutableAggregation::Mean { mean, count } => {
                *count += 1;
                *mean += (value - *mean) / *count as f64;
            }
            MutableAggregation::Distribution(dist) => dist.add(value),
            MutableAggregation::LastValue { value: last } => *last = Some(value),
        }
    }

    /// Folds `other` into `self`. `other` is treated as the more recent of the two.
    ///
    /// Aggregations of different kinds are left untouched.
    pub fn combine(&mut self, other: &MutableAggregation) {
        match (self, other) {
            (MutableAggregation::Sum { sum }, MutableAggregation::Sum { sum: theirs }) => {
                *sum += theirs;
            }
            (MutableAggregation::Count { count }, MutableAggregation::Count { count: theirs }) => {
                *count += theirs;
            }
            (
                MutableAggregation::Mean { mean, count },
                MutableAggregation::Mean {
                    mean: their_mean,
                    count: their_count,
                },
            ) => {
                let total = *count + their_count;
                if total > 0 {
                    *mean = (*mean * *count as f64 + their_mean * *their_count as f64)
                        / total as f64;
                }
                *count = total;
            }
            (MutableAggregation::Distribution(mine), MutableAggregation::Distribution(theirs)) => {
                mine.combine(theirs);
            }
            (
                MutableAggregation::LastValue { value },
                MutableAggregation::LastValue { value: theirs },
            ) => {
                if theirs.is_some() {
                    *value = *theirs;
                }
            }
            _ => {}
        }
    }

    /// Freezes the current state. Sums and last values of long measures are truncated to
    /// integers.
    pub fn to_aggregation_data(&self, kind: MeasureKind) -> AggregationData {
        match (self, kind) {
            (MutableAggregation::Sum { sum }, MeasureKind::Double) => {
                AggregationData::SumDouble(*sum)
            }
            (MutableAggregation::Sum { sum }, MeasureKind::Long) => {
                AggregationData::SumLong(sum.round() as i64)
            }
            (MutableAggregation::Count { count }, _) => AggregationData::Count(*count),
            (MutableAggregation::Mean { mean, count }, _) => AggregationData::Mean {
                mean: *mean,
                count: *count,
            },
            (MutableAggregation::Distribution(dist), _) => {
                AggregationData::Distribution(dist.snapshot())
            }
            (MutableAggregation::LastValue { value }, MeasureKind::Double) => {
                AggregationData::LastValueDouble(value.unwrap_or_default())
            }
            (MutableAggregation::LastValue { value }, MeasureKind::Long) => {
                AggregationData::LastValueLong(value.unwrap_or_default().round() as i64)
            }
        }
    }
}

/// Frozen histogram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionData {
    pub count: u64,
    pub mean: f64,
    pub sum_of_squared_deviation: f64,
    /// Zero when `count` is zero
    pub min: f64,
    /// Zero when `count` is zero
    pub max: f64,
    pub bucket_counts: Vec<u64>,
}

/// Frozen aggregation value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AggregationData {
    SumDouble(f64),
    SumLong(i64),
    Count(u64),
    Mean { mean: f64, count: u64 },
    Distribution(DistributionData),
    LastValueDouble(f64),
    LastValueLong(i64),
}

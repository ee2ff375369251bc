//! Measurement recording and aggregation into views.

pub mod aggregation;
pub mod manager;
pub mod measure;
pub mod view;
pub mod view_data;

pub use aggregation::{
    Aggregation, AggregationData, BucketBoundaries, DistributionData, MutableAggregation,
};
pub use manager::{MeasureMap, StatsCollectionState, StatsManager};
pub use measure::{Measure, MeasureKind};
pub use view::{
    AggregationWindow, TagContext, TagKey, TagValue, TagValues, View, ViewError, ViewName,
};
pub use view_data::{MutableViewData, ViewData};

use crate::stats::aggregation::Aggregation;
use crate::stats::measure::Measure;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Rejected view configuration. The registry is left as it was.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ViewError {
    /// A different view is already registered under this name
    #[error("a different view is already registered under name {0}")]
    ViewConflict(String),
    /// A different measure is already registered under this name
    #[error("a different measure is already registered under name {0}")]
    MeasureConflict(String),
    /// Bucket boundaries must be finite and strictly increasing
    #[error("invalid bucket boundaries: {0}")]
    InvalidBucketBoundaries(String),
}

/// Dimension name used to break down recorded values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TagKey(String);

impl TagKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TagValue(String);

impl TagValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TagValue {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Tags attached to a measurement at record time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagContext {
    tags: HashMap<TagKey, TagValue>,
}

impl TagContext {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, key: TagKey, value: impl Into<TagValue>) -> Self {
        self.tags.insert(key, value.into());
        self
    }

    pub fn get(&self, key: &TagKey) -> Option<&TagValue> {
        self.tags.get(key)
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

/// Tag values lined up with a view's columns. A missing tag is `None` in its slot.
///
/// Equality and hashing are positional, so `[None, Some(a)]` and `[Some(a), None]`
/// are different combinations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TagValues(pub Vec<Option<TagValue>>);

impl TagValues {
    /// Picks the value of each column out of `context`.
    pub fn from_context(context: &TagContext, columns: &[TagKey]) -> Self {
        Self(columns.iter().map(|key| context.get(key).cloned()).collect())
    }

    pub fn values(&self) -> &[Option<TagValue>] {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ViewName(String);

impl ViewName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ViewName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Time span a view aggregates over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregationWindow {
    /// Everything since registration, or since collection was last resumed
    Cumulative,
    /// Rolling window of the given length
    Interval(Duration),
}

/// What to aggregate, how, and broken down by which tags.
#[derive(Debug, Clone, PartialEq)]
pub struct View {
    pub name: ViewName,
    pub description: String,
    pub measure: Measure,
    pub aggregation: Aggregation,
    pub columns: Vec<TagKey>,
    pub window: AggregationWindow,
}

impl View {
    /// Cumulative view. Use [`View::with_window`] for interval views.
    pub fn new(
        name: ViewName,
        description: impl Into<String>,
        measure: Measure,
        aggregation: Aggregation,
        columns: Vec<TagKey>,
    ) -> Self {
        Self {
            name,
            description: description.into(),
            measure,
            aggregation,
            columns,
            window: AggregationWindow::Cumulative,
        }
    }

    #[must_use]
    pub fn with_window(mut self, window: AggregationWindow) -> Self {
        self.window = window;
        self
    }
}

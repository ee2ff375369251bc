//! View registry and measurement recording.

use crate::clock::Clock;
use crate::stats::measure::Measure;
use crate::stats::view::{TagContext, View, ViewError, ViewName};
use crate::stats::view_data::{MutableViewData, ViewData};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Whether frozen view data is handed out.
///
/// Recording keeps going while disabled; only reads are suppressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatsCollectionState {
    Enabled,
    Disabled,
}

#[derive(Default)]
struct Registry {
    views: HashMap<ViewName, Arc<MutableViewData>>,
    measures: HashMap<String, Measure>,
    views_by_measure: HashMap<String, Vec<Arc<MutableViewData>>>,
}

/// Owns every registered view and routes measurements into them.
pub struct StatsManager {
    clock: Arc<dyn Clock>,
    enabled: AtomicBool,
    registry: RwLock<Registry>,
}

impl std::fmt::Debug for StatsManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatsManager")
            .field("state", &self.state())
            .field("views", &self.registry.read().views.len())
            .finish_non_exhaustive()
    }
}

impl StatsManager {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            enabled: AtomicBool::new(true),
            registry: RwLock::new(Registry::default()),
        }
    }

    /// Registers `view`.
    ///
    /// Registering the same view twice is a no-op. A different view under a taken
    /// name, or a measure whose name is taken by a different measure, is rejected.
    pub fn register_view(&self, view: View) -> Result<(), ViewError> {
        let mut registry = self.registry.write();

        if let Some(existing) = registry.views.get(&view.name) {
            if *existing.view() == view {
                return Ok(());
            }
            return Err(ViewError::ViewConflict(view.name.to_string()));
        }

        let measure_name = view.measure.name().to_string();
        if let Some(existing) = registry.measures.get(&measure_name) {
            if *existing != view.measure {
                return Err(ViewError::MeasureConflict(measure_name));
            }
        }

        info!(view = %view.name, measure = %measure_name, "registered view");
        registry
            .measures
            .entry(measure_name.clone())
            .or_insert_with(|| view.measure.clone());
        let name = view.name.clone();
        let data = Arc::new(MutableViewData::new(view, self.clock.now()));
        registry.views.insert(name, Arc::clone(&data));
        registry
            .views_by_measure
            .entry(measure_name)
            .or_default()
            .push(data);
        Ok(())
    }

    /// Frozen data of a registered view, `None` if no such view.
    pub fn get_view(&self, name: &ViewName) -> Option<ViewData> {
        let data = self.registry.read().views.get(name).cloned()?;
        Some(data.to_view_data(self.clock.now(), self.state()))
    }

    pub fn registered_views(&self) -> Vec<View> {
        self.registry
            .read()
            .views
            .values()
            .map(|data| data.view().clone())
            .collect()
    }

    pub fn new_measure_map(&self) -> MeasureMap<'_> {
        MeasureMap {
            manager: self,
            measurements: Vec::new(),
        }
    }

    pub fn state(&self) -> StatsCollectionState {
        if self.enabled.load(Ordering::Acquire) {
            StatsCollectionState::Enabled
        } else {
            StatsCollectionState::Disabled
        }
    }

    /// Switches collection on or off. Turning it back on restarts every view's window.
    pub fn set_state(&self, state: StatsCollectionState) {
        let enable = state == StatsCollectionState::Enabled;
        let was_enabled = self.enabled.swap(enable, Ordering::AcqRel);
        if was_enabled == enable {
            return;
        }

        debug!(?state, "stats collection state changed");
        if enable {
            let now = self.clock.now();
            for data in self.registry.read().views.values() {
                data.resume_stats_collection(now);
            }
        }
    }

    /// Empties every view.
    pub fn clear_stats(&self) {
        for data in self.registry.read().views.values() {
            data.clear_stats();
        }
    }

    fn record(&self, measurements: &[(Measure, f64)], context: &TagContext) {
        let now = self.clock.now();
        let registry = self.registry.read();
        for (measure, value) in measurements {
            match registry.measures.get(measure.name()) {
                Some(registered) if registered == measure => {}
                Some(_) => {
                    debug!(measure = measure.name(), "measure does not match registration, ignored");
                    continue;
                }
                None => continue,
            }
            if let Some(views) = registry.views_by_measure.get(measure.name()) {
                for data in views {
                    data.record(context, *value, now);
                }
            }
        }
    }
}

/// A batch of measurements recorded together under one tag context.
#[must_use = "measurements are only recorded by calling record()"]
pub struct MeasureMap<'a> {
    manager: &'a StatsManager,
    measurements: Vec<(Measure, f64)>,
}

impl MeasureMap<'_> {
    pub fn put_double(mut self, measure: &Measure, value: f64) -> Self {
        self.measurements.push((measure.clone(), value));
        self
    }

    pub fn put_long(mut self, measure: &Measure, value: i64) -> Self {
        self.measurements.push((measure.clone(), value as f64));
        self
    }

    pub fn record(self, context: &TagContext) {
        self.manager.record(&self.measurements, context);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{TestClock, Timestamp};
    use crate::stats::aggregation::{Aggregation, AggregationData, BucketBoundaries};
    use crate::stats::view::{AggregationWindow, TagKey, TagValue, TagValues};
    use std::time::Duration;

    fn setup() -> (StatsManager, Arc<TestClock>) {
        let clock = Arc::new(TestClock::new(Timestamp::from_secs(1)));
        (StatsManager::new(clock.clone()), clock)
    }

    fn latency() -> Measure {
        Measure::double("latency", "request latency", "ms")
    }

    fn method() -> TagKey {
        TagKey::new("method")
    }

    fn latency_view(aggregation: Aggregation) -> View {
        View::new(
            ViewName::new("latency/sum"),
            "",
            latency(),
            aggregation,
            vec![method()],
        )
    }

    fn get() -> TagValues {
        TagValues(vec![Some(TagValue::from("GET"))])
    }

    #[test]
    fn test_register_same_view_twice_is_noop() {
        let (stats, _) = setup();
        stats.register_view(latency_view(Aggregation::Sum)).unwrap();
        stats.register_view(latency_view(Aggregation::Sum)).unwrap();
        assert_eq!(stats.registered_views().len(), 1);
    }

    #[test]
    fn test_conflicting_view_rejected() {
        let (stats, _) = setup();
        stats.register_view(latency_view(Aggregation::Sum)).unwrap();

        let err = stats.register_view(latency_view(Aggregation::Count)).unwrap_err();
        assert_eq!(err, ViewError::ViewConflict("latency/sum".to_string()));
        assert_eq!(stats.registered_views()[0].aggregation, Aggregation::Sum);
    }

    #[test]
    fn test_conflicting_measure_rejected() {
        let (stats, _) = setup();
        stats.register_view(latency_view(Aggregation::Sum)).unwrap();

        let other = View::new(
            ViewName::new("latency/other"),
            "",
            Measure::long("latency", "different", "ms"),
            Aggregation::Sum,
            vec![],
        );
        assert_eq!(
            stats.register_view(other),
            Err(ViewError::MeasureConflict("latency".to_string()))
        );
        assert!(stats.get_view(&ViewName::new("latency/other")).is_none());
    }

    #[test]
    fn test_record_into_every_view_of_measure() {
        let (stats, clock) = setup();
        stats.register_view(latency_view(Aggregation::Sum)).unwrap();
        let dist = View::new(
            ViewName::new("latency/dist"),
            "",
            latency(),
            Aggregation::Distribution(BucketBoundaries::new(vec![10.0]).unwrap()),
            vec![method()],
        );
        stats.register_view(dist).unwrap();

        let tags = TagContext::new().with(method(), "GET");
        stats.new_measure_map().put_double(&latency(), 5.0).record(&tags);
        stats.new_measure_map().put_double(&latency(), 15.0).record(&tags);
        clock.advance(Duration::from_secs(2));

        let sum = stats.get_view(&ViewName::new("latency/sum")).unwrap();
        assert_eq!(sum.aggregation_map[&get()], AggregationData::SumDouble(20.0));
        assert_eq!(sum.start, Timestamp::from_secs(1));
        assert_eq!(sum.end, Timestamp::from_secs(3));

        let dist = stats.get_view(&ViewName::new("latency/dist")).unwrap();
        match &dist.aggregation_map[&get()] {
            AggregationData::Distribution(data) => assert_eq!(data.bucket_counts, vec![1, 1]),
            other => panic!("unexpected aggregation {other:?}"),
        }
    }

    #[test]
    fn test_unknown_measure_ignored() {
        let (stats, _) = setup();
        stats.register_view(latency_view(Aggregation::Count)).unwrap();
        let unknown = Measure::double("bytes", "", "By");
        stats
            .new_measure_map()
            .put_double(&unknown, 1.0)
            .record(&TagContext::new());

        let view = stats.get_view(&ViewName::new("latency/sum")).unwrap();
        assert!(view.aggregation_map.is_empty());
    }

    #[test]
    fn test_long_measure_yields_long_data() {
        let (stats, _) = setup();
        let bytes = Measure::long("bytes", "", "By");
        stats
            .register_view(View::new(
                ViewName::new("bytes/sum"),
                "",
                bytes.clone(),
                Aggregation::Sum,
                vec![],
            ))
            .unwrap();
        stats
            .new_measure_map()
            .put_long(&bytes, 10)
            .put_long(&bytes, 32)
            .record(&TagContext::new());

        let view = stats.get_view(&ViewName::new("bytes/sum")).unwrap();
        assert_eq!(
            view.aggregation_map[&TagValues(vec![])],
            AggregationData::SumLong(42)
        );
    }

    #[test]
    fn test_disable_then_enable() {
        let (stats, clock) = setup();
        stats.register_view(latency_view(Aggregation::Sum)).unwrap();
        let tags = TagContext::new().with(method(), "GET");

        stats.set_state(StatsCollectionState::Disabled);
        stats.new_measure_map().put_double(&latency(), 1.0).record(&tags);
        let disabled = stats.get_view(&ViewName::new("latency/sum")).unwrap();
        assert!(disabled.aggregation_map.is_empty());
        assert_eq!(disabled.start, Timestamp::ZERO);
        assert_eq!(disabled.end, Timestamp::ZERO);

        clock.advance(Duration::from_secs(5));
        stats.set_state(StatsCollectionState::Enabled);
        let enabled = stats.get_view(&ViewName::new("latency/sum")).unwrap();
        assert_eq!(enabled.start, Timestamp::from_secs(6));
        assert_eq!(enabled.aggregation_map[&get()], AggregationData::SumDouble(1.0));
    }

    #[test]
    fn test_interval_view_registration() {
        let (stats, clock) = setup();
        let view = latency_view(Aggregation::Count)
            .with_window(AggregationWindow::Interval(Duration::from_secs(60)));
        stats.register_view(view).unwrap();

        let tags = TagContext::new().with(method(), "GET");
        stats.new_measure_map().put_double(&latency(), 1.0).record(&tags);
        clock.advance(Duration::from_secs(120));

        let data = stats.get_view(&ViewName::new("latency/sum")).unwrap();
        assert!(data.aggregation_map.is_empty());
        assert_eq!(data.start, Timestamp::from_secs(61));
    }

    #[test]
    fn test_clear_stats() {
        let (stats, _) = setup();
        stats.register_view(latency_view(Aggregation::Count)).unwrap();
        let tags = TagContext::new().with(method(), "GET");
        stats.new_measure_map().put_double(&latency(), 1.0).record(&tags);
        stats.clear_stats();
        assert!(stats
            .get_view(&ViewName::new("latency/sum"))
            .unwrap()
            .aggregation_map
            .is_empty());
    }
}

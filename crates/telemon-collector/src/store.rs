use std::collections::BTreeMap;

use telemon_common::types::{Metric, MetricValue};

/// Name of the counter incremented once per runtime collection round.
pub const POLL_COUNT: &str = "PollCount";

/// Accumulated gauges and counters between two report ticks.
///
/// The agent keeps one store behind a single mutex shared by the poll task
/// (writer) and the report task (snapshot and reset).
#[derive(Debug, Default)]
pub struct MetricStore {
    gauges: BTreeMap<String, f64>,
    counters: BTreeMap<String, i64>,
}

impl MetricStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_gauge(&mut self, name: impl Into<String>, value: f64) {
        self.gauges.insert(name.into(), value);
    }

    pub fn add_counter(&mut self, name: impl Into<String>, delta: i64) {
        let entry = self.counters.entry(name.into()).or_insert(0);
        *entry = entry.wrapping_add(delta);
    }

    /// Folds collector output into the store.
    pub fn apply(&mut self, metrics: impl IntoIterator<Item = Metric>) {
        for metric in metrics {
            match metric.value {
                MetricValue::Gauge { value } => self.set_gauge(metric.name, value),
                MetricValue::Counter { delta } => self.add_counter(metric.name, delta),
            }
        }
    }

    pub fn gauge(&self, name: &str) -> Option<f64> {
        self.gauges.get(name).copied()
    }

    pub fn counter(&self, name: &str) -> Option<i64> {
        self.counters.get(name).copied()
    }

    pub fn gauge_names(&self) -> impl Iterator<Item = &str> {
        self.gauges.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.gauges.len() + self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gauges.is_empty() && self.counters.is_empty()
    }

    /// Drops every gauge and counter.
    pub fn reset(&mut self) {
        self.gauges.clear();
        self.counters.clear();
    }

    /// Materializes one metric per gauge and per counter, then zeroes the
    /// counters.
    ///
    /// Counters are reset as soon as they are handed off, not when delivery
    /// is confirmed: a failed send loses that window's counts.
    pub fn snapshot(&mut self) -> Vec<Metric> {
        let mut metrics = Vec::with_capacity(self.len());
        metrics.extend(self.gauges.iter().map(|(name, value)| Metric::gauge(name.clone(), *value)));
        metrics.extend(self.counters.iter().map(|(name, delta)| Metric::counter(name.clone(), *delta)));
        for delta in self.counters.values_mut() {
            *delta = 0;
        }
        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gauges_overwrite_and_counters_accumulate() {
        let mut store = MetricStore::new();
        store.apply([Metric::gauge("Alloc", 1.0), Metric::counter(POLL_COUNT, 1)]);
        store.apply([Metric::gauge("Alloc", 2.0), Metric::counter(POLL_COUNT, 1)]);

        assert_eq!(store.gauge("Alloc"), Some(2.0));
        assert_eq!(store.counter(POLL_COUNT), Some(2));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn snapshot_resets_counters_but_keeps_gauges() {
        let mut store = MetricStore::new();
        store.set_gauge("CPUload", 42.0);
        store.add_counter("requests", 7);

        let snapshot = store.snapshot();
        assert_eq!(
            snapshot,
            vec![Metric::gauge("CPUload", 42.0), Metric::counter("requests", 7)]
        );
        assert_eq!(store.counter("requests"), Some(0));
        assert_eq!(store.gauge("CPUload"), Some(42.0));

        store.add_counter("requests", 3);
        assert!(store.snapshot().contains(&Metric::counter("requests", 3)));
    }

    #[test]
    fn reset_empties_the_store() {
        let mut store = MetricStore::new();
        store.set_gauge("a", 1.0);
        store.add_counter("b", 1);
        store.reset();
        assert!(store.is_empty());
        assert!(store.snapshot().is_empty());
    }
}

//! Aggregates the counters/gauges/histograms the rest of this core reports
//! into, and exposes named numeric readings to the alert rule engine.
//!
//! Grounded in `rust_common::metrics::{Counter, Gauge}`'s Prometheus-text
//! rendering style; this collector is a thin named registry over those
//! primitives plus the `Histogram` addition, not a reimplementation.

use std::collections::HashMap;

use credential_common::metrics::{Counter, Gauge, Histogram};
use tokio::sync::RwLock;

/// Named, typed metric storage with a single point of access for the rule
/// engine to read current values from.
pub struct MetricsCollector {
    counters: RwLock<HashMap<String, Counter>>,
    gauges: RwLock<HashMap<String, Gauge>>,
    histograms: RwLock<HashMap<String, Histogram>>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    /// Create an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self {
            counters: RwLock::new(HashMap::new()),
            gauges: RwLock::new(HashMap::new()),
            histograms: RwLock::new(HashMap::new()),
        }
    }

    /// Increment a named counter by 1, creating it on first use.
    pub async fn inc_counter(&self, name: &str, help: &str) {
        let counters = self.counters.read().await;
        if let Some(counter) = counters.get(name) {
            counter.inc();
            return;
        }
        drop(counters);
        let mut counters = self.counters.write().await;
        counters
            .entry(name.to_string())
            .or_insert_with(|| Counter::new(name, help))
            .inc();
    }

    /// Set a named gauge, creating it on first use.
    pub async fn set_gauge(&self, name: &str, help: &str, value: u64) {
        let gauges = self.gauges.read().await;
        if let Some(gauge) = gauges.get(name) {
            gauge.set(value);
            return;
        }
        drop(gauges);
        let mut gauges = self.gauges.write().await;
        gauges
            .entry(name.to_string())
            .or_insert_with(|| Gauge::new(name, help))
            .set(value);
    }

    /// Record an observation into a named histogram, creating it on first use.
    pub async fn observe_histogram(&self, name: &str, help: &str, value_ms: u64) {
        let histograms = self.histograms.read().await;
        if let Some(hist) = histograms.get(name) {
            hist.observe_ms(value_ms);
            return;
        }
        drop(histograms);
        let mut histograms = self.histograms.write().await;
        histograms
            .entry(name.to_string())
            .or_insert_with(|| Histogram::new(name, help))
            .observe_ms(value_ms);
    }

    /// Current value of a counter, or 0 if it has never been recorded.
    pub async fn counter_value(&self, name: &str) -> u64 {
        self.counters.read().await.get(name).map_or(0, Counter::get)
    }

    /// Current value of a gauge, or 0 if it has never been recorded.
    pub async fn gauge_value(&self, name: &str) -> u64 {
        self.gauges.read().await.get(name).map_or(0, Gauge::get)
    }

    /// Mean of a histogram's observations, or `None` if absent/empty.
    pub async fn histogram_mean(&self, name: &str) -> Option<f64> {
        self.histograms.read().await.get(name).and_then(Histogram::mean_ms)
    }

    /// Render every registered metric as Prometheus exposition text.
    pub async fn to_prometheus(&self) -> String {
        let mut out = String::new();
        for counter in self.counters.read().await.values() {
            out.push_str(&counter.to_prometheus());
        }
        for gauge in self.gauges.read().await.values() {
            out.push_str(&gauge.to_prometheus());
        }
        for hist in self.histograms.read().await.values() {
            out.push_str(&hist.to_prometheus());
        }
        out
    }
}

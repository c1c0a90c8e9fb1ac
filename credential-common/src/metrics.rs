//! Prometheus-style metric primitives used by the monitoring subsystem.

use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonically increasing counter.
#[derive(Debug)]
pub struct Counter {
    name: String,
    help: String,
    value: AtomicU64,
}

impl Counter {
    /// Create a new counter.
    #[must_use]
    pub fn new(name: impl Into<String>, help: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            value: AtomicU64::new(0),
        }
    }

    /// Increment by 1.
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment by `amount`.
    pub fn inc_by(&self, amount: u64) {
        self.value.fetch_add(amount, Ordering::Relaxed);
    }

    /// Current value.
    #[must_use]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Metric name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Render as Prometheus exposition text.
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        format!(
            "# HELP {} {}\n# TYPE {} counter\n{} {}\n",
            self.name, self.help, self.name, self.name, self.get()
        )
    }
}

/// A point-in-time value that can go up or down.
#[derive(Debug)]
pub struct Gauge {
    name: String,
    help: String,
    value: AtomicU64,
}

impl Gauge {
    /// Create a new gauge.
    #[must_use]
    pub fn new(name: impl Into<String>, help: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            value: AtomicU64::new(0),
        }
    }

    /// Set the value.
    pub fn set(&self, value: u64) {
        self.value.store(value, Ordering::Relaxed);
    }

    /// Increment by 1.
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement by 1.
    pub fn dec(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }

    /// Current value.
    #[must_use]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Metric name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Render as Prometheus exposition text.
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        format!(
            "# HELP {} {}\n# TYPE {} gauge\n{} {}\n",
            self.name, self.help, self.name, self.name, self.get()
        )
    }
}

const HISTOGRAM_BUCKETS_MS: [u64; 8] = [1, 5, 10, 25, 50, 100, 250, 500];

/// A fixed-bucket latency/duration histogram, lock-free via atomics.
///
/// Buckets are cumulative in milliseconds; anything above the top bucket
/// falls into an implicit `+Inf` bucket. Used by the rotation scheduler
/// for execution-time tracking and by alert rules that evaluate
/// percentile or average conditions.
#[derive(Debug)]
pub struct Histogram {
    name: String,
    help: String,
    buckets: [AtomicU64; HISTOGRAM_BUCKETS_MS.len()],
    sum_ms: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    /// Create a new histogram.
    #[must_use]
    pub fn new(name: impl Into<String>, help: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            buckets: Default::default(),
            sum_ms: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Record one observation, in milliseconds.
    pub fn observe_ms(&self, value_ms: u64) {
        for (bucket, &ceiling) in self.buckets.iter().zip(HISTOGRAM_BUCKETS_MS.iter()) {
            if value_ms <= ceiling {
                bucket.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.sum_ms.fetch_add(value_ms, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Total number of observations.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Mean observed value in milliseconds, or `None` if no observations yet.
    #[must_use]
    pub fn mean_ms(&self) -> Option<f64> {
        let count = self.count.load(Ordering::Relaxed);
        if count == 0 {
            return None;
        }
        Some(self.sum_ms.load(Ordering::Relaxed) as f64 / count as f64)
    }

    /// Render as Prometheus exposition text.
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        let mut out = format!(
            "# HELP {} {}\n# TYPE {} histogram\n",
            self.name, self.help, self.name
        );
        for (bucket, ceiling) in self.buckets.iter().zip(HISTOGRAM_BUCKETS_MS.iter()) {
            out.push_str(&format!(
                "{}_bucket{{le=\"{}\"}} {}\n",
                self.name,
                ceiling,
                bucket.load(Ordering::Relaxed)
            ));
        }
        out.push_str(&format!(
            "{}_sum {}\n{}_count {}\n",
            self.name,
            self.sum_ms.load(Ordering::Relaxed),
            self.name,
            self.count()
        ));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let counter = Counter::new("test_counter", "A test counter");
        counter.inc();
        counter.inc_by(5);
        assert_eq!(counter.get(), 6);
    }

    #[test]
    fn test_gauge() {
        let gauge = Gauge::new("test_gauge", "A test gauge");
        gauge.set(10);
        gauge.inc();
        gauge.dec();
        assert_eq!(gauge.get(), 10);
    }

    #[test]
    fn test_prometheus_format() {
        let counter = Counter::new("requests_total", "Total requests");
        counter.inc_by(42);
        let output = counter.to_prometheus();
        assert!(output.contains("# TYPE requests_total counter"));
        assert!(output.contains("requests_total 42"));
    }

    #[test]
    fn test_histogram_mean_and_buckets() {
        let hist = Histogram::new("rotation_duration_ms", "Rotation execution time");
        hist.observe_ms(3);
        hist.observe_ms(30);
        hist.observe_ms(300);
        assert_eq!(hist.count(), 3);
        assert_eq!(hist.mean_ms(), Some(111.0));
        let text = hist.to_prometheus();
        assert!(text.contains("le=\"500\""));
    }

    #[test]
    fn test_histogram_empty_mean() {
        let hist = Histogram::new("empty", "unused");
        assert_eq!(hist.mean_ms(), None);
    }
}

//! Metrics collection and rule-based alerting.

pub mod alerts;
pub mod collector;

pub use alerts::{Alert, AlertEngine, AlertRule, Operator, Severity};
pub use collector::MetricsCollector;

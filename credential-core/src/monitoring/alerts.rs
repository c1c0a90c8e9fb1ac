//! Alert rule evaluation: simple `(variable, operator, literal)` comparisons
//! over named metric readings, deliberately not a general expression
//! evaluator. Rules are parsed into their three parts ahead of time so
//! evaluation never runs unchecked string expressions against live metrics.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Comparison operators a rule may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    /// Greater than.
    Gt,
    /// Greater than or equal to.
    Ge,
    /// Less than.
    Lt,
    /// Less than or equal to.
    Le,
    /// Equal to, within floating-point epsilon.
    Eq,
}

impl Operator {
    fn evaluate(self, lhs: f64, rhs: f64) -> bool {
        match self {
            Self::Gt => lhs > rhs,
            Self::Ge => lhs >= rhs,
            Self::Lt => lhs < rhs,
            Self::Le => lhs <= rhs,
            Self::Eq => (lhs - rhs).abs() < f64::EPSILON,
        }
    }
}

/// How urgently an alert needs attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    /// Informational.
    Low,
    /// Worth investigating soon.
    Medium,
    /// Needs prompt attention.
    High,
    /// Needs immediate attention.
    Critical,
}

/// A single comparison: `variable op literal`, parsed ahead of time into
/// its three parts rather than evaluated as a string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    /// Unique rule name, used as half of the dedup key.
    pub name: String,
    /// The metric name to read a current value for.
    pub variable: String,
    /// The comparison to apply.
    pub operator: Operator,
    /// The threshold to compare against.
    pub literal: f64,
    /// Severity to attach if this rule fires.
    pub severity: Severity,
    /// Minimum time between repeated alerts for the same `(rule, key)` pair.
    pub cooldown: Duration,
}

impl AlertRule {
    /// The five default rules: rotation failure rate, key-usage anomaly,
    /// HSM connectivity, keys expiring soon, and scheduler liveness.
    #[must_use]
    pub fn defaults() -> Vec<Self> {
        let cooldown = Duration::from_secs(300);
        vec![
            Self {
                name: "rotation-failure-rate".to_string(),
                variable: "rotation_failure_rate_1h".to_string(),
                operator: Operator::Gt,
                literal: 0.10,
                severity: Severity::High,
                cooldown,
            },
            Self {
                name: "key-usage-anomaly".to_string(),
                variable: "key_usage_zscore_1h".to_string(),
                operator: Operator::Gt,
                literal: 0.8,
                severity: Severity::Medium,
                cooldown,
            },
            Self {
                name: "hsm-connection-lost".to_string(),
                variable: "hsm_connected".to_string(),
                operator: Operator::Eq,
                literal: 0.0,
                severity: Severity::Critical,
                cooldown,
            },
            Self {
                name: "keys-expiring-soon".to_string(),
                variable: "keys_expiring_within_7d".to_string(),
                operator: Operator::Gt,
                literal: 0.0,
                severity: Severity::Medium,
                cooldown,
            },
            Self {
                name: "scheduler-not-running".to_string(),
                variable: "scheduler_running".to_string(),
                operator: Operator::Eq,
                literal: 0.0,
                severity: Severity::High,
                cooldown,
            },
        ]
    }
}

/// A fired alert.
#[derive(Debug, Clone)]
pub struct Alert {
    /// The rule that fired.
    pub rule_name: String,
    /// The key this alert concerns, if scoped to one.
    pub key_id: Option<String>,
    /// Severity copied from the rule.
    pub severity: Severity,
    /// The metric value observed at evaluation time.
    pub observed_value: f64,
    /// When the alert fired.
    pub raised_at: DateTime<Utc>,
}

/// Evaluates [`AlertRule`]s against named metric readings, deduping repeated
/// fires for the same `(rule, key)` pair within each rule's cooldown.
pub struct AlertEngine {
    rules: Vec<AlertRule>,
    last_fired: Mutex<HashMap<(String, Option<String>), DateTime<Utc>>>,
}

impl AlertEngine {
    /// Build an engine with the given rule set.
    #[must_use]
    pub fn new(rules: Vec<AlertRule>) -> Self {
        Self {
            rules,
            last_fired: Mutex::new(HashMap::new()),
        }
    }

    /// Evaluate every rule against `readings` (metric name -> current
    /// value), optionally scoped to `key_id`. Rules whose variable is
    /// missing from `readings` are skipped, not treated as a match.
    pub async fn evaluate(
        &self,
        readings: &HashMap<String, f64>,
        key_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Vec<Alert> {
        let mut fired = Vec::new();
        let mut last_fired = self.last_fired.lock().await;

        for rule in &self.rules {
            let Some(&value) = readings.get(&rule.variable) else {
                continue;
            };
            if !rule.operator.evaluate(value, rule.literal) {
                continue;
            }

            let dedup_key = (rule.name.clone(), key_id.map(ToString::to_string));
            if let Some(last) = last_fired.get(&dedup_key) {
                let elapsed = (now - *last)
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                if elapsed < rule.cooldown {
                    continue;
                }
            }

            last_fired.insert(dedup_key, now);
            fired.push(Alert {
                rule_name: rule.name.clone(),
                key_id: key_id.map(ToString::to_string),
                severity: rule.severity,
                observed_value: value,
                raised_at: now,
            });
        }

        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn readings(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), *v)).collect()
    }

    #[tokio::test]
    async fn test_default_rules_include_the_five_named_cases() {
        let rules = AlertRule::defaults();
        assert_eq!(rules.len(), 5);
        assert!(rules.iter().any(|r| r.name == "hsm-connection-lost"));
    }

    #[tokio::test]
    async fn test_rotation_failure_rate_fires_above_threshold() {
        let engine = AlertEngine::new(AlertRule::defaults());
        let now = Utc::now();
        let fired = engine
            .evaluate(&readings(&[("rotation_failure_rate_1h", 0.25)]), None, now)
            .await;
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].rule_name, "rotation-failure-rate");
        assert_eq!(fired[0].severity, Severity::High);
    }

    #[tokio::test]
    async fn test_missing_metric_does_not_fire() {
        let engine = AlertEngine::new(AlertRule::defaults());
        let fired = engine.evaluate(&HashMap::new(), None, Utc::now()).await;
        assert!(fired.is_empty());
    }

    #[tokio::test]
    async fn test_cooldown_dedupes_repeated_fires() {
        let engine = AlertEngine::new(AlertRule::defaults());
        let now = Utc::now();
        let readings = readings(&[("hsm_connected", 0.0)]);

        let first = engine.evaluate(&readings, Some("k1"), now).await;
        assert_eq!(first.len(), 1);

        let second = engine
            .evaluate(&readings, Some("k1"), now + ChronoDuration::seconds(10))
            .await;
        assert!(second.is_empty());

        let third = engine
            .evaluate(&readings, Some("k1"), now + ChronoDuration::seconds(400))
            .await;
        assert_eq!(third.len(), 1);
    }

    #[tokio::test]
    async fn test_dedup_is_scoped_per_key() {
        let engine = AlertEngine::new(AlertRule::defaults());
        let now = Utc::now();
        let readings = readings(&[("keys_expiring_within_7d", 2.0)]);

        let for_k1 = engine.evaluate(&readings, Some("k1"), now).await;
        let for_k2 = engine.evaluate(&readings, Some("k2"), now).await;

        assert_eq!(for_k1.len(), 1);
        assert_eq!(for_k2.len(), 1);
    }
}

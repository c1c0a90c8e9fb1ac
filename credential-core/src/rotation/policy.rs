//! Rotation policy evaluation: decides whether a key needs rotating, why,
//! at what priority, and checks it is actually safe to schedule.
//!
//! A small, pure state-evaluation function kept separate from the scheduler
//! that acts on it, in the style of a circuit breaker's threshold/window
//! check, generalized here into a priority table over several independent
//! triggers instead of one open/closed boolean.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::keys::Key;

/// A compliance framework the policy engine can require a key to satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComplianceFramework {
    /// FIPS 140-2 validated cryptographic modules.
    Fips1402,
    /// NIST SP 800-57 key-management guidance.
    NistSp80057,
    /// Payment Card Industry Data Security Standard.
    PciDss,
    /// Health Insurance Portability and Accountability Act.
    Hipaa,
    /// Sarbanes-Oxley.
    Sox,
    /// ISO/IEC 27001.
    Iso27001,
}

/// The requirements a [`ComplianceFramework`] imposes on a key's lifecycle.
#[derive(Debug, Clone, Copy)]
pub struct ComplianceRequirements {
    /// Maximum age, in days, before a key must be rotated.
    pub max_key_age_days: u32,
    /// Whether forward secrecy is mandatory for any TLS surface this key backs.
    pub require_pfs: bool,
    /// Minimum TLS version, as a major.minor string (`"1.3"`, `"1.2"`).
    pub min_tls_version: &'static str,
    /// How long audit records for this key must be retained.
    pub audit_retention_years: u32,
}

impl ComplianceFramework {
    /// Look up this framework's fixed requirements.
    #[must_use]
    pub const fn requirements(self) -> ComplianceRequirements {
        match self {
            Self::Fips1402 => ComplianceRequirements {
                max_key_age_days: 365,
                require_pfs: true,
                min_tls_version: "1.2",
                audit_retention_years: 3,
            },
            Self::NistSp80057 => ComplianceRequirements {
                max_key_age_days: 730,
                require_pfs: true,
                min_tls_version: "1.2",
                audit_retention_years: 3,
            },
            Self::PciDss => ComplianceRequirements {
                max_key_age_days: 365,
                require_pfs: true,
                min_tls_version: "1.2",
                audit_retention_years: 1,
            },
            Self::Hipaa => ComplianceRequirements {
                max_key_age_days: 365,
                require_pfs: true,
                min_tls_version: "1.2",
                audit_retention_years: 6,
            },
            Self::Sox => ComplianceRequirements {
                max_key_age_days: 365,
                require_pfs: false,
                min_tls_version: "1.2",
                audit_retention_years: 7,
            },
            Self::Iso27001 => ComplianceRequirements {
                max_key_age_days: 365,
                require_pfs: true,
                min_tls_version: "1.3",
                audit_retention_years: 3,
            },
        }
    }
}

/// A window of time during which rotations for a policy are allowed to run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationWindow {
    /// Minutes since midnight, local to `timezone`, when the window opens.
    pub start_minute: u32,
    /// Minutes since midnight when the window closes.
    pub end_minute: u32,
    /// IANA timezone name, informational only (callers supply times already
    /// converted; this core does not perform timezone math).
    pub timezone: String,
    /// Whether Saturday/Sunday are excluded even if otherwise in-window.
    pub exclude_weekends: bool,
    /// Whether declared holidays are excluded even if otherwise in-window.
    pub exclude_holidays: bool,
}

impl RotationWindow {
    /// Whether `at` (already expressed in this window's local time) falls
    /// inside the window, accounting for weekend/holiday exclusions.
    #[must_use]
    pub fn contains(&self, at: DateTime<Utc>, is_holiday: bool) -> bool {
        use chrono::{Datelike, Timelike, Weekday};

        if self.exclude_weekends && matches!(at.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        if self.exclude_holidays && is_holiday {
            return false;
        }
        let minute_of_day = at.hour() * 60 + at.minute();
        minute_of_day >= self.start_minute && minute_of_day < self.end_minute
    }
}

/// A configured rotation policy, applied to every key of `key_type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationPolicy {
    /// Unique id.
    pub policy_id: String,
    /// Human-readable, unique name.
    pub name: String,
    /// Key type (classification) this policy governs.
    pub key_type: String,
    /// Rotate once a key exceeds this age, if set.
    pub rotation_interval_days: Option<u32>,
    /// Rotate once `usage_count` reaches this value, if set.
    pub max_operations: Option<u64>,
    /// Window rotations for this policy must run inside, if restricted.
    pub window: Option<RotationWindow>,
    /// Compliance frameworks this policy's keys must satisfy.
    pub required_compliance: Vec<ComplianceFramework>,
    /// Whether a security incident can trigger an out-of-band rotation.
    pub incident_triggered: bool,
    /// Where to send rotation notifications.
    pub notification_channels: Vec<String>,
    /// Principal that created this policy.
    pub created_by: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Whether the scheduler should consider this policy at all.
    pub is_active: bool,
}

/// A reported security incident, considered by the `SecurityIncident` rule.
#[derive(Debug, Clone, Copy)]
pub struct SecurityIncident {
    /// Severity on a 1-10 scale.
    pub severity: u8,
    /// When the incident occurred.
    pub occurred_at: DateTime<Utc>,
}

/// Why a rotation is or is not required, per the priority table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RotationTrigger {
    /// At least one incident with severity >= 7 within 24h and the policy opts in.
    SecurityIncident,
    /// Key age exceeds a required framework's `max_key_age_days`.
    ComplianceDeadline,
    /// `usage_count >= max_operations`.
    UsageExceeded,
    /// `usage_count >= 0.9 * max_operations`.
    UsageApproaching,
    /// `now - last_rotation >= rotation_interval_days`.
    TimeElapsed,
    /// Invoked directly by an operator, outside the policy engine.
    Manual,
    /// None of the above apply.
    None,
}

/// Result of evaluating a policy against one key.
#[derive(Debug, Clone)]
pub struct PolicyEvaluation {
    /// Whether a rotation should be scheduled.
    pub required: bool,
    /// The highest-priority rule that fired.
    pub trigger: RotationTrigger,
    /// 1-10, higher is more urgent.
    pub priority: u8,
    /// Human-readable justification, safe to put in an audit record.
    pub reason: String,
    /// Suggested time to run the rotation, if a window constrains it.
    pub recommended_time: Option<DateTime<Utc>>,
}

impl PolicyEvaluation {
    fn not_required() -> Self {
        Self {
            required: false,
            trigger: RotationTrigger::None,
            priority: 1,
            reason: "no rotation trigger matched".to_string(),
            recommended_time: None,
        }
    }
}

/// Evaluates rotation policies against keys.
#[derive(Debug, Default)]
pub struct PolicyEngine;

impl PolicyEngine {
    /// Create an engine. Stateless: all inputs are passed per call.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Evaluate `policy` against `key`, returning the highest-priority
    /// matching trigger.
    #[must_use]
    pub fn evaluate(
        &self,
        policy: &RotationPolicy,
        key: &Key,
        usage_count: u64,
        key_age_days: i64,
        days_since_rotation: i64,
        incidents: &[SecurityIncident],
        now: DateTime<Utc>,
    ) -> PolicyEvaluation {
        if policy.incident_triggered {
            let recent_severe = incidents.iter().any(|incident| {
                incident.severity >= 7 && (now - incident.occurred_at).num_hours() < 24
            });
            if recent_severe {
                return PolicyEvaluation {
                    required: true,
                    trigger: RotationTrigger::SecurityIncident,
                    priority: 10,
                    reason: "security incident with severity >= 7 within 24h".to_string(),
                    recommended_time: Some(now),
                };
            }
        }

        if let Some(worst) = policy
            .required_compliance
            .iter()
            .map(|framework| framework.requirements().max_key_age_days)
            .min()
        {
            if key_age_days >= i64::from(worst) {
                return PolicyEvaluation {
                    required: true,
                    trigger: RotationTrigger::ComplianceDeadline,
                    priority: 9,
                    reason: format!("key age {key_age_days}d exceeds compliance limit {worst}d"),
                    recommended_time: Some(now),
                };
            }
        }

        if let Some(max_ops) = policy.max_operations {
            if usage_count >= max_ops {
                return PolicyEvaluation {
                    required: true,
                    trigger: RotationTrigger::UsageExceeded,
                    priority: 8,
                    reason: format!("usage_count {usage_count} >= max_operations {max_ops}"),
                    recommended_time: Some(now),
                };
            }
            #[allow(clippy::cast_precision_loss)]
            let approaching_threshold = (max_ops as f64) * 0.9;
            #[allow(clippy::cast_precision_loss)]
            if (usage_count as f64) >= approaching_threshold {
                return PolicyEvaluation {
                    required: true,
                    trigger: RotationTrigger::UsageApproaching,
                    priority: 6,
                    reason: format!("usage_count {usage_count} is within 10% of max_operations {max_ops}"),
                    recommended_time: Some(now),
                };
            }
        }

        if let Some(interval) = policy.rotation_interval_days {
            if days_since_rotation >= i64::from(interval) {
                let days_overdue = days_since_rotation - i64::from(interval);
                let priority = u8::try_from((5 + days_overdue / 30).clamp(5, 9)).unwrap_or(9);
                return PolicyEvaluation {
                    required: true,
                    trigger: RotationTrigger::TimeElapsed,
                    priority,
                    reason: format!(
                        "{days_since_rotation}d since last rotation >= interval {interval}d"
                    ),
                    recommended_time: Some(now),
                };
            }
        }

        let _ = key;
        PolicyEvaluation::not_required()
    }

    /// Safety checks that must all hold before a required rotation is
    /// actually scheduled: no rotation already running for the key, system
    /// load below threshold, and not inside a declared maintenance window.
    #[must_use]
    pub fn is_safe_to_schedule(
        has_running_rotation: bool,
        system_load: f64,
        load_threshold: f64,
        in_maintenance_window: bool,
    ) -> bool {
        !has_running_rotation && system_load < load_threshold && !in_maintenance_window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{Key, KeyOperation, KeyType, KeyVersion, KeyVersionStatus};

    fn sample_key() -> Key {
        Key {
            key_id: "k1".to_string(),
            owner: "svc".to_string(),
            key_type: KeyType::Dek,
            parent_key_id: Some("root-kek".to_string()),
            allowed_operations: vec![KeyOperation::Encrypt, KeyOperation::Decrypt],
            tags: vec![],
            current_version: 1,
            versions: vec![KeyVersion {
                version: 1,
                status: KeyVersionStatus::Active,
                wrapped_dek: vec![],
                created_at: Utc::now(),
                activated_at: Some(Utc::now()),
                deprecated_at: None,
                destroyed_at: None,
                usage_count: 0,
                material_digest: [0u8; 32],
                wrapping_version: Some(1),
            }],
            created_at: Utc::now(),
        }
    }

    fn sample_policy() -> RotationPolicy {
        RotationPolicy {
            policy_id: "p1".to_string(),
            name: "default".to_string(),
            key_type: "database-credential".to_string(),
            rotation_interval_days: Some(90),
            max_operations: Some(1_000_000),
            window: None,
            required_compliance: vec![],
            incident_triggered: true,
            notification_channels: vec![],
            created_by: "admin".to_string(),
            created_at: Utc::now(),
            is_active: true,
        }
    }

    #[test]
    fn test_security_incident_outranks_everything() {
        let engine = PolicyEngine::new();
        let incidents = vec![SecurityIncident {
            severity: 9,
            occurred_at: Utc::now(),
        }];
        let eval = engine.evaluate(
            &sample_policy(),
            &sample_key(),
            0,
            1,
            1,
            &incidents,
            Utc::now(),
        );
        assert!(eval.required);
        assert_eq!(eval.trigger, RotationTrigger::SecurityIncident);
        assert_eq!(eval.priority, 10);
    }

    #[test]
    fn test_usage_exceeded_without_incident() {
        let engine = PolicyEngine::new();
        let eval = engine.evaluate(
            &sample_policy(),
            &sample_key(),
            1_000_000,
            10,
            10,
            &[],
            Utc::now(),
        );
        assert_eq!(eval.trigger, RotationTrigger::UsageExceeded);
        assert_eq!(eval.priority, 8);
    }

    #[test]
    fn test_time_elapsed_priority_scales_with_overdue_days() {
        let engine = PolicyEngine::new();
        let eval = engine.evaluate(&sample_policy(), &sample_key(), 0, 200, 150, &[], Utc::now());
        assert_eq!(eval.trigger, RotationTrigger::TimeElapsed);
        assert_eq!(eval.priority, 7);
    }

    #[test]
    fn test_no_trigger_when_nothing_matches() {
        let engine = PolicyEngine::new();
        let eval = engine.evaluate(&sample_policy(), &sample_key(), 0, 5, 5, &[], Utc::now());
        assert!(!eval.required);
        assert_eq!(eval.trigger, RotationTrigger::None);
    }

    #[test]
    fn test_safety_checks() {
        assert!(PolicyEngine::is_safe_to_schedule(false, 0.2, 0.8, false));
        assert!(!PolicyEngine::is_safe_to_schedule(true, 0.2, 0.8, false));
        assert!(!PolicyEngine::is_safe_to_schedule(false, 0.9, 0.8, false));
        assert!(!PolicyEngine::is_safe_to_schedule(false, 0.2, 0.8, true));
    }

    #[test]
    fn test_compliance_requirements_table() {
        let req = ComplianceFramework::PciDss.requirements();
        assert_eq!(req.max_key_age_days, 365);
        assert!(req.require_pfs);
    }
}

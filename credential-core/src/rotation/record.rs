//! The rotation execution record: one row per attempted rotation, whether
//! it was triggered by the scheduler or invoked directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::rotation::policy::RotationTrigger;

/// Lifecycle state of a single rotation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RotationStatus {
    /// Computed but not yet started.
    Scheduled,
    /// Currently executing, holding the per-key mutex.
    Running,
    /// Completed: the new version is active.
    Completed,
    /// Failed partway through; no half-activated version was left behind.
    Failed,
    /// Deferred past its scheduled time (concurrency bound or out of window).
    Skipped,
}

/// One attempted rotation of a single key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rotation {
    /// Unique id for this attempt.
    pub rotation_id: String,
    /// The key being rotated.
    pub key_id: String,
    /// What triggered this attempt.
    pub trigger: RotationTrigger,
    /// Current state.
    pub status: RotationStatus,
    /// When this attempt was scheduled to run.
    pub scheduled_at: DateTime<Utc>,
    /// When execution actually began.
    pub started_at: Option<DateTime<Utc>>,
    /// When execution finished successfully.
    pub completed_at: Option<DateTime<Utc>>,
    /// When execution failed.
    pub failed_at: Option<DateTime<Utc>>,
    /// Version active before this rotation.
    pub old_version: u32,
    /// Version activated by this rotation, once known.
    pub new_version: Option<u32>,
    /// Wall-clock duration of the rotation, once finished.
    pub execution_ms: Option<u64>,
    /// Failure detail, set only when `status == Failed`.
    pub error: Option<String>,
}

impl Rotation {
    /// Start a new `Scheduled` rotation record.
    #[must_use]
    pub fn scheduled(
        rotation_id: String,
        key_id: String,
        trigger: RotationTrigger,
        scheduled_at: DateTime<Utc>,
        old_version: u32,
    ) -> Self {
        Self {
            rotation_id,
            key_id,
            trigger,
            status: RotationStatus::Scheduled,
            scheduled_at,
            started_at: None,
            completed_at: None,
            failed_at: None,
            old_version,
            new_version: None,
            execution_ms: None,
            error: None,
        }
    }

    /// Mark the record running, recording the start time.
    pub fn mark_running(&mut self, now: DateTime<Utc>) {
        self.status = RotationStatus::Running;
        self.started_at = Some(now);
    }

    /// Mark the record completed, filling in the new version and duration.
    pub fn mark_completed(&mut self, now: DateTime<Utc>, new_version: u32) {
        self.status = RotationStatus::Completed;
        self.completed_at = Some(now);
        self.new_version = Some(new_version);
        self.execution_ms = self.started_at.map(|start| {
            u64::try_from((now - start).num_milliseconds().max(0)).unwrap_or(u64::MAX)
        });
    }

    /// Mark the record failed with `reason`.
    pub fn mark_failed(&mut self, now: DateTime<Utc>, reason: impl Into<String>) {
        self.status = RotationStatus::Failed;
        self.failed_at = Some(now);
        self.error = Some(reason.into());
        self.execution_ms = self.started_at.map(|start| {
            u64::try_from((now - start).num_milliseconds().max(0)).unwrap_or(u64::MAX)
        });
    }

    /// Mark the record skipped (deferred past its window or concurrency bound).
    pub fn mark_skipped(&mut self) {
        self.status = RotationStatus::Skipped;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completed_records_execution_duration() {
        let start = Utc::now();
        let mut rotation = Rotation::scheduled(
            "r1".to_string(),
            "k1".to_string(),
            RotationTrigger::TimeElapsed,
            start,
            1,
        );
        rotation.mark_running(start);
        let end = start + chrono::Duration::milliseconds(250);
        rotation.mark_completed(end, 2);

        assert_eq!(rotation.status, RotationStatus::Completed);
        assert_eq!(rotation.new_version, Some(2));
        assert_eq!(rotation.execution_ms, Some(250));
    }

    #[test]
    fn test_failed_records_reason() {
        let now = Utc::now();
        let mut rotation = Rotation::scheduled(
            "r1".to_string(),
            "k1".to_string(),
            RotationTrigger::Manual,
            now,
            1,
        );
        rotation.mark_running(now);
        rotation.mark_failed(now, "cancelled");

        assert_eq!(rotation.status, RotationStatus::Failed);
        assert_eq!(rotation.error.as_deref(), Some("cancelled"));
    }
}

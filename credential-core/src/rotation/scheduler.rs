//! The cooperative long-lived task that wakes on an interval, evaluates
//! every active rotation policy, and launches rotations that are due.
//!
//! Grounded in `rust_common::circuit_breaker`'s state-behind-`RwLock` shape
//! for the status surface, and in `services/token/src/refresh/rotator.rs`'s
//! mutex-scoped single-flight rotation for the per-key exclusion the
//! scheduler relies on (it never launches a second rotation for a key that
//! already has one running — [`crate::keys::KeyLifecycleManager::rotate`]
//! enforces that itself).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, RwLock};
use tokio::time::Instant;
use tracing::{info, warn};

use uuid::Uuid;

use crate::error::Result;
use crate::keys::{KeyFilter, KeyLifecycleManager};
use crate::rotation::policy::{PolicyEngine, RotationPolicy, RotationTrigger, SecurityIncident};
use crate::rotation::record::Rotation;

/// Point-in-time status of the scheduler, exposed to monitoring.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStatus {
    /// Total rotations scheduled since startup.
    pub scheduled: u64,
    /// Total rotations that completed successfully.
    pub completed: u64,
    /// Total rotations that failed.
    pub failed: u64,
    /// Total rotations deferred past their scheduled time.
    pub skipped: u64,
    /// Timestamp of the most recent successful rotation.
    pub last_success: Option<chrono::DateTime<Utc>>,
    /// Timestamp of the most recent failed rotation.
    pub last_failure: Option<chrono::DateTime<Utc>>,
    /// Exponential moving average of rotation execution time, in milliseconds.
    pub moving_average_execution_ms: f64,
    /// Key ids with a rotation currently running.
    pub active_keys: Vec<String>,
    /// How long the scheduler has been running.
    pub uptime: Duration,
}

struct Counters {
    scheduled: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

impl Default for Counters {
    fn default() -> Self {
        Self {
            scheduled: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
        }
    }
}

/// Drives policy-based rotation on a fixed tick, bounded by
/// `max_concurrent_rotations` and cancellable via a stop signal.
pub struct RotationScheduler {
    manager: Arc<KeyLifecycleManager>,
    policies: RwLock<Vec<RotationPolicy>>,
    engine: PolicyEngine,
    check_interval: Duration,
    max_concurrent_rotations: usize,
    counters: Counters,
    last_success: RwLock<Option<chrono::DateTime<Utc>>>,
    last_failure: RwLock<Option<chrono::DateTime<Utc>>>,
    moving_average_ms: RwLock<f64>,
    active_keys: RwLock<Vec<String>>,
    history: RwLock<Vec<Rotation>>,
    started_at: Instant,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

/// Caps how many completed [`Rotation`] records the scheduler retains
/// in-process; older records are dropped once this is exceeded.
const MAX_HISTORY: usize = 1_000;

impl RotationScheduler {
    /// Build a scheduler over `manager`, with no policies registered yet.
    #[must_use]
    pub fn new(
        manager: Arc<KeyLifecycleManager>,
        check_interval: Duration,
        max_concurrent_rotations: usize,
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            manager,
            policies: RwLock::new(Vec::new()),
            engine: PolicyEngine::new(),
            check_interval,
            max_concurrent_rotations,
            counters: Counters::default(),
            last_success: RwLock::new(None),
            last_failure: RwLock::new(None),
            moving_average_ms: RwLock::new(0.0),
            active_keys: RwLock::new(Vec::new()),
            history: RwLock::new(Vec::new()),
            started_at: Instant::now(),
            stop_tx,
            stop_rx,
        }
    }

    /// The most recent rotation attempts, newest last, capped at
    /// [`MAX_HISTORY`] entries retained.
    pub async fn recent_rotations(&self) -> Vec<Rotation> {
        self.history.read().await.clone()
    }

    /// Register a rotation policy to be considered on every tick.
    pub async fn add_policy(&self, policy: RotationPolicy) {
        self.policies.write().await.push(policy);
    }

    /// Signal the scheduler to stop. Running rotations complete or fail on
    /// their own timeout; this does not forcibly abort anything.
    pub fn request_stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Current status snapshot for monitoring.
    pub async fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            scheduled: self.counters.scheduled.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
            last_success: *self.last_success.read().await,
            last_failure: *self.last_failure.read().await,
            moving_average_execution_ms: *self.moving_average_ms.read().await,
            active_keys: self.active_keys.read().await.clone(),
            uptime: self.started_at.elapsed(),
        }
    }

    /// Run the scheduler loop until `request_stop` is called. Intended to be
    /// spawned as its own task.
    pub async fn run(&self) {
        let mut interval = tokio::time::interval(self.check_interval);
        let mut stop_rx = self.stop_rx.clone();

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(err) = self.tick(&[]).await {
                        warn!(error = %err, "rotation scheduler tick failed");
                    }
                }
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        info!("rotation scheduler received stop signal");
                        break;
                    }
                }
            }
        }
    }

    /// Run a single evaluation pass over every active policy. Exposed
    /// directly so tests and callers with their own loop can drive ticks
    /// without `tokio::time::interval`.
    ///
    /// # Errors
    ///
    /// Propagates errors from listing keys; individual rotation failures are
    /// recorded in the status counters, not returned.
    pub async fn tick(&self, incidents: &[SecurityIncident]) -> Result<()> {
        let policies = self.policies.read().await.clone();
        let now = Utc::now();

        for policy in policies.iter().filter(|p| p.is_active) {
            let filter = KeyFilter {
                owner: None,
                tag: Some(policy.key_type.clone()),
            };
            let keys = self.manager.list_keys(&filter).await?;

            for key in keys {
                let running = self.active_keys.read().await.len();
                if running >= self.max_concurrent_rotations {
                    self.counters.skipped.fetch_add(1, Ordering::Relaxed);
                    continue;
                }

                let key_age_days = (now - key.created_at).num_days();
                let current = key.current();
                let days_since_rotation = current
                    .activated_at
                    .map_or(key_age_days, |activated| (now - activated).num_days());

                let evaluation = self.engine.evaluate(
                    policy,
                    &key,
                    current.usage_count,
                    key_age_days,
                    days_since_rotation,
                    incidents,
                    now,
                );

                if !evaluation.required {
                    continue;
                }

                if let Some(window) = &policy.window {
                    if !window.contains(now, false) {
                        self.counters.skipped.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }
                }

                self.counters.scheduled.fetch_add(1, Ordering::Relaxed);
                self.execute_rotation(&key.key_id, evaluation.trigger, current.version, now)
                    .await;
            }
        }

        Ok(())
    }

    async fn execute_rotation(
        &self,
        key_id: &str,
        trigger: RotationTrigger,
        old_version: u32,
        scheduled_at: chrono::DateTime<Utc>,
    ) {
        self.active_keys.write().await.push(key_id.to_string());

        let mut record = Rotation::scheduled(
            Uuid::new_v4().to_string(),
            key_id.to_string(),
            trigger,
            scheduled_at,
            old_version,
        );
        let start = Instant::now();
        record.mark_running(Utc::now());

        let result = self.manager.rotate(key_id).await;

        self.active_keys.write().await.retain(|k| k != key_id);
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        match result {
            Ok(key) => {
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
                *self.last_success.write().await = Some(Utc::now());
                self.update_moving_average(elapsed_ms).await;
                record.mark_completed(Utc::now(), key.current_version);
                info!(key_id, "rotation completed");
            }
            Err(err) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                *self.last_failure.write().await = Some(Utc::now());
                record.mark_failed(Utc::now(), err.to_string());
                warn!(key_id, error = %err, "rotation failed");
            }
        }

        self.record_history(record).await;
    }

    async fn record_history(&self, record: Rotation) {
        let mut history = self.history.write().await;
        history.push(record);
        let excess = history.len().saturating_sub(MAX_HISTORY);
        if excess > 0 {
            history.drain(0..excess);
        }
    }

    async fn update_moving_average(&self, sample_ms: f64) {
        const ALPHA: f64 = 0.2;
        let mut avg = self.moving_average_ms.write().await;
        *avg = if *avg == 0.0 {
            sample_ms
        } else {
            ALPHA * sample_ms + (1.0 - ALPHA) * *avg
        };
    }
}

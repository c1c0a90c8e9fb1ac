//! Top-level assembly: wires configuration into an HSM provider, the AEAD
//! engine, the key lifecycle manager, the rotation scheduler, the audit
//! chain, and monitoring, the way `services/token`'s `AppState` wires its
//! JWT/DPoP/KMS layers together behind a single constructor.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::audit::{AuditChain, AuditEventType};
use crate::config::CredentialStoreConfig;
use crate::error::Result;
use crate::hsm::{HsmFactory, HsmProvider, HsmProviderKind};
use crate::keys::{InMemoryKeyStore, KeyLifecycleManager};
use crate::monitoring::{AlertEngine, AlertRule, MetricsCollector};
use crate::rotation::RotationScheduler;

/// Owns every long-lived component of the credential store and the wiring
/// between them. Built once at process startup via [`Self::bootstrap`].
pub struct CredentialStore {
    /// The configuration this instance was built from.
    pub config: CredentialStoreConfig,
    /// Creates, retrieves, rotates, and revokes keys.
    pub lifecycle: Arc<KeyLifecycleManager>,
    /// Drives policy-based rotation on a fixed tick.
    pub scheduler: Arc<RotationScheduler>,
    /// Tamper-evident record of every key mutation.
    pub audit: Arc<AuditChain>,
    /// Named counters, gauges, and histograms.
    pub metrics: Arc<MetricsCollector>,
    /// Rule-based alerting over metric readings.
    pub alerts: Arc<AlertEngine>,
    hsm: Arc<dyn HsmProvider>,
}

impl CredentialStore {
    /// Build every component from `config` and wire them together.
    ///
    /// Provisions a software-simulated HSM and imports `config.root_kek` as
    /// the HSM-resident key every root key-encryption key is wrapped by.
    ///
    /// # Errors
    ///
    /// Returns an error if the HSM fails its health check or refuses to
    /// import the root key.
    pub async fn bootstrap(config: CredentialStoreConfig) -> Result<Self> {
        let hsm = HsmFactory::create(&HsmProviderKind::Software);
        hsm.health_check().await?;
        let kek_handle = hsm.import_key("root-kek", config.root_kek.as_ref()).await?;

        let store = Arc::new(InMemoryKeyStore::new());
        let aead = Arc::new(crate::aead::AeadEngine::new(
            config.max_tracked_nonces_per_key,
            config.nonce_retention_hours,
        ));
        let audit = Arc::new(AuditChain::new());

        let lifecycle = Arc::new(KeyLifecycleManager::new(
            store,
            hsm.clone(),
            aead,
            kek_handle,
            config.key_cache_ttl,
            audit.clone(),
        ));

        let scheduler = Arc::new(RotationScheduler::new(
            lifecycle.clone(),
            config.rotation_check_interval,
            config.max_concurrent_rotations,
        ));

        let metrics = Arc::new(MetricsCollector::new());
        let mut rules = AlertRule::defaults();
        for rule in &mut rules {
            rule.cooldown = config.alert_cooldown;
        }
        let alerts = Arc::new(AlertEngine::new(rules));

        info!("credential store bootstrapped");

        Ok(Self {
            config,
            lifecycle,
            scheduler,
            audit,
            metrics,
            alerts,
            hsm,
        })
    }

    /// Run one scheduler tick, then fold the resulting status and recent
    /// rotation history into metrics, evaluate alert rules over those
    /// readings, and append an [`AuditEventType::AlertRaised`] record for
    /// every alert that fires.
    ///
    /// # Errors
    ///
    /// Propagates errors from the scheduler's key listing.
    pub async fn run_rotation_tick(&self) -> Result<Vec<crate::monitoring::Alert>> {
        self.scheduler.tick(&[]).await?;
        let status = self.scheduler.status().await;

        self.metrics
            .set_gauge("active_rotations", "in-flight rotations", status.active_keys.len() as u64)
            .await;
        self.metrics
            .observe_histogram(
                "rotation_duration_ms",
                "rotation execution time",
                status.moving_average_execution_ms as u64,
            )
            .await;

        let hsm_connected = f64::from(u8::from(self.hsm.health_check().await.is_ok()));
        let total = status.completed + status.failed;
        let failure_rate = if total == 0 {
            0.0
        } else {
            status.failed as f64 / total as f64
        };

        let mut readings = HashMap::new();
        readings.insert("rotation_failure_rate_1h".to_string(), failure_rate);
        readings.insert("hsm_connected".to_string(), hsm_connected);
        readings.insert("scheduler_running".to_string(), 1.0);

        let alerts = self.alerts.evaluate(&readings, None, chrono::Utc::now()).await;
        for alert in &alerts {
            warn!(rule = %alert.rule_name, severity = ?alert.severity, "alert raised");
            self.audit
                .append(
                    AuditEventType::AlertRaised,
                    alert.key_id.clone(),
                    None,
                    format!("alert {} fired at {}", alert.rule_name, alert.observed_value),
                    serde_json::json!({ "severity": format!("{:?}", alert.severity) }),
                )
                .await;
        }

        Ok(alerts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use zeroize::Zeroizing;

    fn config() -> CredentialStoreConfig {
        CredentialStoreConfig {
            root_kek: Zeroizing::new([7u8; 32]),
            key_cache_ttl: Duration::from_secs(60),
            max_tracked_nonces_per_key: 1_000,
            nonce_retention_hours: 24,
            rotation_check_interval: Duration::from_secs(300),
            max_concurrent_rotations: 3,
            alert_cooldown: Duration::from_secs(300),
            security_level: crate::tls::SecurityLevel::High,
        }
    }

    #[tokio::test]
    async fn test_bootstrap_wires_every_component() {
        let store = CredentialStore::bootstrap(config()).await.unwrap();
        assert!(store.scheduler.status().await.uptime.as_nanos() > 0);
    }

    #[tokio::test]
    async fn test_run_rotation_tick_does_not_fire_when_healthy() {
        let store = CredentialStore::bootstrap(config()).await.unwrap();
        let alerts = store.run_rotation_tick().await.unwrap();
        assert!(alerts.is_empty());
    }

    #[tokio::test]
    async fn test_created_key_is_audited_through_the_assembled_store() {
        let store = CredentialStore::bootstrap(config()).await.unwrap();
        store
            .lifecycle
            .create_key("app-key", "svc", vec![], crate::keys::KeyType::Kek, None)
            .await
            .unwrap();

        let records = store.audit.by_key("app-key").await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event_type, AuditEventType::KeyCreated);
    }
}

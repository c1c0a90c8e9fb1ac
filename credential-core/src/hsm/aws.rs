//! AWS CloudHSM-backed provider.
//!
//! Mirrors `services/token/src/kms/aws.rs`: the real client call is a
//! documented placeholder (wiring the AWS CloudHSM PKCS#11 client is outside
//! this core's scope, which is the key-management engine that would sit in
//! front of it) but the circuit-breaker-guarded availability check and
//! bounded fallback window are real and tested.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;
use zeroize::Zeroizing;

use credential_common::{CircuitBreaker, CircuitBreakerConfig};

use crate::error::{Error, Result};
use crate::hsm::provider::{HsmKeyInfo, HsmProvider};
use crate::tls::SecurityLevel;

/// Configuration for the AWS CloudHSM provider.
#[derive(Debug, Clone)]
pub struct AwsHsmConfig {
    /// CloudHSM cluster region.
    pub region: String,
    /// Whether degraded-mode operation is permitted at all.
    pub fallback_enabled: bool,
    /// How long degraded-mode operation may continue before this provider
    /// refuses further calls outright, forcing the caller to fail closed.
    pub max_fallback_duration: Duration,
}

impl Default for AwsHsmConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            fallback_enabled: false,
            max_fallback_duration: Duration::from_secs(300),
        }
    }
}

/// HSM provider backed by AWS CloudHSM.
pub struct AwsCloudHsmProvider {
    config: AwsHsmConfig,
    breaker: CircuitBreaker,
    fallback_since: RwLock<Option<Instant>>,
    fallback_activations: AtomicU32,
}

impl AwsCloudHsmProvider {
    /// Build a provider for the given configuration.
    #[must_use]
    pub fn new(config: AwsHsmConfig) -> Self {
        Self {
            config,
            breaker: CircuitBreaker::new(CircuitBreakerConfig::default()),
            fallback_since: RwLock::new(None),
            fallback_activations: AtomicU32::new(0),
        }
    }

    async fn is_available(&self) -> bool {
        self.breaker.allow_request().await
    }

    async fn is_fallback_allowed(&self) -> bool {
        if !self.config.fallback_enabled {
            return false;
        }
        let mut since = self.fallback_since.write().await;
        let started = *since.get_or_insert_with(Instant::now);
        started.elapsed() < self.config.max_fallback_duration
    }

    fn not_configured(&self, op: &str) -> Error {
        // Real integration point: construct an AWS CloudHSM PKCS#11 session
        // using `self.config.region` and invoke `op` against it. Left
        // unimplemented here since wiring vendor SDKs is outside this
        // engine's boundary.
        let _ = op;
        Error::hsm("cloud HSM client not configured")
    }
}

#[async_trait]
impl HsmProvider for AwsCloudHsmProvider {
    async fn connect(&self) -> Result<()> {
        if self.is_available().await {
            self.breaker.record_failure().await;
            Err(self.not_configured("connect"))
        } else {
            Err(Error::hsm("circuit open for AWS CloudHSM"))
        }
    }

    async fn authenticate(&self) -> Result<()> {
        Err(self.not_configured("authenticate"))
    }

    async fn generate_key(&self, _label: &str, _size_bits: u32) -> Result<String> {
        Err(self.not_configured("generate_key"))
    }

    async fn import_key(&self, _label: &str, _material: &[u8]) -> Result<String> {
        Err(self.not_configured("import_key"))
    }

    async fn export_key(&self, _handle: &str) -> Result<Zeroizing<Vec<u8>>> {
        Err(Error::hsm("CloudHSM keys are not extractable"))
    }

    async fn delete_key(&self, _handle: &str) -> Result<()> {
        Err(self.not_configured("delete_key"))
    }

    async fn encrypt(&self, _handle: &str, _plaintext: &[u8]) -> Result<Vec<u8>> {
        if self.is_fallback_allowed().await {
            return Err(Error::hsm(
                "cloud HSM unavailable and software fallback is disabled for encrypt",
            ));
        }
        Err(self.not_configured("encrypt"))
    }

    async fn decrypt(&self, _handle: &str, _ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        Err(self.not_configured("decrypt"))
    }

    async fn get_key_info(&self, _handle: &str) -> Result<HsmKeyInfo> {
        Err(self.not_configured("get_key_info"))
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        Err(self.not_configured("list_keys"))
    }

    async fn health_check(&self) -> Result<()> {
        if self.is_available().await {
            self.breaker.record_failure().await;
            self.fallback_activations.fetch_add(1, Ordering::SeqCst);
            Err(self.not_configured("health_check"))
        } else {
            Err(Error::hsm("circuit open for AWS CloudHSM"))
        }
    }

    fn security_level(&self) -> SecurityLevel {
        // FIPS 140-2 validated hardware boundary.
        SecurityLevel::Maximum
    }
}

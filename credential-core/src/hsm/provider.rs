//! The HSM provider trait every backend (software simulator, cloud HSM) implements.
//!
//! A small async trait a factory resolves from a provider identifier, with
//! implementations free to add their own circuit-breaking and fallback
//! behavior behind it.

use async_trait::async_trait;
use zeroize::Zeroizing;

use crate::error::Result;
use crate::tls::SecurityLevel;

/// Uniform outcome of a single timed HSM operation, independent of the
/// `Result<T>` the trait methods themselves return — callers that need to
/// log or audit operation latency wrap a trait call with [`timed_operation`]
/// to get one of these instead of discarding the timing.
#[derive(Debug, Clone)]
pub struct OperationResult<T> {
    /// Whether the operation completed without error.
    pub success: bool,
    /// The produced value, present only when `success`.
    pub data: Option<T>,
    /// Failure detail, present only when not `success`.
    pub error_message: Option<String>,
    /// Random id correlating this attempt across logs/audit records.
    pub operation_id: String,
    /// Wall-clock duration of the operation.
    pub elapsed_ms: u64,
}

impl<T> OperationResult<T> {
    /// Convert back into this crate's [`Result`].
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::HSMError`] if the operation did not succeed.
    pub fn into_result(self) -> Result<T> {
        match self.data {
            Some(v) if self.success => Ok(v),
            _ => Err(crate::error::Error::hsm(
                self.error_message.unwrap_or_else(|| "hsm operation failed".to_string()),
            )),
        }
    }
}

/// Run `fut`, timing it and tagging the outcome with a random operation id,
/// for call sites that need to log or audit HSM call latency.
pub async fn timed_operation<T, Fut>(fut: Fut) -> OperationResult<T>
where
    Fut: std::future::Future<Output = Result<T>>,
{
    let start = std::time::Instant::now();
    let operation_id = uuid::Uuid::new_v4().to_string();
    match fut.await {
        Ok(value) => OperationResult {
            success: true,
            data: Some(value),
            error_message: None,
            operation_id,
            elapsed_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
        },
        Err(err) => OperationResult {
            success: false,
            data: None,
            error_message: Some(err.to_string()),
            operation_id,
            elapsed_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
        },
    }
}

/// Metadata an HSM reports about a key it holds, independent of provider.
#[derive(Debug, Clone)]
pub struct HsmKeyInfo {
    /// Provider-assigned key handle/label.
    pub handle: String,
    /// Key size in bits.
    pub size_bits: u32,
    /// Whether the key is currently enabled for use.
    pub enabled: bool,
}

/// Abstraction over a hardware or software security module that holds
/// key-encryption keys and performs wrap/unwrap (and optionally direct
/// encrypt/decrypt) without ever exposing raw key material to this process
/// for provider-resident keys.
#[async_trait]
pub trait HsmProvider: Send + Sync {
    /// Establish a session with the HSM.
    async fn connect(&self) -> Result<()>;

    /// Authenticate the established session.
    async fn authenticate(&self) -> Result<()>;

    /// Generate a new key inside the HSM and return its handle.
    async fn generate_key(&self, label: &str, size_bits: u32) -> Result<String>;

    /// Import externally generated key material into the HSM.
    async fn import_key(&self, label: &str, material: &[u8]) -> Result<String>;

    /// Export key material from the HSM, where the provider allows it.
    ///
    /// Returns zeroizing bytes since this crosses the HSM boundary into
    /// process memory; software simulators support this, real HSMs
    /// typically do not for non-extractable keys.
    async fn export_key(&self, handle: &str) -> Result<Zeroizing<Vec<u8>>>;

    /// Permanently delete a key from the HSM.
    async fn delete_key(&self, handle: &str) -> Result<()>;

    /// Encrypt `plaintext` using the HSM-resident key at `handle`.
    async fn encrypt(&self, handle: &str, plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Decrypt `ciphertext` using the HSM-resident key at `handle`.
    async fn decrypt(&self, handle: &str, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>>;

    /// Fetch metadata about a key without exposing its material.
    async fn get_key_info(&self, handle: &str) -> Result<HsmKeyInfo>;

    /// List every key handle the HSM currently holds.
    async fn list_keys(&self) -> Result<Vec<String>>;

    /// Lightweight liveness check, used by the circuit breaker and by monitoring.
    async fn health_check(&self) -> Result<()>;

    /// The security level this provider's key storage is trusted at.
    /// Migration refuses to move material to a provider ranked below the source.
    fn security_level(&self) -> SecurityLevel;
}

//! Domain error taxonomy for the credential store core.
//!
//! Wraps [`credential_common::PlatformError`] and adds every failure kind a
//! caller of this core can observe. Cryptographic failures never leak
//! internal detail: a tamper, a bad tag, or a short key all surface as
//! [`Error::IntegrityFailure`] or [`Error::InvalidInput`] with a generic
//! message, and the specifics go only to tracing and the audit chain.

use credential_common::PlatformError;
use thiserror::Error;

/// Errors surfaced by every subsystem of the credential store core.
#[derive(Error, Debug)]
pub enum Error {
    /// Infrastructure-level failure (circuit open, unavailable, rate limited).
    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),

    /// A caller-supplied argument violates a documented precondition.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// No key exists with the given identifier.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// The key exists but is not in a usable state (destroyed, pending activation).
    #[error("key unavailable: {0}")]
    KeyUnavailable(String),

    /// Authenticated decryption failed: tampered ciphertext, wrong key, or corrupt tag.
    #[error("integrity check failed")]
    IntegrityFailure,

    /// A payload's recorded algorithm does not match the engine decrypting it.
    #[error("algorithm mismatch: payload was sealed with {actual}, engine expects {expected}")]
    AlgorithmMismatch {
        /// Algorithm identifier the engine requires.
        expected: String,
        /// Algorithm identifier recorded on the payload.
        actual: String,
    },

    /// A rotation is already running for this key.
    #[error("rotation already in progress for key {0}")]
    RotationInProgress(String),

    /// A rotation attempt failed partway through and was rolled back.
    #[error("rotation failed: {0}")]
    RotationFailed(String),

    /// The nonce ledger for a key has exhausted its tracked-nonce budget.
    #[error("nonce space exhausted for key {0}")]
    NonceExhaustion(String),

    /// The HSM provider reported a failure.
    #[error("hsm error: {0}")]
    HSMError(String),

    /// A requested operation violates the active rotation/compliance policy.
    #[error("policy violation: {0}")]
    PolicyViolation(String),

    /// Unclassified internal failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns true if retrying the same operation might succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Platform(e) => e.is_retryable(),
            Self::HSMError(_) => true,
            Self::RotationInProgress(_) => true,
            _ => false,
        }
    }

    /// Build an invalid-input error.
    #[must_use]
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Build a key-not-found error.
    #[must_use]
    pub fn key_not_found(key_id: impl Into<String>) -> Self {
        Self::KeyNotFound(key_id.into())
    }

    /// Build a key-unavailable error.
    #[must_use]
    pub fn key_unavailable(msg: impl Into<String>) -> Self {
        Self::KeyUnavailable(msg.into())
    }

    /// Build a rotation-failed error.
    #[must_use]
    pub fn rotation_failed(msg: impl Into<String>) -> Self {
        Self::RotationFailed(msg.into())
    }

    /// Build an HSM error.
    #[must_use]
    pub fn hsm(msg: impl Into<String>) -> Self {
        Self::HSMError(msg.into())
    }

    /// Build a policy-violation error.
    #[must_use]
    pub fn policy_violation(msg: impl Into<String>) -> Self {
        Self::PolicyViolation(msg.into())
    }

    /// Build an internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::hsm("timeout").is_retryable());
        assert!(Error::RotationInProgress("key-1".to_string()).is_retryable());
        assert!(!Error::IntegrityFailure.is_retryable());
        assert!(!Error::key_not_found("key-1").is_retryable());
    }

    #[test]
    fn test_error_messages_do_not_expose_key_material() {
        // Even when constructed with a message that happens to mention
        // internal detail, the taxonomy's generic variants (IntegrityFailure)
        // never carry caller-controlled text.
        let err = Error::IntegrityFailure;
        let text = err.to_string();
        assert!(!text.contains("plaintext"));
        assert!(!text.contains("nonce"));
    }
}

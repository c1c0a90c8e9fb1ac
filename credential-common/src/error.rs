//! Infrastructure-level error type shared by every subsystem.
//!
//! This is the lower layer in a two-layer error design: `credential-core`
//! wraps `PlatformError` inside its own domain error and adds the
//! cryptographic/lifecycle error kinds on top.

use thiserror::Error;

/// Infrastructure error shared across subsystems.
///
/// All variants are classified as retryable or non-retryable so callers
/// (the rotation scheduler, the HSM client) can decide whether to retry.
#[derive(Error, Debug)]
pub enum PlatformError {
    /// Circuit breaker is open for the named dependency.
    #[error("Circuit breaker open for {service}")]
    CircuitOpen {
        /// Name of the dependency the circuit is guarding.
        service: String,
    },

    /// Dependency is temporarily unavailable.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Rate limit exceeded.
    #[error("Rate limited")]
    RateLimited,

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Operation timed out.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Internal error with no more specific classification.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PlatformError {
    /// Returns true if this failure is transient and worth retrying.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_) | Self::RateLimited | Self::Timeout(_) | Self::CircuitOpen { .. }
        )
    }

    /// Build a circuit-open error for `service`.
    #[must_use]
    pub fn circuit_open(service: impl Into<String>) -> Self {
        Self::CircuitOpen {
            service: service.into(),
        }
    }

    /// Build an unavailable error.
    #[must_use]
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Build an invalid-input error.
    #[must_use]
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}

//! Cross-cutting concerns shared by every `credential-core` subsystem.
//!
//! This crate provides:
//! - An infrastructure error type with retryability classification
//! - A circuit breaker for guarding calls into HSM providers
//! - A retry policy with exponential backoff
//! - Structured logging setup
//! - Prometheus-style metric primitives

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod circuit_breaker;
pub mod error;
pub mod metrics;
pub mod retry;
pub mod tracing_config;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use error::PlatformError;
pub use metrics::{Counter, Gauge, Histogram};
pub use retry::{RetryConfig, RetryPolicy};
pub use tracing_config::{init_tracing, TracingConfig};

//! Tamper-evident audit chain.

pub mod chain;

pub use chain::{AuditChain, AuditEventType, AuditRecord};

//! Authenticated encryption: AES-256-GCM with per-key nonce tracking.

pub mod engine;
pub mod nonce_ledger;
pub mod secure_memory;

pub use engine::{AeadEngine, EncryptedPayload, MAX_OPERATIONS_PER_KEY};
pub use nonce_ledger::NonceLedger;
pub use secure_memory::SecretKey;

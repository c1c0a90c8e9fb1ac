//! Tamper-evident audit log: every state-changing operation appends a
//! record whose hash commits to the previous record's hash, so any
//! insertion, deletion, or edit breaks the chain at a detectable point.
//!
//! A single mutex guards every append so records stay strictly ordered and
//! causally linked; a chain append never happens concurrently with another.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::error::{Error, Result};

/// The kind of state-changing event an [`AuditRecord`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditEventType {
    /// A key was created.
    KeyCreated,
    /// A key version's material was unwrapped for use.
    KeyUsed,
    /// A key version was rotated.
    KeyRotated,
    /// A rotation attempt failed.
    KeyRotationFailed,
    /// A key was revoked.
    KeyRevoked,
    /// An encrypt or decrypt operation's integrity check failed.
    IntegrityFailure,
    /// A key was migrated between HSM providers.
    KeyMigrated,
    /// A rotation policy was created or changed.
    PolicyChanged,
    /// An alert fired.
    AlertRaised,
}

/// One entry in the audit chain.
///
/// Never carries key material, plaintext, or passwords — callers are
/// expected to pass only a `description` and non-sensitive `metadata`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Monotonically increasing sequence number, also this record's index in the chain.
    pub id: u64,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// What kind of event this is.
    pub event_type: AuditEventType,
    /// The key this event concerns, if any.
    pub key_id: Option<String>,
    /// The principal that performed the action, if known.
    pub actor: Option<String>,
    /// Human-readable, non-sensitive description.
    pub description: String,
    /// Structured, non-sensitive metadata as a JSON value.
    pub metadata: serde_json::Value,
    /// Hash of the record immediately before this one (or all-zero for the first record).
    pub prev_hash: [u8; 32],
    /// `SHA-256(prev_hash || canonical_json(self without record_hash))`.
    pub record_hash: [u8; 32],
}

impl AuditRecord {
    /// Canonical byte representation used for hashing: fields in a fixed,
    /// explicit order rather than `serde_json`'s incidental map ordering, so
    /// `record_hash` stays stable across Rust/serde_json versions.
    fn canonical_bytes(
        id: u64,
        timestamp: DateTime<Utc>,
        event_type: AuditEventType,
        key_id: Option<&str>,
        actor: Option<&str>,
        description: &str,
        metadata: &serde_json::Value,
        prev_hash: &[u8; 32],
    ) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&id.to_be_bytes());
        buf.extend_from_slice(timestamp.to_rfc3339().as_bytes());
        buf.push(0);
        buf.extend_from_slice(format!("{event_type:?}").as_bytes());
        buf.push(0);
        buf.extend_from_slice(key_id.unwrap_or("").as_bytes());
        buf.push(0);
        buf.extend_from_slice(actor.unwrap_or("").as_bytes());
        buf.push(0);
        buf.extend_from_slice(description.as_bytes());
        buf.push(0);
        buf.extend_from_slice(metadata.to_string().as_bytes());
        buf.push(0);
        buf.extend_from_slice(prev_hash);
        buf
    }
}

/// An append-only, hash-chained audit log.
pub struct AuditChain {
    records: Mutex<Vec<AuditRecord>>,
}

impl Default for AuditChain {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditChain {
    /// Create an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
        }
    }

    /// Append a new record, computing its hash from the current tail.
    pub async fn append(
        &self,
        event_type: AuditEventType,
        key_id: Option<String>,
        actor: Option<String>,
        description: String,
        metadata: serde_json::Value,
    ) -> AuditRecord {
        let mut records = self.records.lock().await;

        let id = records.len() as u64;
        let timestamp = Utc::now();
        let prev_hash = records.last().map_or([0u8; 32], |r| r.record_hash);

        let bytes = AuditRecord::canonical_bytes(
            id,
            timestamp,
            event_type,
            key_id.as_deref(),
            actor.as_deref(),
            &description,
            &metadata,
            &prev_hash,
        );
        let record_hash: [u8; 32] = Sha256::digest(&bytes).into();

        let record = AuditRecord {
            id,
            timestamp,
            event_type,
            key_id,
            actor,
            description,
            metadata,
            prev_hash,
            record_hash,
        };
        records.push(record.clone());
        record
    }

    /// Walk the chain and recompute every hash, returning `Ok(())` if every
    /// link matches or [`Error::IntegrityFailure`] at the first break.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IntegrityFailure`] if any record's stored hash does
    /// not match its recomputed hash, or if `prev_hash` does not match the
    /// previous record's `record_hash`.
    pub async fn verify(&self) -> Result<()> {
        let records = self.records.lock().await;
        let mut expected_prev = [0u8; 32];

        for record in records.iter() {
            if record.prev_hash != expected_prev {
                return Err(Error::IntegrityFailure);
            }

            let bytes = AuditRecord::canonical_bytes(
                record.id,
                record.timestamp,
                record.event_type,
                record.key_id.as_deref(),
                record.actor.as_deref(),
                &record.description,
                &record.metadata,
                &record.prev_hash,
            );
            let recomputed: [u8; 32] = Sha256::digest(&bytes).into();
            if recomputed != record.record_hash {
                return Err(Error::IntegrityFailure);
            }

            expected_prev = record.record_hash;
        }

        Ok(())
    }

    /// Records for a specific key, oldest first.
    pub async fn by_key(&self, key_id: &str) -> Vec<AuditRecord> {
        self.records
            .lock()
            .await
            .iter()
            .filter(|r| r.key_id.as_deref() == Some(key_id))
            .cloned()
            .collect()
    }

    /// Records of a specific event type, oldest first.
    pub async fn by_event_type(&self, event_type: AuditEventType) -> Vec<AuditRecord> {
        self.records
            .lock()
            .await
            .iter()
            .filter(|r| r.event_type == event_type)
            .cloned()
            .collect()
    }

    /// Records within `[start, end]`, inclusive, oldest first.
    pub async fn by_time_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<AuditRecord> {
        self.records
            .lock()
            .await
            .iter()
            .filter(|r| r.timestamp >= start && r.timestamp <= end)
            .cloned()
            .collect()
    }

    /// Number of records currently in the chain.
    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    /// Whether the chain has no records.
    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

impl fmt::Debug for AuditChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditChain").finish_non_exhaustive()
    }
}

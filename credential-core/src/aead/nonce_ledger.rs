//! Per-key tracking of issued AEAD nonces.
//!
//! Generalizes the JTI replay cache pattern (a `HashSet` behind an async
//! `RwLock`, pruned by age) from a single global set to one set per
//! `key_id`, since nonce uniqueness is only meaningful within the scope of
//! a single key.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::error::{Error, Result};

struct PerKeyLedger {
    inserted_at: HashMap<[u8; 12], Instant>,
    order: VecDeque<[u8; 12]>,
}

impl PerKeyLedger {
    fn new() -> Self {
        Self {
            inserted_at: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn prune_expired(&mut self, retention: Duration) {
        while let Some(front) = self.order.front() {
            match self.inserted_at.get(front) {
                Some(ts) if ts.elapsed() >= retention => {
                    let nonce = self.order.pop_front().expect("checked by front()");
                    self.inserted_at.remove(&nonce);
                }
                _ => break,
            }
        }
    }
}

/// Tracks issued nonces per key so the AEAD engine can detect and refuse reuse.
pub struct NonceLedger {
    ledgers: RwLock<HashMap<String, PerKeyLedger>>,
    max_tracked_per_key: u64,
    retention: Duration,
}

impl NonceLedger {
    /// Create a ledger with the given per-key capacity and retention window.
    #[must_use]
    pub fn new(max_tracked_per_key: u64, retention_hours: u64) -> Self {
        Self {
            ledgers: RwLock::new(HashMap::new()),
            max_tracked_per_key,
            retention: Duration::from_secs(retention_hours * 3600),
        }
    }

    /// Attempt to record a newly generated nonce for `key_id`.
    ///
    /// Returns `Ok(true)` if the nonce was new and is now tracked, `Ok(false)`
    /// if it collided with a still-retained nonce for the same key (the
    /// caller should draw a fresh nonce and retry). Returns
    /// [`Error::NonceExhaustion`] if the key's tracked-nonce budget is full
    /// even after pruning expired entries — the key must be rotated before
    /// further encryptions are accepted.
    pub async fn try_record(&self, key_id: &str, nonce: [u8; 12]) -> Result<bool> {
        let mut ledgers = self.ledgers.write().await;
        let ledger = ledgers.entry(key_id.to_string()).or_insert_with(PerKeyLedger::new);

        ledger.prune_expired(self.retention);

        if ledger.inserted_at.contains_key(&nonce) {
            return Ok(false);
        }

        if ledger.inserted_at.len() as u64 >= self.max_tracked_per_key {
            return Err(Error::NonceExhaustion(key_id.to_string()));
        }

        ledger.inserted_at.insert(nonce, Instant::now());
        ledger.order.push_back(nonce);
        Ok(true)
    }

    /// Number of nonces currently tracked for `key_id`.
    pub async fn tracked_count(&self, key_id: &str) -> u64 {
        let ledgers = self.ledgers.read().await;
        ledgers.get(key_id).map_or(0, |l| l.inserted_at.len() as u64)
    }

    /// Drop all tracked nonces for `key_id`, e.g. after a successful rotation
    /// retires the old key version entirely.
    pub async fn clear_key(&self, key_id: &str) {
        self.ledgers.write().await.remove(key_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_nonce_is_recorded() {
        let ledger = NonceLedger::new(10, 24);
        assert!(ledger.try_record("key-1", [1u8; 12]).await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_nonce_is_rejected() {
        let ledger = NonceLedger::new(10, 24);
        assert!(ledger.try_record("key-1", [1u8; 12]).await.unwrap());
        assert!(!ledger.try_record("key-1", [1u8; 12]).await.unwrap());
    }

    #[tokio::test]
    async fn test_same_nonce_different_keys_does_not_collide() {
        let ledger = NonceLedger::new(10, 24);
        assert!(ledger.try_record("key-1", [1u8; 12]).await.unwrap());
        assert!(ledger.try_record("key-2", [1u8; 12]).await.unwrap());
    }

    #[tokio::test]
    async fn test_exhaustion_once_capacity_is_reached() {
        let ledger = NonceLedger::new(2, 24);
        assert!(ledger.try_record("key-1", [1u8; 12]).await.unwrap());
        assert!(ledger.try_record("key-1", [2u8; 12]).await.unwrap());

        let result = ledger.try_record("key-1", [3u8; 12]).await;
        assert!(matches!(result, Err(Error::NonceExhaustion(k)) if k == "key-1"));
    }

    #[tokio::test]
    async fn test_clear_key_resets_tracked_count() {
        let ledger = NonceLedger::new(10, 24);
        ledger.try_record("key-1", [1u8; 12]).await.unwrap();
        assert_eq!(ledger.tracked_count("key-1").await, 1);
        ledger.clear_key("key-1").await;
        assert_eq!(ledger.tracked_count("key-1").await, 0);
    }
}

//! In-process cache of decrypted key material, to avoid re-unwrapping on
//! every AEAD operation while still bounding how long plaintext key bytes
//! stay resident.
//!
//! Generalizes the LRU-plus-TTL-revalidation pattern used for cached key
//! metadata in `services/token/src/crypto/client.rs`.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::aead::SecretKey;

struct CachedEntry {
    material: SecretKey,
    material_digest: [u8; 32],
    cached_at: Instant,
}

/// Caches unwrapped key material keyed by `"{key_id}:{version}"`.
pub struct KeyCache {
    entries: Mutex<LruCache<String, CachedEntry>>,
    ttl: Duration,
}

impl KeyCache {
    /// Build a cache with the given TTL and a fixed entry capacity.
    #[must_use]
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity clamped to at least 1");
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Retrieve cached material for `key_id`/`version` if present, not
    /// expired, and whose digest still matches what was cached: an entry
    /// whose stored bytes no longer hash to the digest recorded at `put`
    /// time is treated as corrupted and evicted rather than returned.
    pub async fn get(&self, key_id: &str, version: u32) -> Option<SecretKey> {
        let cache_key = Self::cache_key(key_id, version);
        let mut entries = self.entries.lock().await;

        match entries.get(&cache_key) {
            Some(entry) if entry.cached_at.elapsed() < self.ttl => {
                let recomputed: [u8; 32] = Sha256::digest(entry.material.as_ref()).into();
                if recomputed == entry.material_digest {
                    Some(entry.material.clone())
                } else {
                    entries.pop(&cache_key);
                    None
                }
            }
            Some(_) => {
                entries.pop(&cache_key);
                None
            }
            None => None,
        }
    }

    /// Insert freshly unwrapped material into the cache, recording its
    /// digest so a later [`Self::get`] can detect in-memory corruption.
    pub async fn put(&self, key_id: &str, version: u32, material: SecretKey, material_digest: [u8; 32]) {
        let cache_key = Self::cache_key(key_id, version);
        self.entries.lock().await.put(
            cache_key,
            CachedEntry {
                material,
                material_digest,
                cached_at: Instant::now(),
            },
        );
    }

    /// Evict every cached version of `key_id`, e.g. once a rotation completes
    /// and the previously cached plaintext for the new version should be
    /// re-derived from the freshly wrapped material rather than trusted blindly.
    pub async fn invalidate_key(&self, key_id: &str) {
        let mut entries = self.entries.lock().await;
        let stale: Vec<String> = entries
            .iter()
            .map(|(k, _)| k.clone())
            .filter(|k| k.starts_with(&format!("{key_id}:")))
            .collect();
        for key in stale {
            entries.pop(&key);
        }
    }

    fn cache_key(key_id: &str, version: u32) -> String {
        format!("{key_id}:{version}")
    }
}

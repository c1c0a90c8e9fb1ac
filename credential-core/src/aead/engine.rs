//! AES-256-GCM authenticated encryption.
//!
//! Generalizes the local AES-256-GCM path from a crypto-service fallback
//! path into this core's only encryption path: there is no remote crypto
//! service to fall back from here, the HSM abstraction (see `crate::hsm`)
//! is a separate concern that wraps/unwraps data-encryption keys, not bulk
//! ciphertext.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use zeroize::Zeroizing;

use crate::aead::nonce_ledger::NonceLedger;
use crate::aead::secure_memory::SecretKey;
use crate::error::{Error, Result};

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const MAX_NONCE_RETRIES: u32 = 8;

/// Identifier this engine stamps on every payload it produces and requires
/// on every payload it is asked to decrypt.
pub const ALGORITHM: &str = "AES-256-GCM";

/// NIST SP 800-38D's bound on plaintext processed under a single AES-GCM
/// invocation: 2^39 - 256 bits, i.e. 2^36 - 32 bytes; kept one byte under
/// that here to leave room for an internal length-prefix byte some callers
/// add before framing, matching the stricter bound some implementations use.
pub const MAX_PLAINTEXT_LEN: u64 = (1u64 << 36) - 31;

/// NIST SP 800-38D's bound on associated data per invocation: 2^61 - 1 bytes.
pub const MAX_AAD_LEN: u64 = (1u64 << 61) - 1;

/// Upper bound on AEAD operations performed under one key version before
/// the engine refuses further use and the caller must rotate.
pub const MAX_OPERATIONS_PER_KEY: u64 = 1 << 32;

/// Self-describing AEAD ciphertext: everything `decrypt` needs besides the
/// key material and any associated data the caller supplies out of band.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedPayload {
    /// Identifier of the key (and implicitly the key version) used to encrypt.
    pub key_id: String,
    /// Which version of `key_id` encrypted this payload, needed to select
    /// the right unwrapped material on decrypt after the key has rotated.
    pub key_version: u32,
    /// Algorithm identifier this payload was sealed under, checked against
    /// the decrypting engine's own identifier before the cipher even runs.
    pub algorithm: String,
    /// 96-bit nonce used for this operation. Never reused under the same key.
    pub nonce: [u8; NONCE_LEN],
    /// Ciphertext, excluding the authentication tag.
    pub ciphertext: Vec<u8>,
    /// 128-bit GCM authentication tag.
    pub tag: [u8; TAG_LEN],
}

impl EncryptedPayload {
    /// Concatenate ciphertext and tag into the wire format (`ciphertext || tag`).
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.ciphertext.len() + TAG_LEN);
        out.extend_from_slice(&self.ciphertext);
        out.extend_from_slice(&self.tag);
        out
    }
}

/// Performs AES-256-GCM encrypt/decrypt for the key lifecycle manager, with
/// per-key nonce uniqueness enforcement and usage-count tracking.
pub struct AeadEngine {
    nonce_ledger: NonceLedger,
    usage_counters: RwLock<HashMap<String, AtomicU64>>,
}

impl AeadEngine {
    /// Build an engine backed by a nonce ledger with the given per-key
    /// capacity and retention window (hours).
    #[must_use]
    pub fn new(max_tracked_nonces_per_key: u64, nonce_retention_hours: u64) -> Self {
        Self {
            nonce_ledger: NonceLedger::new(max_tracked_nonces_per_key, nonce_retention_hours),
            usage_counters: RwLock::new(HashMap::new()),
        }
    }

    /// Encrypt `plaintext` under `key`, recording the generated nonce in the ledger.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `plaintext` exceeds
    /// [`MAX_PLAINTEXT_LEN`] or `aad` exceeds [`MAX_AAD_LEN`],
    /// [`Error::NonceExhaustion`] if a unique nonce cannot be drawn within a
    /// bounded number of attempts, or [`Error::KeyUnavailable`] if the key
    /// has exceeded [`MAX_OPERATIONS_PER_KEY`] and must be rotated before
    /// further use.
    pub async fn encrypt(
        &self,
        key_id: &str,
        key_version: u32,
        key: &SecretKey,
        plaintext: &[u8],
        aad: Option<&[u8]>,
    ) -> Result<EncryptedPayload> {
        Self::check_sizes(plaintext, aad)?;
        self.check_and_bump_usage(key_id).await?;

        let cipher = Aes256Gcm::new_from_slice(key.as_ref())
            .map_err(|e| Error::internal(format!("cipher init: {e}")))?;

        let mut attempts = 0;
        let nonce_bytes = loop {
            let mut candidate = [0u8; NONCE_LEN];
            rand::thread_rng().fill_bytes(&mut candidate);

            if self.nonce_ledger.try_record(key_id, candidate).await? {
                break candidate;
            }

            attempts += 1;
            if attempts >= MAX_NONCE_RETRIES {
                return Err(Error::NonceExhaustion(key_id.to_string()));
            }
        };

        let nonce = Nonce::from_slice(&nonce_bytes);
        let sealed = match aad {
            Some(aad) => cipher.encrypt(
                nonce,
                Payload {
                    msg: plaintext,
                    aad,
                },
            ),
            None => cipher.encrypt(nonce, plaintext),
        }
        .map_err(|_| Error::IntegrityFailure)?;

        let split_at = sealed.len().saturating_sub(TAG_LEN);
        let (ciphertext, tag_slice) = sealed.split_at(split_at);
        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(tag_slice);

        Ok(EncryptedPayload {
            key_id: key_id.to_string(),
            key_version,
            algorithm: ALGORITHM.to_string(),
            nonce: nonce_bytes,
            ciphertext: ciphertext.to_vec(),
            tag,
        })
    }

    /// Decrypt a payload previously produced by [`Self::encrypt`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlgorithmMismatch`] if `payload.algorithm` does not
    /// match [`ALGORITHM`], or [`Error::IntegrityFailure`] for any tamper,
    /// wrong key, or mismatched associated data — never a more specific
    /// diagnosis for those.
    pub async fn decrypt(
        &self,
        key: &SecretKey,
        payload: &EncryptedPayload,
        aad: Option<&[u8]>,
    ) -> Result<Zeroizing<Vec<u8>>> {
        if payload.algorithm != ALGORITHM {
            return Err(Error::AlgorithmMismatch {
                expected: ALGORITHM.to_string(),
                actual: payload.algorithm.clone(),
            });
        }

        let cipher = Aes256Gcm::new_from_slice(key.as_ref())
            .map_err(|e| Error::internal(format!("cipher init: {e}")))?;

        let mut combined = Vec::with_capacity(payload.ciphertext.len() + TAG_LEN);
        combined.extend_from_slice(&payload.ciphertext);
        combined.extend_from_slice(&payload.tag);

        let nonce = Nonce::from_slice(&payload.nonce);
        let plaintext = match aad {
            Some(aad) => cipher.decrypt(
                nonce,
                Payload {
                    msg: &combined,
                    aad,
                },
            ),
            None => cipher.decrypt(nonce, combined.as_slice()),
        }
        .map_err(|_| Error::IntegrityFailure)?;

        Ok(Zeroizing::new(plaintext))
    }

    /// Generate a fresh 256-bit key for a rotation.
    #[must_use]
    pub fn rotate_key(&self) -> SecretKey {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Zeroizing::new(bytes)
    }

    /// Validate that `key` is structurally usable: exactly 32 bytes, with
    /// enough byte diversity and Shannon entropy that it is plausibly random
    /// rather than a low-effort placeholder.
    ///
    /// Two independent checks, since either alone lets weak material
    /// through: a key with only 2 distinct byte values (e.g. sixteen `0x00`
    /// bytes followed by sixteen `0xFF` bytes) carries only 1 bit of
    /// per-byte entropy and fails the distinct-byte floor even though it is
    /// not a single repeated byte; a key with many distinct values arranged
    /// in a predictable pattern could still pass a distinct-count check
    /// alone, so entropy is checked too.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the length, distinct-byte-count,
    /// or entropy check fails.
    pub fn validate_key_strength(key: &[u8]) -> Result<()> {
        if key.len() != 32 {
            return Err(Error::invalid_input("key must be exactly 32 bytes"));
        }

        let mut histogram = [0u32; 256];
        for &byte in key {
            histogram[byte as usize] += 1;
        }
        let distinct = histogram.iter().filter(|&&count| count > 0).count();

        const MIN_DISTINCT_BYTES: usize = 4;
        if distinct < MIN_DISTINCT_BYTES {
            return Err(Error::invalid_input(
                "key material has too few distinct byte values",
            ));
        }

        let len = key.len() as f64;
        let entropy: f64 = histogram
            .iter()
            .filter(|&&count| count > 0)
            .map(|&count| {
                let p = f64::from(count) / len;
                -p * p.log2()
            })
            .sum();

        const MIN_ENTROPY_BITS: f64 = 2.5;
        if entropy < MIN_ENTROPY_BITS {
            return Err(Error::invalid_input("key material has insufficient entropy"));
        }

        Ok(())
    }

    /// Wrap `material` (a child key's raw bytes) under `wrapping_key` using
    /// AES-256-GCM with no associated data, for the KEK/DEK tree's
    /// key-wraps-key step — distinct from [`Self::encrypt`], which wraps
    /// bulk application data and goes through the nonce ledger and usage
    /// counters. A wrapping operation happens at most once per rotation, so
    /// a fresh random nonce per call needs no uniqueness ledger.
    ///
    /// Wire format: `nonce (12 bytes) || ciphertext || tag (16 bytes)`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::internal`] if the cipher cannot be initialized from
    /// `wrapping_key`.
    pub fn wrap_key(wrapping_key: &SecretKey, material: &[u8]) -> Result<Vec<u8>> {
        let cipher = Aes256Gcm::new_from_slice(wrapping_key.as_ref())
            .map_err(|e| Error::internal(format!("cipher init: {e}")))?;
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let sealed = cipher
            .encrypt(nonce, material)
            .map_err(|_| Error::IntegrityFailure)?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    /// Reverse of [`Self::wrap_key`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::IntegrityFailure`] if `wrapped` is too short to
    /// contain a nonce and tag, or if authentication fails.
    pub fn unwrap_key(wrapping_key: &SecretKey, wrapped: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        if wrapped.len() < NONCE_LEN + TAG_LEN {
            return Err(Error::IntegrityFailure);
        }
        let (nonce_bytes, sealed) = wrapped.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new_from_slice(wrapping_key.as_ref())
            .map_err(|e| Error::internal(format!("cipher init: {e}")))?;
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = cipher
            .decrypt(nonce, sealed)
            .map_err(|_| Error::IntegrityFailure)?;
        Ok(Zeroizing::new(plaintext))
    }

    fn check_sizes(plaintext: &[u8], aad: Option<&[u8]>) -> Result<()> {
        if plaintext.len() as u64 > MAX_PLAINTEXT_LEN {
            return Err(Error::invalid_input(format!(
                "plaintext of {} bytes exceeds the {MAX_PLAINTEXT_LEN}-byte AEAD limit",
                plaintext.len()
            )));
        }
        if let Some(aad) = aad {
            if aad.len() as u64 > MAX_AAD_LEN {
                return Err(Error::invalid_input(format!(
                    "associated data of {} bytes exceeds the {MAX_AAD_LEN}-byte AEAD limit",
                    aad.len()
                )));
            }
        }
        Ok(())
    }

    /// Forget usage and nonce tracking for a key, e.g. after it is fully
    /// rotated out and its old version destroyed.
    pub async fn retire_key(&self, key_id: &str) {
        self.nonce_ledger.clear_key(key_id).await;
        self.usage_counters.write().await.remove(key_id);
    }

    async fn check_and_bump_usage(&self, key_id: &str) -> Result<()> {
        let counters = self.usage_counters.read().await;
        if let Some(counter) = counters.get(key_id) {
            let previous = counter.fetch_add(1, Ordering::SeqCst);
            if previous >= MAX_OPERATIONS_PER_KEY {
                return Err(Error::key_unavailable(format!(
                    "key {key_id} has reached its operation limit and must be rotated"
                )));
            }
            return Ok(());
        }
        drop(counters);

        let mut counters = self.usage_counters.write().await;
        counters
            .entry(key_id.to_string())
            .or_insert_with(|| AtomicU64::new(1));
        Ok(())
    }
}

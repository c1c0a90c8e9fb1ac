//! In-process HSM simulator, used for local development and the test suite.
//!
//! This is the only provider that honors `export_key`: a real HSM would
//! refuse to let non-extractable key material leave the device.

use std::collections::HashMap;

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use async_trait::async_trait;
use rand::RngCore;
use tokio::sync::RwLock;
use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::hsm::provider::{HsmKeyInfo, HsmProvider};
use crate::tls::SecurityLevel;

struct SimulatedKey {
    material: Zeroizing<[u8; 32]>,
    enabled: bool,
}

/// Software-only `HsmProvider` backed by an in-memory key table, encrypting
/// with the same AES-256-GCM primitive a real HSM would use internally.
#[derive(Default)]
pub struct SoftwareSimulator {
    keys: RwLock<HashMap<String, SimulatedKey>>,
}

impl SoftwareSimulator {
    /// Create an empty simulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HsmProvider for SoftwareSimulator {
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn authenticate(&self) -> Result<()> {
        Ok(())
    }

    async fn generate_key(&self, label: &str, size_bits: u32) -> Result<String> {
        if size_bits != 256 {
            return Err(Error::invalid_input("simulator only supports 256-bit keys"));
        }
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let handle = format!("sim:{label}");
        self.keys.write().await.insert(
            handle.clone(),
            SimulatedKey {
                material: Zeroizing::new(bytes),
                enabled: true,
            },
        );
        Ok(handle)
    }

    async fn import_key(&self, label: &str, material: &[u8]) -> Result<String> {
        let bytes: [u8; 32] = material
            .try_into()
            .map_err(|_| Error::invalid_input("import material must be 32 bytes"))?;
        let handle = format!("sim:{label}");
        self.keys.write().await.insert(
            handle.clone(),
            SimulatedKey {
                material: Zeroizing::new(bytes),
                enabled: true,
            },
        );
        Ok(handle)
    }

    async fn export_key(&self, handle: &str) -> Result<Zeroizing<Vec<u8>>> {
        let keys = self.keys.read().await;
        let key = keys
            .get(handle)
            .ok_or_else(|| Error::key_not_found(handle))?;
        Ok(Zeroizing::new(key.material.to_vec()))
    }

    async fn delete_key(&self, handle: &str) -> Result<()> {
        self.keys
            .write()
            .await
            .remove(handle)
            .map(|_| ())
            .ok_or_else(|| Error::key_not_found(handle))
    }

    async fn encrypt(&self, handle: &str, plaintext: &[u8]) -> Result<Vec<u8>> {
        let keys = self.keys.read().await;
        let key = keys
            .get(handle)
            .ok_or_else(|| Error::key_not_found(handle))?;
        if !key.enabled {
            return Err(Error::key_unavailable(handle));
        }

        let cipher = Aes256Gcm::new_from_slice(key.material.as_ref())
            .map_err(|e| Error::internal(format!("cipher init: {e}")))?;
        let mut nonce_bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let sealed = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| Error::IntegrityFailure)?;

        let mut out = Vec::with_capacity(12 + sealed.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    async fn decrypt(&self, handle: &str, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let keys = self.keys.read().await;
        let key = keys
            .get(handle)
            .ok_or_else(|| Error::key_not_found(handle))?;
        if !key.enabled {
            return Err(Error::key_unavailable(handle));
        }
        if ciphertext.len() < 12 {
            return Err(Error::IntegrityFailure);
        }

        let (nonce_bytes, sealed) = ciphertext.split_at(12);
        let cipher = Aes256Gcm::new_from_slice(key.material.as_ref())
            .map_err(|e| Error::internal(format!("cipher init: {e}")))?;
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = cipher
            .decrypt(nonce, sealed)
            .map_err(|_| Error::IntegrityFailure)?;
        Ok(Zeroizing::new(plaintext))
    }

    async fn get_key_info(&self, handle: &str) -> Result<HsmKeyInfo> {
        let keys = self.keys.read().await;
        let key = keys
            .get(handle)
            .ok_or_else(|| Error::key_not_found(handle))?;
        Ok(HsmKeyInfo {
            handle: handle.to_string(),
            size_bits: 256,
            enabled: key.enabled,
        })
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        Ok(self.keys.read().await.keys().cloned().collect())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    fn security_level(&self) -> SecurityLevel {
        // In-process software keys: no hardware boundary, no FIPS module.
        SecurityLevel::Medium
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_generate_encrypt_decrypt_roundtrip() {
        let sim = SoftwareSimulator::new();
        let handle = sim.generate_key("kek-1", 256).await.unwrap();

        let ciphertext = sim.encrypt(&handle, b"dek bytes").await.unwrap();
        let plaintext = sim.decrypt(&handle, &ciphertext).await.unwrap();

        assert_eq!(&plaintext[..], b"dek bytes");
    }

    #[tokio::test]
    async fn test_export_returns_generated_material() {
        let sim = SoftwareSimulator::new();
        let handle = sim.generate_key("kek-1", 256).await.unwrap();
        let exported = sim.export_key(&handle).await.unwrap();
        assert_eq!(exported.len(), 32);
    }

    #[tokio::test]
    async fn test_delete_then_operations_fail() {
        let sim = SoftwareSimulator::new();
        let handle = sim.generate_key("kek-1", 256).await.unwrap();
        sim.delete_key(&handle).await.unwrap();

        assert!(sim.encrypt(&handle, b"x").await.is_err());
        assert!(matches!(
            sim.get_key_info(&handle).await,
            Err(Error::KeyNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_keys() {
        let sim = SoftwareSimulator::new();
        sim.generate_key("a", 256).await.unwrap();
        sim.generate_key("b", 256).await.unwrap();
        let handles = sim.list_keys().await.unwrap();
        assert_eq!(handles.len(), 2);
    }
}

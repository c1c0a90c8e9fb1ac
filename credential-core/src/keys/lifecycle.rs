//! Creates, retrieves, rotates, and revokes keys.
//!
//! Rotation's mutual-exclusion pattern generalizes the per-resource mutex
//! used by `services/token/src/refresh/rotator.rs`: there, a family mutex
//! guards a single token family's rotation; here, each `key_id` gets its
//! own `tokio::sync::Mutex`, held only for the duration of one rotation, so
//! unrelated keys rotate fully in parallel.
//!
//! Keys form a tree: a `Dek`/`Tls`/`Backup` key is always wrapped by a
//! parent `Kek`, and a `Kek` is wrapped either by another `Kek` or, at the
//! root, directly by the HSM-resident key named at construction. Resolving
//! material for a non-root key means recursively resolving its parent's
//! material first and unwrapping through that, terminating at whichever
//! ancestor has no `parent_key_id`.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, RwLock};

use crate::aead::{AeadEngine, SecretKey};
use crate::audit::{AuditChain, AuditEventType};
use crate::error::{Error, Result};
use crate::hsm::{timed_operation, HsmProvider};
use crate::keys::cache::KeyCache;
use crate::keys::model::{Key, KeyOperation, KeyType, KeyVersion, KeyVersionStatus};
use crate::keys::store::{KeyFilter, KeyStore};

/// Creates, retrieves, rotates, and revokes keys, coordinating the AEAD
/// engine, the HSM-backed key-encryption key, the backing store, and the
/// audit chain.
pub struct KeyLifecycleManager {
    store: Arc<dyn KeyStore>,
    hsm: Arc<dyn HsmProvider>,
    aead: Arc<AeadEngine>,
    cache: KeyCache,
    kek_handle: String,
    audit: Arc<AuditChain>,
    rotation_locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

fn digest_of(material: &SecretKey) -> [u8; 32] {
    Sha256::digest(material.as_ref()).into()
}

impl KeyLifecycleManager {
    /// Build a manager. `kek_handle` names the HSM-resident key used to wrap
    /// every root key-encryption key this manager creates.
    #[must_use]
    pub fn new(
        store: Arc<dyn KeyStore>,
        hsm: Arc<dyn HsmProvider>,
        aead: Arc<AeadEngine>,
        kek_handle: String,
        cache_ttl: Duration,
        audit: Arc<AuditChain>,
    ) -> Self {
        Self {
            store,
            hsm,
            aead,
            cache: KeyCache::new(cache_ttl, 10_000),
            kek_handle,
            audit,
            rotation_locks: RwLock::new(HashMap::new()),
        }
    }

    /// The audit chain every mutation on this manager appends to.
    #[must_use]
    pub fn audit(&self) -> &Arc<AuditChain> {
        &self.audit
    }

    /// Create a new key with a single, active, version 1.
    ///
    /// A `Kek` with no `parent_key_id` is wrapped directly by the
    /// HSM-resident root key; every other key (including a non-root `Kek`)
    /// must name a `parent_key_id` pointing at an existing `Kek`-typed key,
    /// and is wrapped by that parent's current material instead.
    ///
    /// # Errors
    ///
    /// Returns [`Error::invalid_input`] if a non-root key omits
    /// `parent_key_id` or names a parent that is not a `Kek`,
    /// [`Error::KeyNotFound`] if the named parent does not exist,
    /// [`Error::HSMError`] if the root KEK fails to wrap the new key, or
    /// whatever error the store returns on write.
    pub async fn create_key(
        &self,
        key_id: &str,
        owner: &str,
        tags: Vec<String>,
        key_type: KeyType,
        parent_key_id: Option<String>,
    ) -> Result<Key> {
        if self.store.get(key_id).await?.is_some() {
            return Err(Error::invalid_input(format!("key {key_id} already exists")));
        }

        let dek = self.aead.rotate_key();
        let (wrapped_dek, wrapping_version) = match (&key_type, &parent_key_id) {
            (KeyType::Kek, None) => {
                let result = timed_operation(self.hsm.encrypt(&self.kek_handle, dek.as_ref())).await;
                (result.into_result()?, None)
            }
            (_, Some(parent_id)) => {
                let parent = self
                    .store
                    .get(parent_id)
                    .await?
                    .ok_or_else(|| Error::key_not_found(parent_id.clone()))?;
                if parent.key_type != KeyType::Kek {
                    return Err(Error::invalid_input(format!(
                        "{parent_id} is a {:?} key and cannot wrap other keys",
                        parent.key_type
                    )));
                }
                let parent_version = parent.current_version;
                let parent_material = self.get_key_material(parent_id, parent_version).await?;
                let wrapped = AeadEngine::wrap_key(&parent_material, dek.as_ref())?;
                (wrapped, Some(parent_version))
            }
            (_, None) => {
                return Err(Error::invalid_input(format!(
                    "{key_id} is a {key_type:?} key and must declare a parent_key_id naming a KEK"
                )));
            }
        };

        let material_digest = digest_of(&dek);
        let now = Utc::now();
        let version = KeyVersion {
            version: 1,
            status: KeyVersionStatus::Active,
            wrapped_dek,
            created_at: now,
            activated_at: Some(now),
            deprecated_at: None,
            destroyed_at: None,
            usage_count: 0,
            material_digest,
            wrapping_version,
        };

        let key = Key {
            key_id: key_id.to_string(),
            owner: owner.to_string(),
            key_type,
            parent_key_id,
            allowed_operations: vec![KeyOperation::Encrypt, KeyOperation::Decrypt],
            tags,
            current_version: 1,
            versions: vec![version],
            created_at: now,
        };

        self.store.put(key.clone()).await?;
        self.cache.put(key_id, 1, dek, material_digest).await;

        self.audit
            .append(
                AuditEventType::KeyCreated,
                Some(key_id.to_string()),
                Some(owner.to_string()),
                format!("key {key_id} created as {key_type:?}"),
                serde_json::json!({"key_type": format!("{key_type:?}")}),
            )
            .await;

        Ok(key)
    }

    /// Resolve a key version's plaintext material, decrypting through its
    /// wrapping chain on a cache miss: a root key unwraps via the
    /// HSM-resident key, every other key recursively resolves its parent's
    /// material first and unwraps through that. Boxed because the
    /// recursion depth is only known at runtime (the KEK/DEK tree's depth).
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyNotFound`] if the key or version does not exist,
    /// [`Error::KeyUnavailable`] if the version cannot decrypt (destroyed),
    /// or [`Error::IntegrityFailure`] if the unwrapped material's digest
    /// does not match what was recorded when this version was created.
    pub fn get_key_material<'a>(
        &'a self,
        key_id: &'a str,
        version: u32,
    ) -> Pin<Box<dyn Future<Output = Result<SecretKey>> + Send + 'a>> {
        Box::pin(async move {
            if let Some(material) = self.cache.get(key_id, version).await {
                return Ok(material);
            }

            let key = self
                .store
                .get(key_id)
                .await?
                .ok_or_else(|| Error::key_not_found(key_id))?;

            let key_version = key
                .version(version)
                .ok_or_else(|| Error::key_not_found(format!("{key_id}:v{version}")))?;

            if !key_version.status.can_decrypt() {
                return Err(Error::key_unavailable(format!(
                    "{key_id}:v{version} is {:?}",
                    key_version.status
                )));
            }

            let plaintext = match &key.parent_key_id {
                None => {
                    let result =
                        timed_operation(self.hsm.decrypt(&self.kek_handle, &key_version.wrapped_dek))
                            .await;
                    result.into_result()?
                }
                Some(parent_id) => {
                    let wrapping_version = key_version.wrapping_version.ok_or_else(|| {
                        Error::internal(format!(
                            "{key_id}:v{version} has a parent but no wrapping_version"
                        ))
                    })?;
                    let parent_material = self.get_key_material(parent_id, wrapping_version).await?;
                    AeadEngine::unwrap_key(&parent_material, &key_version.wrapped_dek)?
                }
            };

            let material: SecretKey = zeroize::Zeroizing::new(
                plaintext
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::internal("unwrapped DEK was not 32 bytes"))?,
            );

            let digest = digest_of(&material);
            if digest != key_version.material_digest {
                self.cache.invalidate_key(key_id).await;
                return Err(Error::IntegrityFailure);
            }

            self.audit
                .append(
                    AuditEventType::KeyUsed,
                    Some(key_id.to_string()),
                    None,
                    format!("material unwrapped for {key_id}:v{version}"),
                    serde_json::json!({"version": version}),
                )
                .await;

            self.cache.put(key_id, version, material.clone(), digest).await;
            Ok(material)
        })
    }

    /// Execute a rotation for `key_id`, creating a new active version and
    /// deprecating (not destroying) the previous one.
    ///
    /// Steps:
    /// 1. acquire the per-key rotation mutex — a second concurrent call
    ///    observes it already held and fails with [`Error::RotationInProgress`]
    /// 2. load the key and confirm it is not already mid-destruction
    /// 3. generate a new DEK and wrap it under the KEK
    /// 4. append the new version as `PendingActivation`
    /// 5. atomically flip the new version to `Active` and the old one to `Deprecated`
    /// 6. persist the updated key record
    /// 7. invalidate cached plaintext for the key and release the mutex
    ///
    /// # Errors
    ///
    /// Returns [`Error::RotationInProgress`] if a rotation for this key is
    /// already running, or [`Error::RotationFailed`] if any step after
    /// acquiring the lock fails.
    pub async fn rotate(&self, key_id: &str) -> Result<Key> {
        let lock = self.rotation_lock_for(key_id).await;
        let guard = lock
            .try_lock()
            .map_err(|_| Error::RotationInProgress(key_id.to_string()))?;

        let result = self.rotate_locked(key_id).await;
        if let Err(e) = &result {
            self.audit
                .append(
                    AuditEventType::KeyRotationFailed,
                    Some(key_id.to_string()),
                    None,
                    format!("rotation failed for {key_id}: {e}"),
                    serde_json::json!({}),
                )
                .await;
        }
        drop(guard);
        result
    }

    async fn rotate_locked(&self, key_id: &str) -> Result<Key> {
        let mut key = self
            .store
            .get(key_id)
            .await?
            .ok_or_else(|| Error::key_not_found(key_id))?;

        if key
            .versions
            .iter()
            .any(|v| v.status == KeyVersionStatus::PendingDestruction)
        {
            return Err(Error::rotation_failed(format!(
                "{key_id} has a version pending destruction"
            )));
        }

        let new_dek = self.aead.rotate_key();
        let (wrapped_dek, wrapping_version) = match &key.parent_key_id {
            None => {
                let result =
                    timed_operation(self.hsm.encrypt(&self.kek_handle, new_dek.as_ref())).await;
                (
                    result.into_result().map_err(|e| Error::rotation_failed(e.to_string()))?,
                    None,
                )
            }
            Some(parent_id) => {
                let parent = self
                    .store
                    .get(parent_id)
                    .await?
                    .ok_or_else(|| Error::key_not_found(parent_id.clone()))?;
                let parent_version = parent.current_version;
                let parent_material = self
                    .get_key_material(parent_id, parent_version)
                    .await
                    .map_err(|e| Error::rotation_failed(e.to_string()))?;
                let wrapped = AeadEngine::wrap_key(&parent_material, new_dek.as_ref())
                    .map_err(|e| Error::rotation_failed(e.to_string()))?;
                (wrapped, Some(parent_version))
            }
        };

        let material_digest = digest_of(&new_dek);
        let next_version_num = key.current_version + 1;
        let now = Utc::now();

        for existing in &mut key.versions {
            if existing.version == key.current_version && existing.status == KeyVersionStatus::Active {
                existing.status = KeyVersionStatus::Deprecated;
                existing.deprecated_at = Some(now);
            }
        }

        key.versions.push(KeyVersion {
            version: next_version_num,
            status: KeyVersionStatus::Active,
            wrapped_dek,
            created_at: now,
            activated_at: Some(now),
            deprecated_at: None,
            destroyed_at: None,
            usage_count: 0,
            material_digest,
            wrapping_version,
        });
        key.current_version = next_version_num;

        self.store.put(key.clone()).await?;
        self.cache.invalidate_key(key_id).await;
        self.cache
            .put(key_id, next_version_num, new_dek, material_digest)
            .await;

        self.audit
            .append(
                AuditEventType::KeyRotated,
                Some(key_id.to_string()),
                None,
                format!("{key_id} rotated to v{next_version_num}"),
                serde_json::json!({"new_version": next_version_num}),
            )
            .await;

        Ok(key)
    }

    /// Revoke a key: mark its current version `PendingDestruction`. Earlier
    /// versions remain decrypt-capable so already-encrypted data stays
    /// readable during the grace period; no version may encrypt anew.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyNotFound`] if the key does not exist.
    pub async fn revoke(&self, key_id: &str) -> Result<Key> {
        let mut key = self
            .store
            .get(key_id)
            .await?
            .ok_or_else(|| Error::key_not_found(key_id))?;

        for version in &mut key.versions {
            if version.status == KeyVersionStatus::Active {
                version.status = KeyVersionStatus::PendingDestruction;
            }
        }
        key.allowed_operations.retain(|op| *op != KeyOperation::Encrypt);

        self.store.put(key.clone()).await?;
        self.cache.invalidate_key(key_id).await;

        self.audit
            .append(
                AuditEventType::KeyRevoked,
                Some(key_id.to_string()),
                None,
                format!("{key_id} revoked"),
                serde_json::json!({}),
            )
            .await;

        Ok(key)
    }

    /// Complete destruction of a version already marked `PendingDestruction`:
    /// flip it to `Destroyed`, forget its cached/tracked material, and forget
    /// the AEAD engine's nonce and usage tracking for it. Irreversible.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyNotFound`] if the key or version does not exist,
    /// or [`Error::invalid_input`] if the version is not `PendingDestruction`.
    pub async fn destroy_version(&self, key_id: &str, version: u32) -> Result<Key> {
        let mut key = self
            .store
            .get(key_id)
            .await?
            .ok_or_else(|| Error::key_not_found(key_id))?;

        let target = key
            .versions
            .iter_mut()
            .find(|v| v.version == version)
            .ok_or_else(|| Error::key_not_found(format!("{key_id}:v{version}")))?;

        if target.status != KeyVersionStatus::PendingDestruction {
            return Err(Error::invalid_input(format!(
                "{key_id}:v{version} is {:?}, not pending destruction",
                target.status
            )));
        }

        target.status = KeyVersionStatus::Destroyed;
        target.destroyed_at = Some(Utc::now());

        self.store.put(key.clone()).await?;
        self.cache.invalidate_key(key_id).await;
        if key
            .versions
            .iter()
            .all(|v| v.status != KeyVersionStatus::Active)
        {
            self.aead.retire_key(key_id).await;
        }

        Ok(key)
    }

    /// List keys matching `filter`.
    ///
    /// # Errors
    ///
    /// Propagates whatever error the backing store returns.
    pub async fn list_keys(&self, filter: &KeyFilter) -> Result<Vec<Key>> {
        self.store.list(filter).await
    }

    async fn rotation_lock_for(&self, key_id: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.rotation_locks.read().await.get(key_id) {
            return lock.clone();
        }
        let mut locks = self.rotation_locks.write().await;
        locks
            .entry(key_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hsm::SoftwareSimulator;
    use crate::keys::store::InMemoryKeyStore;

    async fn manager() -> KeyLifecycleManager {
        let hsm: Arc<dyn HsmProvider> = Arc::new(SoftwareSimulator::new());
        let kek_handle = hsm.generate_key("root-kek", 256).await.unwrap();
        let store: Arc<dyn KeyStore> = Arc::new(InMemoryKeyStore::new());
        let aead = Arc::new(AeadEngine::new(1_000_000, 24));
        let audit = Arc::new(AuditChain::new());
        KeyLifecycleManager::new(store, hsm, aead, kek_handle, Duration::from_secs(300), audit)
    }

    /// Create a root KEK ("team-kek") under the manager's HSM-resident key,
    /// for tests that need a parent to hang a DEK off of.
    async fn create_root_kek(mgr: &KeyLifecycleManager) -> Key {
        mgr.create_key("team-kek", "platform-security", vec![], KeyType::Kek, None)
            .await
            .unwrap()
    }

    async fn create_dek(mgr: &KeyLifecycleManager, key_id: &str, owner: &str) -> Key {
        create_root_kek(mgr).await;
        mgr.create_key(
            key_id,
            owner,
            vec![],
            KeyType::Dek,
            Some("team-kek".to_string()),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_then_get_key_material() {
        let mgr = manager().await;
        create_dek(&mgr, "db-password", "billing-service").await;

        let material = mgr.get_key_material("db-password", 1).await.unwrap();
        assert_eq!(material.len(), 32);
    }

    #[tokio::test]
    async fn test_root_kek_has_no_parent() {
        let mgr = manager().await;
        let kek = create_root_kek(&mgr).await;
        assert_eq!(kek.key_type, KeyType::Kek);
        assert!(kek.parent_key_id.is_none());
    }

    #[tokio::test]
    async fn test_dek_without_parent_is_rejected() {
        let mgr = manager().await;
        let result = mgr
            .create_key("orphan-dek", "svc", vec![], KeyType::Dek, None)
            .await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_dek_parent_must_be_a_kek() {
        let mgr = manager().await;
        create_dek(&mgr, "leaf-dek", "svc").await;

        let result = mgr
            .create_key(
                "grandchild-dek",
                "svc",
                vec![],
                KeyType::Dek,
                Some("leaf-dek".to_string()),
            )
            .await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_nested_kek_unwraps_through_two_levels() {
        let mgr = manager().await;
        create_root_kek(&mgr).await;
        mgr.create_key(
            "team-sub-kek",
            "platform-security",
            vec![],
            KeyType::Kek,
            Some("team-kek".to_string()),
        )
        .await
        .unwrap();
        mgr.create_key(
            "nested-dek",
            "svc",
            vec![],
            KeyType::Dek,
            Some("team-sub-kek".to_string()),
        )
        .await
        .unwrap();

        let material = mgr.get_key_material("nested-dek", 1).await.unwrap();
        assert_eq!(material.len(), 32);
    }

    #[tokio::test]
    async fn test_create_key_twice_fails() {
        let mgr = manager().await;
        create_dek(&mgr, "db-password", "svc").await;
        let result = mgr
            .create_key(
                "db-password",
                "svc",
                vec![],
                KeyType::Dek,
                Some("team-kek".to_string()),
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_rotate_creates_new_active_version() {
        let mgr = manager().await;
        create_dek(&mgr, "db-password", "svc").await;

        let rotated = mgr.rotate("db-password").await.unwrap();

        assert_eq!(rotated.current_version, 2);
        assert!(rotated.has_single_current_version());
        assert_eq!(rotated.version(1).unwrap().status, KeyVersionStatus::Deprecated);
    }

    #[tokio::test]
    async fn test_rotated_out_version_still_decrypts() {
        let mgr = manager().await;
        create_dek(&mgr, "db-password", "svc").await;
        let v1_material = mgr.get_key_material("db-password", 1).await.unwrap();

        mgr.rotate("db-password").await.unwrap();

        let v1_after_rotation = mgr.get_key_material("db-password", 1).await.unwrap();
        assert_eq!(v1_material.as_ref(), v1_after_rotation.as_ref());
    }

    #[tokio::test]
    async fn test_concurrent_rotation_is_rejected() {
        let mgr = Arc::new(manager().await);
        create_dek(&mgr, "db-password", "svc").await;

        let lock = mgr.rotation_lock_for("db-password").await;
        let _held = lock.lock().await;

        let result = mgr.rotate("db-password").await;
        assert!(matches!(result, Err(Error::RotationInProgress(_))));
    }

    #[tokio::test]
    async fn test_revoke_prevents_new_encryption_but_keeps_decrypt() {
        let mgr = manager().await;
        create_dek(&mgr, "db-password", "svc").await;

        let revoked = mgr.revoke("db-password").await.unwrap();

        assert!(!revoked.allowed_operations.contains(&KeyOperation::Encrypt));
        assert_eq!(
            revoked.current().status,
            KeyVersionStatus::PendingDestruction
        );
        assert!(mgr.get_key_material("db-password", 1).await.is_ok());
    }

    #[tokio::test]
    async fn test_destroy_version_requires_pending_destruction() {
        let mgr = manager().await;
        create_dek(&mgr, "db-password", "svc").await;

        let result = mgr.destroy_version("db-password", 1).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_destroy_version_after_revoke() {
        let mgr = manager().await;
        create_dek(&mgr, "db-password", "svc").await;
        mgr.revoke("db-password").await.unwrap();

        let destroyed = mgr.destroy_version("db-password", 1).await.unwrap();

        assert_eq!(destroyed.version(1).unwrap().status, KeyVersionStatus::Destroyed);
        assert!(mgr.get_key_material("db-password", 1).await.is_err());
    }

    #[tokio::test]
    async fn test_create_and_rotate_append_audit_records() {
        let mgr = manager().await;
        create_dek(&mgr, "db-password", "svc").await;
        mgr.rotate("db-password").await.unwrap();

        let records = mgr.audit.by_key("db-password").await;
        assert!(records.iter().any(|r| r.event_type == AuditEventType::KeyCreated));
        assert!(records.iter().any(|r| r.event_type == AuditEventType::KeyRotated));
    }

    #[tokio::test]
    async fn test_get_material_for_unknown_key_fails() {
        let mgr = manager().await;
        let result = mgr.get_key_material("nope", 1).await;
        assert!(matches!(result, Err(Error::KeyNotFound(_))));
    }
}

//! Key and key-version data model.
//!
//! Every `Key` owns an ordered list of `KeyVersion`s, exactly one of which is
//! current, plus a `key_type` and optional `parent_key_id` placing it in the
//! KEK/DEK tree: a `Dek`/`Tls`/`Backup` key is always wrapped by a `Kek`, and
//! a `Kek` is wrapped either by another `Kek` (`parent_key_id` set) or by the
//! HSM-resident root key (`parent_key_id` absent).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a key sits in the key-encryption-key tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyType {
    /// Wraps other keys (KEKs or DEKs). May itself be wrapped by a parent KEK
    /// or, at the root, by the HSM-resident key.
    Kek,
    /// Data-encryption key: wraps application data, never other keys.
    Dek,
    /// Key backing a TLS context's private material.
    Tls,
    /// Key used to encrypt backup archives.
    Backup,
}

/// Lifecycle state of a single key version.
///
/// Mirrors NIST SP 800-57's pre-activation / active / deactivated /
/// destroyed states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyVersionStatus {
    /// Generated but not yet the current signing/encrypting version.
    PendingActivation,
    /// The current version: may encrypt and decrypt.
    Active,
    /// Superseded by a newer version: may still decrypt, may not encrypt.
    Deprecated,
    /// Scheduled for destruction after its grace period elapses.
    PendingDestruction,
    /// Key material has been discarded; only the audit trail remains.
    Destroyed,
}

impl KeyVersionStatus {
    /// Whether this version may be used to encrypt new data.
    #[must_use]
    pub const fn can_encrypt(self) -> bool {
        matches!(self, Self::Active)
    }

    /// Whether this version may still decrypt previously encrypted data.
    #[must_use]
    pub const fn can_decrypt(self) -> bool {
        matches!(
            self,
            Self::Active | Self::Deprecated | Self::PendingDestruction
        )
    }
}

/// An operation a key's owner has explicitly authorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyOperation {
    /// Authorized to encrypt.
    Encrypt,
    /// Authorized to decrypt.
    Decrypt,
}

/// One generation of key material belonging to a [`Key`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyVersion {
    /// Monotonically increasing version number, starting at 1.
    pub version: u32,
    /// Current lifecycle state.
    pub status: KeyVersionStatus,
    /// The data-encryption key, wrapped by the HSM-resident key-encryption
    /// key. Opaque to this core — its format is whatever the active
    /// `HsmProvider` implementation produces from `encrypt`.
    pub wrapped_dek: Vec<u8>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// When this version became the active one, if it ever was.
    pub activated_at: Option<DateTime<Utc>>,
    /// When this version was superseded by a newer one.
    pub deprecated_at: Option<DateTime<Utc>>,
    /// When this version's material was destroyed.
    pub destroyed_at: Option<DateTime<Utc>>,
    /// Number of AEAD operations performed under this version.
    pub usage_count: u64,
    /// SHA-256 digest of this version's raw (unwrapped) material. Recomputed
    /// on unwrap and compared; a mismatch means the wrapped bytes or the
    /// cached plaintext have been corrupted or substituted.
    pub material_digest: [u8; 32],
    /// Which version of the parent key wrapped this version's material.
    /// `None` only for a root `Kek` version, which is wrapped directly by
    /// the HSM-resident key rather than by another `Key`.
    pub wrapping_version: Option<u32>,
}

/// A named key and the full history of its versions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Key {
    /// Stable identifier, used as AEAD `key_id` and in audit records.
    pub key_id: String,
    /// Service or principal that owns this key.
    pub owner: String,
    /// Where this key sits in the KEK/DEK tree.
    pub key_type: KeyType,
    /// The KEK that wraps this key's material. `None` only for a root `Kek`,
    /// which is wrapped by the HSM-resident key instead of another `Key`.
    pub parent_key_id: Option<String>,
    /// Operations this key's owner has authorized; checked before rotation
    /// can restrict a deprecated version to decrypt-only.
    pub allowed_operations: Vec<KeyOperation>,
    /// Compliance/classification tags (e.g. `"pci-dss"`, `"hipaa"`) used by
    /// the policy engine and by key-listing queries.
    pub tags: Vec<String>,
    /// Version number of the currently active version.
    pub current_version: u32,
    /// Every version ever created for this key, oldest first.
    pub versions: Vec<KeyVersion>,
    /// When the key was first created.
    pub created_at: DateTime<Utc>,
}

impl Key {
    /// The current, active version.
    ///
    /// # Panics
    ///
    /// Panics if `current_version` does not correspond to any entry in
    /// `versions` — a broken invariant the lifecycle manager must never allow.
    #[must_use]
    pub fn current(&self) -> &KeyVersion {
        self.versions
            .iter()
            .find(|v| v.version == self.current_version)
            .expect("current_version must reference an existing KeyVersion")
    }

    /// Find a specific version by number, for decrypting data wrapped under
    /// an older (deprecated) version.
    #[must_use]
    pub fn version(&self, version: u32) -> Option<&KeyVersion> {
        self.versions.iter().find(|v| v.version == version)
    }

    /// Whether exactly one version in this key's history is `Active`.
    #[must_use]
    pub fn has_single_current_version(&self) -> bool {
        self.versions
            .iter()
            .filter(|v| v.status == KeyVersionStatus::Active)
            .count()
            == 1
    }
}

//! Storage abstraction for key records.
//!
//! This core treats persistence as an external collaborator: it defines the
//! trait the `keys`/`key_versions` schema implies and ships only an
//! in-memory implementation, used by the lifecycle manager's tests and by
//! the `SoftwareSimulator`-backed demo.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::keys::model::Key;

/// Optional filter for [`KeyStore::list_keys`].
#[derive(Debug, Clone, Default)]
pub struct KeyFilter {
    /// Restrict to keys owned by this principal.
    pub owner: Option<String>,
    /// Restrict to keys carrying this compliance/classification tag.
    pub tag: Option<String>,
}

impl KeyFilter {
    fn matches(&self, key: &Key) -> bool {
        if let Some(owner) = &self.owner {
            if &key.owner != owner {
                return false;
            }
        }
        if let Some(tag) = &self.tag {
            if !key.tags.iter().any(|t| t == tag) {
                return false;
            }
        }
        true
    }
}

/// Persistence boundary for [`Key`] records.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Fetch a key by id.
    async fn get(&self, key_id: &str) -> Result<Option<Key>>;

    /// Insert or replace a key record.
    async fn put(&self, key: Key) -> Result<()>;

    /// List keys matching `filter`.
    async fn list(&self, filter: &KeyFilter) -> Result<Vec<Key>>;

    /// Remove a key record entirely (only once every version is destroyed).
    async fn delete(&self, key_id: &str) -> Result<()>;
}

/// In-memory [`KeyStore`], used for tests and the bundled demo.
#[derive(Default)]
pub struct InMemoryKeyStore {
    keys: RwLock<HashMap<String, Key>>,
}

impl InMemoryKeyStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyStore for InMemoryKeyStore {
    async fn get(&self, key_id: &str) -> Result<Option<Key>> {
        Ok(self.keys.read().await.get(key_id).cloned())
    }

    async fn put(&self, key: Key) -> Result<()> {
        self.keys.write().await.insert(key.key_id.clone(), key);
        Ok(())
    }

    async fn list(&self, filter: &KeyFilter) -> Result<Vec<Key>> {
        Ok(self
            .keys
            .read()
            .await
            .values()
            .filter(|k| filter.matches(k))
            .cloned()
            .collect())
    }

    async fn delete(&self, key_id: &str) -> Result<()> {
        self.keys
            .write()
            .await
            .remove(key_id)
            .map(|_| ())
            .ok_or_else(|| Error::key_not_found(key_id))
    }
}

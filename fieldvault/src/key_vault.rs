//! Key vault: the persisted collection holding the wrapped data key.
//!
//! The vault holds at most one active data key. Creation is an atomic
//! insert-if-absent against a uniqueness constraint on the record's
//! `keyAltName`, so processes racing to initialize an empty vault all end up
//! with the same key:
//!
//! 1. Look for an existing record; use it if present
//! 2. Generate a data key, wrap it under the master key, insert it
//! 3. On a uniqueness conflict, re-fetch and use the winning record

use crate::error::{Error, StoreError};
use crate::keys::{generate_data_key, unwrap_data_key, wrap_data_key, DataKey, DataKeyId};
use crate::master_key::MasterKey;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Default key vault namespace (`database.collection`).
pub const DEFAULT_KEY_VAULT_NAMESPACE: &str = "encryption.__keyVault";

/// Singleton marker carried by the active data key record.
pub const DEFAULT_KEY_ALT_NAME: &str = "default";

/// Fetch attempts after an insert conflict before giving up.
const MAX_INSERT_ATTEMPTS: usize = 3;

/// Key protection scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyProviderKind {
    /// Data key wrapped under a locally held master key
    Local,
}

/// A data key record as stored in the key vault collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataKeyRecord {
    /// Key identifier
    #[serde(rename = "_id")]
    pub id: DataKeyId,
    /// Data key wrapped under the master key
    #[serde(with = "base64_bytes")]
    pub key_material: Vec<u8>,
    /// Key protection scheme
    pub provider: KeyProviderKind,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Singleton marker the store keeps unique
    pub key_alt_name: String,
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

/// Result of an insert-if-absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The record was stored
    Inserted,
    /// A record with the same `keyAltName` already exists
    Conflict,
}

/// Storage backend for the key vault collection.
///
/// `insert_if_absent` must be atomic with respect to other writers, including
/// other processes sharing the same backend.
#[async_trait]
pub trait KeyVaultStore: Send + Sync {
    /// Returns the active record, if any.
    async fn find_one(&self) -> Result<Option<DataKeyRecord>, StoreError>;

    /// Returns the record with the given id, if any.
    async fn find_by_id(&self, id: DataKeyId) -> Result<Option<DataKeyRecord>, StoreError>;

    /// Inserts the record unless one with the same `key_alt_name` exists.
    async fn insert_if_absent(&self, record: DataKeyRecord) -> Result<InsertOutcome, StoreError>;

    /// Number of records in the collection.
    async fn count(&self) -> Result<usize, StoreError>;

    /// The `database.collection` this store is bound to, when it knows one.
    fn namespace(&self) -> Option<&str> {
        None
    }
}

#[async_trait]
impl<S: KeyVaultStore + ?Sized> KeyVaultStore for Arc<S> {
    async fn find_one(&self) -> Result<Option<DataKeyRecord>, StoreError> {
        (**self).find_one().await
    }

    async fn find_by_id(&self, id: DataKeyId) -> Result<Option<DataKeyRecord>, StoreError> {
        (**self).find_by_id(id).await
    }

    async fn insert_if_absent(&self, record: DataKeyRecord) -> Result<InsertOutcome, StoreError> {
        (**self).insert_if_absent(record).await
    }

    async fn count(&self) -> Result<usize, StoreError> {
        (**self).count().await
    }

    fn namespace(&self) -> Option<&str> {
        (**self).namespace()
    }
}

/// In-process key vault.
///
/// Clones share the same collection.
#[derive(Debug, Clone, Default)]
pub struct MemoryKeyVault {
    records: Arc<Mutex<Vec<DataKeyRecord>>>,
}

impl MemoryKeyVault {
    /// Creates an empty vault.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_records<T>(
        &self,
        f: impl FnOnce(&mut Vec<DataKeyRecord>) -> T,
    ) -> Result<T, StoreError> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| StoreError::Unreachable("memory key vault lock poisoned".to_string()))?;
        Ok(f(&mut records))
    }
}

#[async_trait]
impl KeyVaultStore for MemoryKeyVault {
    async fn find_one(&self) -> Result<Option<DataKeyRecord>, StoreError> {
        self.with_records(|records| {
            records.iter().find(|r| r.key_alt_name == DEFAULT_KEY_ALT_NAME).cloned()
        })
    }

    async fn find_by_id(&self, id: DataKeyId) -> Result<Option<DataKeyRecord>, StoreError> {
        self.with_records(|records| records.iter().find(|r| r.id == id).cloned())
    }

    async fn insert_if_absent(&self, record: DataKeyRecord) -> Result<InsertOutcome, StoreError> {
        self.with_records(|records| {
            if records.iter().any(|r| r.key_alt_name == record.key_alt_name) {
                InsertOutcome::Conflict
            } else {
                records.push(record);
                InsertOutcome::Inserted
            }
        })
    }

    async fn count(&self) -> Result<usize, StoreError> {
        self.with_records(|records| records.len())
    }
}

/// Finds or creates the single data key and unwraps it for use.
///
/// # Example
///
/// ```rust,ignore
/// use fieldvault::key_vault::{KeyVaultManager, MemoryKeyVault};
/// use fieldvault::master_key::MasterKey;
///
/// let manager = KeyVaultManager::new(MemoryKeyVault::new(), MasterKey::generate());
/// let id = manager.get_or_create_data_key().await?;
/// assert_eq!(manager.get_or_create_data_key().await?, id);
/// ```
pub struct KeyVaultManager<S: KeyVaultStore> {
    store: Arc<S>,
    master_key: MasterKey,
}

impl<S: KeyVaultStore> KeyVaultManager<S> {
    /// Creates a manager over the given store.
    pub fn new(store: S, master_key: MasterKey) -> Self {
        Self { store: Arc::new(store), master_key }
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns the id of the active data key, creating it if the vault is empty.
    ///
    /// Idempotent across calls and across processes sharing the store.
    ///
    /// # Errors
    ///
    /// Returns `Error::KeyVaultUnavailable` if the store fails, and
    /// `Error::EncryptionFailed` if a new key cannot be wrapped.
    pub async fn get_or_create_data_key(&self) -> Result<DataKeyId, Error> {
        for attempt in 1..=MAX_INSERT_ATTEMPTS {
            if let Some(existing) = self.store.find_one().await? {
                debug!(key_id = %existing.id, "using existing data key");
                return Ok(existing.id);
            }

            let record = self.new_record()?;
            let id = record.id;
            match self.store.insert_if_absent(record).await? {
                InsertOutcome::Inserted => {
                    info!(key_id = %id, "created data key");
                    return Ok(id);
                }
                InsertOutcome::Conflict => {
                    warn!(attempt, "data key created concurrently, fetching the stored one");
                }
            }
        }

        Err(Error::KeyVaultUnavailable(StoreError::Unreachable(format!(
            "no data key visible after {MAX_INSERT_ATTEMPTS} conflicting inserts"
        ))))
    }

    /// Fetches and unwraps the data key with the given id.
    ///
    /// # Errors
    ///
    /// Returns `Error::KeyVaultUnavailable` if the store fails or the record is
    /// missing, and `Error::MasterKeyUnavailable` if the master key cannot
    /// unwrap it.
    pub async fn data_key(&self, id: DataKeyId) -> Result<DataKey, Error> {
        let record = self
            .store
            .find_by_id(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("data key {id}")))?;

        unwrap_data_key(&self.master_key, &record.key_material).map_err(|_| {
            Error::MasterKeyUnavailable(format!("master key cannot unwrap data key {id}"))
        })
    }

    /// Finds or creates the data key and unwraps it.
    ///
    /// # Errors
    ///
    /// See [`KeyVaultManager::get_or_create_data_key`] and
    /// [`KeyVaultManager::data_key`].
    pub async fn resolve(&self) -> Result<(DataKeyId, DataKey), Error> {
        let id = self.get_or_create_data_key().await?;
        let key = self.data_key(id).await?;
        Ok((id, key))
    }

    fn new_record(&self) -> Result<DataKeyRecord, Error> {
        let data_key = generate_data_key();
        let key_material = wrap_data_key(&self.master_key, &data_key)?;

        Ok(DataKeyRecord {
            id: DataKeyId::new_v4(),
            key_material,
            provider: KeyProviderKind::Local,
            created_at: Utc::now(),
            key_alt_name: DEFAULT_KEY_ALT_NAME.to_string(),
        })
    }
}

impl<S: KeyVaultStore> Clone for KeyVaultManager<S> {
    fn clone(&self) -> Self {
        Self { store: Arc::clone(&self.store), master_key: self.master_key.clone() }
    }
}

//! Encryption service: initialization order and guarded field operations.
//!
//! ```text
//! Uninitialized -> Initializing -> Ready
//!                               -> Failed
//! ```
//!
//! Initialization runs once: master key, then key vault, then cipher. A failure
//! leaves the service `Failed` for the lifetime of the instance, so the rest of
//! the application can keep serving while every cipher call reports
//! `NotInitialized` with the original cause. Calls made before or during
//! initialization also fail with `NotInitialized`; nothing blocks or queues.
//! Dropping the `initialize` future part way leaves the service `Failed` with
//! `InitializationCancelled`.

use crate::algorithm::Algorithm;
use crate::cipher::FieldCipher;
use crate::config::EncryptionConfig;
use crate::error::Error;
use crate::key_vault::{KeyVaultManager, KeyVaultStore};
use crate::keys::DataKeyId;
use crate::master_key::MasterKeySource;
use crate::schema::SchemaMap;
use crate::value::EncryptedValue;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, error, info, warn};

/// Resolved encryption context: the data key id, the cipher bound to it, and
/// the schema map.
///
/// Cheap to clone and safe to share across threads. Handing this to the
/// components that need encryption avoids any global state.
#[derive(Clone)]
pub struct FieldEncryptor {
    cipher: Arc<FieldCipher>,
    schema: Arc<SchemaMap>,
}

impl FieldEncryptor {
    /// Creates an encryptor from a cipher and schema map.
    #[must_use]
    pub fn new(cipher: FieldCipher, schema: SchemaMap) -> Self {
        Self { cipher: Arc::new(cipher), schema: Arc::new(schema) }
    }

    /// Returns the active data key id.
    #[must_use]
    pub fn key_id(&self) -> DataKeyId {
        self.cipher.key_id()
    }

    /// Returns the schema map.
    #[must_use]
    pub fn schema(&self) -> &SchemaMap {
        &self.schema
    }

    /// Encrypts a string value.
    ///
    /// # Errors
    ///
    /// Returns `Error::EncryptionFailed` if the cipher fails.
    pub fn encrypt_field(
        &self,
        value: &str,
        algorithm: Algorithm,
    ) -> Result<EncryptedValue, Error> {
        self.cipher.encrypt(value, algorithm).map_err(|e| {
            error!(%algorithm, key_id = %self.key_id(), "field encryption failed");
            e
        })
    }

    /// Verifies and decrypts a value.
    ///
    /// # Errors
    ///
    /// Returns `Error::DecryptionFailed` for any verification or decryption
    /// failure.
    pub fn decrypt_field(&self, value: &EncryptedValue) -> Result<String, Error> {
        self.cipher.decrypt(value).map_err(|_| {
            warn!(
                key_id = %value.key_id(),
                algorithm = %value.algorithm(),
                "field decryption failed"
            );
            Error::DecryptionFailed
        })
    }

    /// Decodes and decrypts a value in wire format.
    ///
    /// # Errors
    ///
    /// Returns `Error::MalformedEncryptedValue` if the bytes cannot be decoded,
    /// otherwise `Error::DecryptionFailed` on failure.
    pub fn decrypt_field_bytes(&self, bytes: &[u8]) -> Result<String, Error> {
        let value = EncryptedValue::from_bytes(bytes)?;
        self.decrypt_field(&value)
    }
}

impl fmt::Debug for FieldEncryptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldEncryptor").field("key_id", &self.key_id()).finish_non_exhaustive()
    }
}

/// Readiness of the encryption service.
#[derive(Debug, Clone)]
pub enum EncryptionState {
    /// `initialize` has not been called
    Uninitialized,
    /// `initialize` is running
    Initializing,
    /// Encryption is available
    Ready(FieldEncryptor),
    /// Initialization failed; the service stays unusable
    Failed(Arc<Error>),
}

impl EncryptionState {
    /// Returns `true` in the `Ready` state.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// Returns the encryptor, or `NotInitialized` carrying any failure cause.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotInitialized` in every state other than `Ready`.
    pub fn encryptor(&self) -> Result<&FieldEncryptor, Error> {
        match self {
            Self::Ready(encryptor) => Ok(encryptor),
            Self::Failed(cause) => Err(Error::NotInitialized { cause: Some(Arc::clone(cause)) }),
            Self::Uninitialized | Self::Initializing => Err(Error::NotInitialized { cause: None }),
        }
    }

    const fn name(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Ready(_) => "ready",
            Self::Failed(_) => "failed",
        }
    }
}

/// Guarded entry point for field encryption.
///
/// # Example
///
/// ```rust,ignore
/// use fieldvault::prelude::*;
///
/// let service = EncryptionService::new(EncryptionConfig::default());
/// let state = service.initialize(&StaticMasterKey::ephemeral(), MemoryKeyVault::new()).await;
/// assert!(state.is_ready());
///
/// let ssn = service.encrypt_field("123-45-6789", Algorithm::Deterministic)?;
/// assert_eq!(service.decrypt_field(&ssn)?, "123-45-6789");
/// ```
pub struct EncryptionService {
    config: EncryptionConfig,
    state: RwLock<EncryptionState>,
}

impl EncryptionService {
    /// Creates an uninitialized service.
    #[must_use]
    pub fn new(config: EncryptionConfig) -> Self {
        Self { config, state: RwLock::new(EncryptionState::Uninitialized) }
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &EncryptionConfig {
        &self.config
    }

    /// Returns a snapshot of the current state.
    #[must_use]
    pub fn state(&self) -> EncryptionState {
        self.read_state().clone()
    }

    /// Runs initialization once and returns the resulting state.
    ///
    /// Calls after the first return the current state without doing any work;
    /// a failed service is never retried. If the returned future is dropped
    /// after it started, the service is left `Failed`.
    pub async fn initialize<M, S>(&self, master_keys: &M, store: S) -> EncryptionState
    where
        M: MasterKeySource + ?Sized,
        S: KeyVaultStore,
    {
        {
            let mut state = self.write_state();
            if !matches!(*state, EncryptionState::Uninitialized) {
                debug!(state = state.name(), "encryption service already initialized");
                return state.clone();
            }
            *state = EncryptionState::Initializing;
        }
        let _guard = CancelGuard { service: self };

        info!(key_vault = self.config.key_vault_namespace(), "initializing encryption service");
        let next = match self.run_initialization(master_keys, store).await {
            Ok(encryptor) => {
                info!(key_id = %encryptor.key_id(), "encryption service ready");
                EncryptionState::Ready(encryptor)
            }
            Err(err) => {
                error!(error = %err, "encryption service failed to initialize");
                EncryptionState::Failed(Arc::new(err))
            }
        };

        *self.write_state() = next.clone();
        next
    }

    async fn run_initialization<M, S>(
        &self,
        master_keys: &M,
        store: S,
    ) -> Result<FieldEncryptor, Error>
    where
        M: MasterKeySource + ?Sized,
        S: KeyVaultStore,
    {
        let expected = self.config.key_vault_namespace();
        if let Some(actual) = store.namespace() {
            if actual != expected {
                return Err(Error::InvalidConfig(format!(
                    "key vault store is bound to {actual}, configuration names {expected}"
                )));
            }
        }

        let master_key = master_keys.load()?;
        let manager = KeyVaultManager::new(store, master_key);
        let (key_id, data_key) = manager.resolve().await?;

        let cipher = FieldCipher::new(key_id, data_key);
        Ok(FieldEncryptor::new(cipher, self.config.schema_map().clone()))
    }

    /// Returns the encryptor if the service is ready.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotInitialized` unless the service is `Ready`.
    pub fn encryptor(&self) -> Result<FieldEncryptor, Error> {
        self.read_state().encryptor().cloned()
    }

    /// Returns the active data key id once ready.
    #[must_use]
    pub fn data_key_id(&self) -> Option<DataKeyId> {
        self.encryptor().ok().map(|e| e.key_id())
    }

    /// Encrypts a string value.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotInitialized` unless ready, `Error::EncryptionFailed`
    /// if the cipher fails.
    pub fn encrypt_field(
        &self,
        value: &str,
        algorithm: Algorithm,
    ) -> Result<EncryptedValue, Error> {
        self.encryptor()?.encrypt_field(value, algorithm)
    }

    /// Verifies and decrypts a value.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotInitialized` unless ready, `Error::DecryptionFailed`
    /// on any verification or decryption failure.
    pub fn decrypt_field(&self, value: &EncryptedValue) -> Result<String, Error> {
        self.encryptor()?.decrypt_field(value)
    }

    /// Decodes and decrypts a value in wire format.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotInitialized` unless ready,
    /// `Error::MalformedEncryptedValue` if the bytes cannot be decoded, and
    /// `Error::DecryptionFailed` on verification failure.
    pub fn decrypt_field_bytes(&self, bytes: &[u8]) -> Result<String, Error> {
        self.encryptor()?.decrypt_field_bytes(bytes)
    }

    fn read_state(&self) -> RwLockReadGuard<'_, EncryptionState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, EncryptionState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Marks the service `Failed` if `initialize` is dropped while in flight.
struct CancelGuard<'a> {
    service: &'a EncryptionService,
}

impl Drop for CancelGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.service.write_state();
        if matches!(*state, EncryptionState::Initializing) {
            warn!("encryption service initialization cancelled");
            *state = EncryptionState::Failed(Arc::new(Error::InitializationCancelled));
        }
    }
}

impl fmt::Debug for EncryptionService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionService").field("state", &self.read_state().name()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::key_vault::{DataKeyRecord, InsertOutcome, MemoryKeyVault};
    use crate::master_key::{MasterKey, StaticMasterKey};
    use async_trait::async_trait;

    struct MissingMasterKey;

    impl MasterKeySource for MissingMasterKey {
        fn load(&self) -> Result<MasterKey, Error> {
            Err(Error::MasterKeyUnavailable("no key configured".to_string()))
        }
    }

    struct DownStore;

    #[async_trait]
    impl KeyVaultStore for DownStore {
        async fn find_one(&self) -> Result<Option<DataKeyRecord>, StoreError> {
            Err(StoreError::Unreachable("connection refused".to_string()))
        }

        async fn find_by_id(&self, _id: DataKeyId) -> Result<Option<DataKeyRecord>, StoreError> {
            Err(StoreError::Unreachable("connection refused".to_string()))
        }

        async fn insert_if_absent(
            &self,
            _record: DataKeyRecord,
        ) -> Result<InsertOutcome, StoreError> {
            Err(StoreError::Unreachable("connection refused".to_string()))
        }

        async fn count(&self) -> Result<usize, StoreError> {
            Err(StoreError::Unreachable("connection refused".to_string()))
        }
    }

    /// Never answers; stands in for a hung key vault.
    struct StalledStore;

    #[async_trait]
    impl KeyVaultStore for StalledStore {
        async fn find_one(&self) -> Result<Option<DataKeyRecord>, StoreError> {
            std::future::pending().await
        }

        async fn find_by_id(&self, _id: DataKeyId) -> Result<Option<DataKeyRecord>, StoreError> {
            std::future::pending().await
        }

        async fn insert_if_absent(
            &self,
            _record: DataKeyRecord,
        ) -> Result<InsertOutcome, StoreError> {
            std::future::pending().await
        }

        async fn count(&self) -> Result<usize, StoreError> {
            std::future::pending().await
        }
    }

    struct BoundStore {
        namespace: &'static str,
        inner: MemoryKeyVault,
    }

    impl BoundStore {
        fn new(namespace: &'static str) -> Self {
            Self { namespace, inner: MemoryKeyVault::new() }
        }
    }

    #[async_trait]
    impl KeyVaultStore for BoundStore {
        async fn find_one(&self) -> Result<Option<DataKeyRecord>, StoreError> {
            self.inner.find_one().await
        }

        async fn find_by_id(&self, id: DataKeyId) -> Result<Option<DataKeyRecord>, StoreError> {
            self.inner.find_by_id(id).await
        }

        async fn insert_if_absent(
            &self,
            record: DataKeyRecord,
        ) -> Result<InsertOutcome, StoreError> {
            self.inner.insert_if_absent(record).await
        }

        async fn count(&self) -> Result<usize, StoreError> {
            self.inner.count().await
        }

        fn namespace(&self) -> Option<&str> {
            Some(self.namespace)
        }
    }

    async fn ready_service() -> EncryptionService {
        let service = EncryptionService::new(EncryptionConfig::default());
        let state = service.initialize(&StaticMasterKey::ephemeral(), MemoryKeyVault::new()).await;
        assert!(state.is_ready());
        service
    }

    #[test]
    fn test_calls_before_initialization_fail() {
        let service = EncryptionService::new(EncryptionConfig::default());

        let result = service.encrypt_field("123-45-6789", Algorithm::Deterministic);
        assert!(matches!(result, Err(Error::NotInitialized { cause: None })));

        let result = service.decrypt_field_bytes(&[0u8; 100]);
        assert!(matches!(result, Err(Error::NotInitialized { cause: None })));
        assert!(service.data_key_id().is_none());
    }

    #[tokio::test]
    async fn test_ready_round_trip() {
        let service = ready_service().await;

        let value = service.encrypt_field("123-45-6789", Algorithm::Deterministic).unwrap();
        assert_eq!(service.decrypt_field(&value).unwrap(), "123-45-6789");
        assert_eq!(service.data_key_id(), Some(value.key_id()));
    }

    #[tokio::test]
    async fn test_master_key_failure_leaves_service_failed() {
        let service = EncryptionService::new(EncryptionConfig::default());
        let state = service.initialize(&MissingMasterKey, MemoryKeyVault::new()).await;

        assert!(matches!(state, EncryptionState::Failed(_)));
        let err = service.encrypt_field("x", Algorithm::Random).unwrap_err();
        assert!(matches!(err.init_cause(), Some(Error::MasterKeyUnavailable(_))));
    }

    #[tokio::test]
    async fn test_key_vault_failure_leaves_service_failed() {
        let service = EncryptionService::new(EncryptionConfig::default());
        let state = service.initialize(&StaticMasterKey::ephemeral(), DownStore).await;

        assert!(matches!(state, EncryptionState::Failed(_)));
        let err = service.decrypt_field_bytes(&[]).unwrap_err();
        assert!(matches!(err.init_cause(), Some(Error::KeyVaultUnavailable(_))));
    }

    #[tokio::test]
    async fn test_failed_service_is_not_retried() {
        let service = EncryptionService::new(EncryptionConfig::default());
        service.initialize(&MissingMasterKey, MemoryKeyVault::new()).await;

        let state = service.initialize(&StaticMasterKey::ephemeral(), MemoryKeyVault::new()).await;
        assert!(matches!(state, EncryptionState::Failed(_)));
        assert!(!service.state().is_ready());
    }

    #[tokio::test]
    async fn test_second_initialize_keeps_key() {
        let service = ready_service().await;
        let key_id = service.data_key_id().unwrap();

        let state = service.initialize(&StaticMasterKey::ephemeral(), MemoryKeyVault::new()).await;
        assert_eq!(state.encryptor().unwrap().key_id(), key_id);
    }

    #[tokio::test]
    async fn test_cancelled_initialization_leaves_service_failed() {
        let service = EncryptionService::new(EncryptionConfig::default());
        let master = StaticMasterKey::ephemeral();

        let result = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            service.initialize(&master, StalledStore),
        )
        .await;
        assert!(result.is_err());

        assert!(matches!(service.state(), EncryptionState::Failed(_)));
        let err = service.encrypt_field("x", Algorithm::Random).unwrap_err();
        assert!(matches!(err.init_cause(), Some(Error::InitializationCancelled)));

        let state = service.initialize(&master, MemoryKeyVault::new()).await;
        assert!(matches!(state, EncryptionState::Failed(_)));
    }

    #[tokio::test]
    async fn test_unpolled_initialization_changes_nothing() {
        let service = EncryptionService::new(EncryptionConfig::default());
        drop(service.initialize(&StaticMasterKey::ephemeral(), StalledStore));
        assert!(matches!(service.state(), EncryptionState::Uninitialized));

        let state = service.initialize(&StaticMasterKey::ephemeral(), MemoryKeyVault::new()).await;
        assert!(state.is_ready());
    }

    #[tokio::test]
    async fn test_store_namespace_must_match_config() {
        let service = EncryptionService::new(EncryptionConfig::default());
        let store = BoundStore::new("app.keys");
        let state = service.initialize(&StaticMasterKey::ephemeral(), store).await;

        assert!(matches!(state, EncryptionState::Failed(_)));
        let err = service.encrypt_field("x", Algorithm::Random).unwrap_err();
        assert!(matches!(err.init_cause(), Some(Error::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_store_namespace_matching_config() {
        let service = EncryptionService::new(EncryptionConfig::default());
        let store = BoundStore::new(crate::key_vault::DEFAULT_KEY_VAULT_NAMESPACE);

        let state = service.initialize(&StaticMasterKey::ephemeral(), store).await;
        assert!(state.is_ready());
    }

    #[tokio::test]
    async fn test_encryptor_is_shareable() {
        let service = ready_service().await;
        let encryptor = service.encryptor().unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let encryptor = encryptor.clone();
                std::thread::spawn(move || {
                    let value = encryptor.encrypt_field(&format!("value-{i}"), Algorithm::Random)?;
                    encryptor.decrypt_field(&value)
                })
            })
            .collect();

        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.join().unwrap().unwrap(), format!("value-{i}"));
        }
    }

    #[tokio::test]
    async fn test_decrypt_failures_collapse() {
        let service = ready_service().await;
        let mut bytes = service.encrypt_field("secret", Algorithm::Random).unwrap().to_bytes();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;

        assert!(matches!(service.decrypt_field_bytes(&bytes), Err(Error::DecryptionFailed)));
    }
}

//! # `fieldvault`
//!
//! Client-side field-level encryption for document stores.
//!
//! Selected fields are encrypted before they are written and decrypted after
//! they are read, so the store only ever sees ciphertext for them.
//!
//! ## Features
//!
//! - `AEAD_AES_256_CBC_HMAC_SHA_512` with deterministic and random modes
//! - Equality queries over deterministically encrypted fields
//! - Envelope encryption: one data key per application, wrapped by a master key
//! - Race-free data key creation shared across processes
//! - Explicit service state with fail-closed behaviour
//!
//! ## Example
//!
//! ```rust,ignore
//! use fieldvault::prelude::*;
//!
//! let config = EncryptionConfig::from_path("encryption.json")?;
//! let service = EncryptionService::new(config);
//! service.initialize(&StaticMasterKey::ephemeral(), MemoryKeyVault::new()).await;
//!
//! let encryptor = service.encryptor()?;
//! let filter = encryptor.equality_filter("mydatabase.users", "ssn", "123-45-6789")?;
//! ```

#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod aead;
pub mod algorithm;
pub mod cipher;
pub mod config;
pub mod document;
pub mod error;
pub mod key_vault;
pub mod keys;
pub mod master_key;
pub mod schema;
pub mod service;
pub mod value;

pub mod prelude {
    //! Convenience re-exports for common use.
    pub use crate::algorithm::Algorithm;
    pub use crate::cipher::FieldCipher;
    pub use crate::config::EncryptionConfig;
    pub use crate::error::{Error, StoreError};
    pub use crate::key_vault::{
        DataKeyRecord, InsertOutcome, KeyVaultManager, KeyVaultStore, MemoryKeyVault,
    };
    pub use crate::keys::{DataKey, DataKeyId};
    pub use crate::master_key::{MasterKey, MasterKeySource, StaticMasterKey};
    pub use crate::schema::SchemaMap;
    pub use crate::service::{EncryptionService, EncryptionState, FieldEncryptor};
    pub use crate::value::EncryptedValue;
}

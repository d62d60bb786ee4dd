//! Data keys and their protection under the master key.
//!
//! The `local` provider wraps a data key with the same AEAD construction used
//! for field values, keyed by the master key, in random mode and with empty
//! associated data. Wrapped material is laid out as:
//!
//! ```text
//! [iv:16][ciphertext:N][tag:32]
//! ```

use crate::aead::{self, IV_SIZE, KEY_SIZE, TAG_SIZE};
use crate::algorithm::Algorithm;
use crate::error::Error;
use crate::master_key::MasterKey;
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretVec};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Data key size in bytes.
pub const DATA_KEY_SIZE: usize = KEY_SIZE;

/// 128-bit identifier of a data key record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataKeyId(Uuid);

impl DataKeyId {
    /// Generates a random (v4) identifier.
    #[must_use]
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    /// Builds an identifier from its 16 raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Returns the 16 raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl From<Uuid> for DataKeyId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for DataKeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Plaintext data key used by the field cipher.
pub struct DataKey {
    key: SecretVec<u8>,
}

impl DataKey {
    /// Wraps existing key material.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidKeyLength` if `key` is not 96 bytes.
    pub fn new(key: SecretVec<u8>) -> Result<Self, Error> {
        let actual = key.expose_secret().len();
        if actual != DATA_KEY_SIZE {
            return Err(Error::InvalidKeyLength { expected: DATA_KEY_SIZE, actual });
        }
        Ok(Self { key })
    }

    /// Exposes the raw key bytes.
    #[must_use]
    pub fn expose(&self) -> &[u8] {
        self.key.expose_secret()
    }
}

impl Clone for DataKey {
    fn clone(&self) -> Self {
        Self { key: SecretVec::new(self.key.expose_secret().to_vec()) }
    }
}

impl fmt::Debug for DataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataKey").field("key", &"[REDACTED]").finish()
    }
}

/// Generates a random data key.
///
/// # Example
///
/// ```
/// use fieldvault::keys::{generate_data_key, DATA_KEY_SIZE};
///
/// let key = generate_data_key();
/// assert_eq!(key.expose().len(), DATA_KEY_SIZE);
/// ```
#[must_use]
pub fn generate_data_key() -> DataKey {
    let mut key = vec![0u8; DATA_KEY_SIZE];
    OsRng.fill_bytes(&mut key);
    DataKey { key: SecretVec::new(key) }
}

/// Wraps a data key under the master key.
///
/// # Errors
///
/// Returns `Error::EncryptionFailed` if the wrap fails.
pub fn wrap_data_key(master: &MasterKey, data_key: &DataKey) -> Result<Vec<u8>, Error> {
    let sealed = aead::seal(master.expose(), Algorithm::Random, &[], data_key.expose())?;

    let mut wrapped = Vec::with_capacity(IV_SIZE + sealed.ciphertext.len() + TAG_SIZE);
    wrapped.extend_from_slice(&sealed.iv);
    wrapped.extend_from_slice(&sealed.ciphertext);
    wrapped.extend_from_slice(&sealed.tag);
    Ok(wrapped)
}

/// Unwraps a data key with the master key.
///
/// # Errors
///
/// Returns `Error::DecryptionFailed` if the material is truncated, was wrapped
/// under a different master key, or has been modified.
pub fn unwrap_data_key(master: &MasterKey, wrapped: &[u8]) -> Result<DataKey, Error> {
    if wrapped.len() < IV_SIZE + TAG_SIZE {
        return Err(Error::DecryptionFailed);
    }
    let (iv, rest) = wrapped.split_at(IV_SIZE);
    let (ciphertext, tag) = rest.split_at(rest.len() - TAG_SIZE);

    let plaintext = aead::open(master.expose(), &[], iv, ciphertext, tag)?;
    DataKey::new(SecretVec::new(plaintext.to_vec())).map_err(|_| Error::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_data_key() {
        let a = generate_data_key();
        let b = generate_data_key();

        assert_ne!(a.expose(), b.expose());
        assert_eq!(a.expose().len(), DATA_KEY_SIZE);
    }

    #[test]
    fn test_wrap_unwrap_round_trip() {
        let master = MasterKey::generate();
        let data_key = generate_data_key();

        let wrapped = wrap_data_key(&master, &data_key).unwrap();
        assert_ne!(&wrapped[IV_SIZE..IV_SIZE + DATA_KEY_SIZE], data_key.expose());

        let unwrapped = unwrap_data_key(&master, &wrapped).unwrap();
        assert_eq!(unwrapped.expose(), data_key.expose());
    }

    #[test]
    fn test_unwrap_with_other_master_key_fails() {
        let data_key = generate_data_key();
        let wrapped = wrap_data_key(&MasterKey::generate(), &data_key).unwrap();

        let result = unwrap_data_key(&MasterKey::generate(), &wrapped);
        assert!(matches!(result, Err(Error::DecryptionFailed)));
    }

    #[test]
    fn test_unwrap_truncated_fails() {
        let master = MasterKey::generate();
        let result = unwrap_data_key(&master, &[0u8; 20]);
        assert!(matches!(result, Err(Error::DecryptionFailed)));
    }

    #[test]
    fn test_data_key_id_bytes() {
        let id = DataKeyId::new_v4();
        assert_eq!(DataKeyId::from_bytes(*id.as_bytes()), id);
        assert_eq!(id.to_string(), id.as_uuid().to_string());
    }

    #[test]
    fn test_data_key_length_enforced() {
        let result = DataKey::new(SecretVec::new(vec![1u8; 64]));
        assert!(matches!(result, Err(Error::InvalidKeyLength { expected: 96, actual: 64 })));
    }
}

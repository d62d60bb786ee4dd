//! Field cipher: authenticated encryption of string values under a data key.
//!
//! # Security Properties
//!
//! - **Deterministic**: same plaintext + key → byte-identical value. Enables
//!   exact-match queries and reveals equality to anyone comparing ciphertexts.
//!   Never use it for low-cardinality or highly sensitive fields.
//! - **Random**: fresh IV per call, so equal plaintexts encrypt differently.
//! - **Fail closed**: the tag is verified before decryption, and every failure
//!   is reported as the same `DecryptionFailed`.

use crate::aead;
use crate::algorithm::Algorithm;
use crate::error::Error;
use crate::keys::{DataKey, DataKeyId};
use crate::value::{EncryptedValue, VALUE_TYPE_STRING};

/// Encrypts and decrypts field values under one data key.
///
/// Stateless apart from the key, so one instance can be shared across threads.
///
/// # Example
///
/// ```rust,ignore
/// use fieldvault::cipher::FieldCipher;
/// use fieldvault::algorithm::Algorithm;
/// use fieldvault::keys::{generate_data_key, DataKeyId};
///
/// let cipher = FieldCipher::new(DataKeyId::new_v4(), generate_data_key());
///
/// let a = cipher.encrypt("123-45-6789", Algorithm::Deterministic)?;
/// let b = cipher.encrypt("123-45-6789", Algorithm::Deterministic)?;
/// assert_eq!(a, b);
/// assert_eq!(cipher.decrypt(&a)?, "123-45-6789");
/// ```
#[derive(Debug, Clone)]
pub struct FieldCipher {
    key_id: DataKeyId,
    key: DataKey,
}

impl FieldCipher {
    /// Creates a cipher bound to a data key.
    #[must_use]
    pub fn new(key_id: DataKeyId, key: DataKey) -> Self {
        Self { key_id, key }
    }

    /// Returns the id of the bound data key.
    #[must_use]
    pub const fn key_id(&self) -> DataKeyId {
        self.key_id
    }

    /// Encrypts a string value.
    ///
    /// # Errors
    ///
    /// Returns `Error::EncryptionFailed` if the cipher cannot be keyed.
    pub fn encrypt(&self, plaintext: &str, algorithm: Algorithm) -> Result<EncryptedValue, Error> {
        let aad = EncryptedValue::associated_data(algorithm, &self.key_id, VALUE_TYPE_STRING);

        let sealed = aead::seal(self.key.expose(), algorithm, &aad, plaintext.as_bytes())
            .map_err(|e| match e {
                failed @ Error::EncryptionFailed(_) => failed,
                other => Error::EncryptionFailed(other.to_string()),
            })?;

        Ok(EncryptedValue::new(algorithm, self.key_id, sealed.iv, sealed.ciphertext, sealed.tag))
    }

    /// Verifies and decrypts a value.
    ///
    /// # Errors
    ///
    /// Returns `Error::DecryptionFailed` if the value was produced under a
    /// different key, has been modified, or does not hold a UTF-8 string.
    pub fn decrypt(&self, value: &EncryptedValue) -> Result<String, Error> {
        if value.key_id() != self.key_id {
            return Err(Error::DecryptionFailed);
        }

        let aad = EncryptedValue::associated_data(
            value.algorithm(),
            &value.key_id(),
            value.value_type(),
        );
        let plaintext =
            aead::open(self.key.expose(), &aad, value.iv(), value.ciphertext(), value.tag())
                .map_err(|_| Error::DecryptionFailed)?;

        String::from_utf8(plaintext.to_vec()).map_err(|_| Error::DecryptionFailed)
    }

    /// Decodes and decrypts a value in wire format.
    ///
    /// # Errors
    ///
    /// Returns `Error::MalformedEncryptedValue` if the bytes cannot be framed,
    /// otherwise the errors of [`FieldCipher::decrypt`].
    pub fn decrypt_bytes(&self, bytes: &[u8]) -> Result<String, Error> {
        let value = EncryptedValue::from_bytes(bytes)?;
        self.decrypt(&value)
    }
}

//! Master key abstraction.
//!
//! The master key is the root secret that wraps the data key stored in the key
//! vault. It never encrypts field data directly.

use crate::aead::KEY_SIZE;
use crate::error::Error;
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretVec};
use std::fmt;

/// Master key length in bytes.
pub const MASTER_KEY_SIZE: usize = KEY_SIZE;

/// A 96-byte master key for the `local` provider.
pub struct MasterKey {
    key: SecretVec<u8>,
}

impl MasterKey {
    /// Wraps existing key material.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidKeyLength` if `key` is not 96 bytes.
    pub fn new(key: SecretVec<u8>) -> Result<Self, Error> {
        let actual = key.expose_secret().len();
        if actual != MASTER_KEY_SIZE {
            return Err(Error::InvalidKeyLength { expected: MASTER_KEY_SIZE, actual });
        }
        Ok(Self { key })
    }

    /// Generates a fresh master key from the OS random source.
    #[must_use]
    pub fn generate() -> Self {
        let mut key = vec![0u8; MASTER_KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Self { key: SecretVec::new(key) }
    }

    /// Exposes the raw key bytes.
    #[must_use]
    pub fn expose(&self) -> &[u8] {
        self.key.expose_secret()
    }
}

impl Clone for MasterKey {
    fn clone(&self) -> Self {
        Self { key: SecretVec::new(self.key.expose_secret().to_vec()) }
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterKey").field("key", &"[REDACTED]").finish()
    }
}

/// Supplies the master key at startup.
///
/// Implementations must be thread-safe (`Send + Sync`).
///
/// # Example
///
/// ```rust,ignore
/// use fieldvault::master_key::{MasterKey, MasterKeySource};
///
/// struct EnvelopeKey;
///
/// impl MasterKeySource for EnvelopeKey {
///     fn load(&self) -> Result<MasterKey, Error> {
///         // Fetch from a secrets manager
///     }
/// }
/// ```
pub trait MasterKeySource: Send + Sync {
    /// Loads the master key.
    ///
    /// # Errors
    ///
    /// Returns `Error::MasterKeyUnavailable` if the seed material is missing or
    /// cannot be read.
    fn load(&self) -> Result<MasterKey, Error>;
}

/// Master key held in memory.
///
/// A key produced by [`StaticMasterKey::ephemeral`] lives only as long as the
/// process, so any vault it initializes becomes unreadable after a restart.
/// Persist the key (see the `fieldvault-key-file` crate) for real deployments.
#[derive(Debug, Clone)]
pub struct StaticMasterKey {
    key: MasterKey,
}

impl StaticMasterKey {
    /// Uses the given key.
    #[must_use]
    pub fn new(key: MasterKey) -> Self {
        Self { key }
    }

    /// Generates a process-local key.
    #[must_use]
    pub fn ephemeral() -> Self {
        Self { key: MasterKey::generate() }
    }
}

impl MasterKeySource for StaticMasterKey {
    fn load(&self) -> Result<MasterKey, Error> {
        Ok(self.key.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_master_key_length_enforced() {
        let result = MasterKey::new(SecretVec::new(vec![0u8; 32]));
        assert!(matches!(result, Err(Error::InvalidKeyLength { expected: 96, actual: 32 })));
        assert!(MasterKey::new(SecretVec::new(vec![0u8; 96])).is_ok());
    }

    #[test]
    fn test_generated_keys_differ() {
        let a = MasterKey::generate();
        let b = MasterKey::generate();
        assert_eq!(a.expose().len(), MASTER_KEY_SIZE);
        assert_ne!(a.expose(), b.expose());
    }

    #[test]
    fn test_debug_redacts_key() {
        let key = MasterKey::new(SecretVec::new(vec![0x41; 96])).unwrap();
        let debug = format!("{key:?}");
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("65"));
    }

    #[test]
    fn test_static_source_returns_same_key() {
        let source = StaticMasterKey::ephemeral();
        let a = source.load().unwrap();
        let b = source.load().unwrap();
        assert_eq!(a.expose(), b.expose());
    }
}

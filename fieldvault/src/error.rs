//! Error types for `fieldvault` operations.

use std::fmt;
use std::sync::Arc;

/// Main error type for `fieldvault` operations.
///
/// Messages never carry plaintext or key material.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The key vault collection could not be read or written
    #[error("key vault unavailable: {0}")]
    KeyVaultUnavailable(#[from] StoreError),

    /// Master key material is missing, inaccessible or cannot open the vault
    #[error("master key unavailable: {0}")]
    MasterKeyUnavailable(String),

    /// A cipher call was made before the service reached the ready state
    #[error("encryption service not initialized")]
    NotInitialized {
        /// The error that moved the service into the failed state, if any
        cause: Option<Arc<Error>>,
    },

    /// Initialization was dropped before it finished
    #[error("encryption service initialization was cancelled")]
    InitializationCancelled,

    /// Encryption operation failed
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption or authentication failed.
    ///
    /// Wrong key, tampering and corruption are deliberately indistinguishable.
    #[error("decryption failed")]
    DecryptionFailed,

    /// The encrypted value could not be decoded
    #[error("malformed encrypted value: {0}")]
    MalformedEncryptedValue(String),

    /// Key material has the wrong size
    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength {
        /// Required length in bytes
        expected: usize,
        /// Length that was supplied
        actual: usize,
    },

    /// Configuration could not be parsed or is inconsistent
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Returns the initialization error carried by `NotInitialized`, if any.
    #[must_use]
    pub fn init_cause(&self) -> Option<&Self> {
        match self {
            Self::NotInitialized { cause } => cause.as_deref(),
            _ => None,
        }
    }
}

/// Errors reported by key vault storage backends.
#[derive(Debug)]
pub enum StoreError {
    /// Backend could not be reached
    Unreachable(String),

    /// A stored record could not be decoded
    Corrupt(String),

    /// A referenced record does not exist
    NotFound(String),

    /// I/O operation failed
    Io(std::io::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreachable(msg) => write!(f, "store unreachable: {msg}"),
            Self::Corrupt(msg) => write!(f, "corrupt key vault record: {msg}"),
            Self::NotFound(what) => write!(f, "not found: {what}"),
            Self::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

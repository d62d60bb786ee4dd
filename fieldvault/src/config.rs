//! Encryption configuration.

use crate::error::Error;
use crate::key_vault::DEFAULT_KEY_VAULT_NAMESPACE;
use crate::schema::{parse_namespace, SchemaMap};
use serde::Deserialize;
use std::path::Path;

/// Startup configuration for the encryption subsystem.
///
/// Read once at startup; not mutated afterwards.
///
/// # Example
///
/// ```
/// use fieldvault::config::EncryptionConfig;
///
/// let config = EncryptionConfig::from_json(r#"{
///     "keyVaultNamespace": "encryption.__keyVault",
///     "schemaMap": {
///         "mydatabase.users": {
///             "properties": {
///                 "ssn": { "encrypt": {
///                     "bsonType": "string",
///                     "algorithm": "AEAD_AES_256_CBC_HMAC_SHA_512-Deterministic"
///                 } }
///             }
///         }
///     }
/// }"#).unwrap();
///
/// assert_eq!(config.key_vault_namespace(), "encryption.__keyVault");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionConfig {
    #[serde(default = "default_key_vault_namespace")]
    key_vault_namespace: String,
    #[serde(default)]
    schema_map: SchemaMap,
}

fn default_key_vault_namespace() -> String {
    DEFAULT_KEY_VAULT_NAMESPACE.to_string()
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self { key_vault_namespace: default_key_vault_namespace(), schema_map: SchemaMap::new() }
    }
}

impl EncryptionConfig {
    /// Creates a configuration with the default key vault namespace.
    #[must_use]
    pub fn new(schema_map: SchemaMap) -> Self {
        Self { schema_map, ..Self::default() }
    }

    /// Sets the key vault namespace.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if the namespace is not `database.collection`.
    pub fn with_key_vault_namespace(mut self, namespace: impl Into<String>) -> Result<Self, Error> {
        let namespace = namespace.into();
        parse_namespace(&namespace)?;
        self.key_vault_namespace = namespace;
        Ok(self)
    }

    /// Parses a JSON configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if the document is malformed or invalid.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        parse_namespace(&config.key_vault_namespace)?;
        Ok(config)
    }

    /// Reads and parses a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if the file cannot be read or is invalid.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| Error::InvalidConfig(format!("{}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    /// Returns the key vault namespace (`database.collection`).
    #[must_use]
    pub fn key_vault_namespace(&self) -> &str {
        &self.key_vault_namespace
    }

    /// Returns the schema map.
    #[must_use]
    pub const fn schema_map(&self) -> &SchemaMap {
        &self.schema_map
    }
}

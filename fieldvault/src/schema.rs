//! Schema descriptor: which document fields are encrypted, and how.
//!
//! The map is keyed by namespace (`database.collection`) and field path. It is
//! static after startup. The data-access layer consults it to decide which
//! values pass through the cipher before a write, and whether an equality
//! query on a field is meaningful. Equality queries only work on
//! deterministic fields; against a random field they silently match nothing.
//!
//! The JSON form follows the usual schema-map shape:
//!
//! ```json
//! {
//!   "mydatabase.users": {
//!     "bsonType": "object",
//!     "properties": {
//!       "ssn": {
//!         "encrypt": {
//!           "bsonType": "string",
//!           "algorithm": "AEAD_AES_256_CBC_HMAC_SHA_512-Deterministic"
//!         }
//!       }
//!     }
//!   }
//! }
//! ```
//!
//! Nested `properties` produce dotted field paths (`address.street`).

use crate::algorithm::Algorithm;
use crate::error::Error;
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;

/// The only value type the cipher encodes.
const STRING_TYPE: &str = "string";

/// Splits a `database.collection` namespace.
///
/// # Errors
///
/// Returns `Error::InvalidConfig` if either part is empty or the separator is
/// missing.
pub fn parse_namespace(namespace: &str) -> Result<(&str, &str), Error> {
    match namespace.split_once('.') {
        Some((db, coll)) if !db.is_empty() && !coll.is_empty() => Ok((db, coll)),
        _ => Err(Error::InvalidConfig(format!(
            "namespace must be `database.collection`: {namespace}"
        ))),
    }
}

/// Required algorithm for one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldAlgorithmSpec {
    /// Dotted path of the field inside the document
    pub field_path: String,
    /// Algorithm the field must be encrypted with
    pub algorithm: Algorithm,
}

/// Encrypted fields of one collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionSchema {
    fields: BTreeMap<String, FieldAlgorithmSpec>,
}

impl CollectionSchema {
    /// Returns the spec for a field path.
    #[must_use]
    pub fn field(&self, field_path: &str) -> Option<&FieldAlgorithmSpec> {
        self.fields.get(field_path)
    }

    /// Iterates over the encrypted fields in path order.
    pub fn fields(&self) -> impl Iterator<Item = &FieldAlgorithmSpec> {
        self.fields.values()
    }
}

/// Static mapping of namespaces and field paths to algorithms.
///
/// # Example
///
/// ```
/// use fieldvault::algorithm::Algorithm;
/// use fieldvault::schema::SchemaMap;
///
/// let schema = SchemaMap::new()
///     .with_field("mydatabase.users", "ssn", Algorithm::Deterministic)
///     .with_field("mydatabase.users", "creditCardNumber", Algorithm::Random);
///
/// assert_eq!(schema.algorithm_for("mydatabase.users", "ssn"), Some(Algorithm::Deterministic));
/// assert!(!schema.supports_equality("mydatabase.users", "creditCardNumber"));
/// assert_eq!(schema.algorithm_for("mydatabase.users", "email"), None);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaMap {
    collections: BTreeMap<String, CollectionSchema>,
}

impl SchemaMap {
    /// Creates an empty schema map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an encrypted field.
    #[must_use]
    pub fn with_field(
        mut self,
        namespace: impl Into<String>,
        field_path: impl Into<String>,
        algorithm: Algorithm,
    ) -> Self {
        let field_path = field_path.into();
        self.collections
            .entry(namespace.into())
            .or_default()
            .fields
            .insert(field_path.clone(), FieldAlgorithmSpec { field_path, algorithm });
        self
    }

    /// Parses the JSON schema-map form.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if the JSON is malformed, a namespace is
    /// invalid, an algorithm is unknown, or a field declares a non-string type.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        serde_json::from_str(json).map_err(|e| Error::InvalidConfig(e.to_string()))
    }

    /// Returns the algorithm required for a field, or `None` if it is stored in
    /// plaintext.
    #[must_use]
    pub fn algorithm_for(&self, namespace: &str, field_path: &str) -> Option<Algorithm> {
        self.collection(namespace)?.field(field_path).map(|spec| spec.algorithm)
    }

    /// Whether an equality query on the field can match encrypted values.
    ///
    /// True for deterministic fields and for plaintext fields.
    #[must_use]
    pub fn supports_equality(&self, namespace: &str, field_path: &str) -> bool {
        self.algorithm_for(namespace, field_path).map_or(true, Algorithm::supports_equality)
    }

    /// Returns the schema for a namespace.
    #[must_use]
    pub fn collection(&self, namespace: &str) -> Option<&CollectionSchema> {
        self.collections.get(namespace)
    }

    /// Iterates over the encrypted fields of a namespace.
    pub fn encrypted_fields<'a>(
        &'a self,
        namespace: &str,
    ) -> impl Iterator<Item = &'a FieldAlgorithmSpec> + 'a {
        self.collections.get(namespace).into_iter().flat_map(|c| c.fields.values())
    }

    /// Iterates over the configured namespaces.
    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.collections.keys().map(String::as_str)
    }

    /// Returns `true` if no field is encrypted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.collections.values().all(|c| c.fields.is_empty())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCollection {
    #[serde(default)]
    properties: BTreeMap<String, RawProperty>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawProperty {
    #[serde(default)]
    encrypt: Option<RawEncrypt>,
    #[serde(default)]
    properties: BTreeMap<String, RawProperty>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEncrypt {
    #[serde(default)]
    bson_type: Option<String>,
    algorithm: Algorithm,
}

fn collect_fields(
    prefix: &str,
    properties: BTreeMap<String, RawProperty>,
    out: &mut BTreeMap<String, FieldAlgorithmSpec>,
) -> Result<(), Error> {
    for (name, property) in properties {
        let path = if prefix.is_empty() { name } else { format!("{prefix}.{name}") };

        match property.encrypt {
            Some(encrypt) => {
                if !property.properties.is_empty() {
                    return Err(Error::InvalidConfig(format!(
                        "field `{path}` cannot be both encrypted and nested"
                    )));
                }
                if let Some(bson_type) = encrypt.bson_type.as_deref() {
                    if bson_type != STRING_TYPE {
                        return Err(Error::InvalidConfig(format!(
                            "field `{path}` has unsupported type `{bson_type}`"
                        )));
                    }
                }
                out.insert(
                    path.clone(),
                    FieldAlgorithmSpec { field_path: path, algorithm: encrypt.algorithm },
                );
            }
            None => collect_fields(&path, property.properties, out)?,
        }
    }
    Ok(())
}

impl<'de> Deserialize<'de> for SchemaMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, RawCollection>::deserialize(deserializer)?;

        let mut collections = BTreeMap::new();
        for (namespace, collection) in raw {
            parse_namespace(&namespace).map_err(serde::de::Error::custom)?;
            let mut fields = BTreeMap::new();
            collect_fields("", collection.properties, &mut fields)
                .map_err(serde::de::Error::custom)?;
            collections.insert(namespace, CollectionSchema { fields });
        }
        Ok(Self { collections })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const USERS_SCHEMA: &str = r#"{
        "mydatabase.users": {
            "bsonType": "object",
            "encryptMetadata": { "keyId": [] },
            "properties": {
                "ssn": {
                    "encrypt": {
                        "bsonType": "string",
                        "algorithm": "AEAD_AES_256_CBC_HMAC_SHA_512-Deterministic"
                    }
                },
                "creditCardNumber": {
                    "encrypt": {
                        "bsonType": "string",
                        "algorithm": "AEAD_AES_256_CBC_HMAC_SHA_512-Random"
                    }
                },
                "address": {
                    "bsonType": "object",
                    "properties": {
                        "street": {
                            "encrypt": { "algorithm": "AEAD_AES_256_CBC_HMAC_SHA_512-Random" }
                        }
                    }
                }
            }
        }
    }"#;

    #[test]
    fn test_parse_users_schema() {
        let schema = SchemaMap::from_json(USERS_SCHEMA).unwrap();

        assert_eq!(schema.algorithm_for("mydatabase.users", "ssn"), Some(Algorithm::Deterministic));
        assert_eq!(
            schema.algorithm_for("mydatabase.users", "creditCardNumber"),
            Some(Algorithm::Random)
        );
        assert_eq!(
            schema.algorithm_for("mydatabase.users", "address.street"),
            Some(Algorithm::Random)
        );
        assert_eq!(schema.algorithm_for("mydatabase.users", "email"), None);
        assert_eq!(schema.algorithm_for("mydatabase.orders", "ssn"), None);
    }

    #[test]
    fn test_equality_support() {
        let schema = SchemaMap::from_json(USERS_SCHEMA).unwrap();

        assert!(schema.supports_equality("mydatabase.users", "ssn"));
        assert!(!schema.supports_equality("mydatabase.users", "creditCardNumber"));
        assert!(schema.supports_equality("mydatabase.users", "email"));
    }

    #[test]
    fn test_encrypted_fields_in_path_order() {
        let schema = SchemaMap::from_json(USERS_SCHEMA).unwrap();
        let paths: Vec<_> =
            schema.encrypted_fields("mydatabase.users").map(|f| f.field_path.as_str()).collect();

        assert_eq!(paths, vec!["address.street", "creditCardNumber", "ssn"]);
        assert_eq!(schema.encrypted_fields("unknown.ns").count(), 0);
    }

    #[test]
    fn test_builder_matches_json() {
        let built = SchemaMap::new()
            .with_field("mydatabase.users", "ssn", Algorithm::Deterministic)
            .with_field("mydatabase.users", "creditCardNumber", Algorithm::Random)
            .with_field("mydatabase.users", "address.street", Algorithm::Random);

        assert_eq!(built, SchemaMap::from_json(USERS_SCHEMA).unwrap());
    }

    #[test]
    fn test_unknown_algorithm_rejected() {
        let json = r#"{ "db.users": { "properties": { "ssn": {
            "encrypt": { "algorithm": "AES-GCM" } } } } }"#;
        assert!(matches!(SchemaMap::from_json(json), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_non_string_type_rejected() {
        let json = r#"{ "db.users": { "properties": { "age": {
            "encrypt": { "bsonType": "int", "algorithm": "AEAD_AES_256_CBC_HMAC_SHA_512-Random" }
        } } } }"#;
        assert!(matches!(SchemaMap::from_json(json), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_invalid_namespace_rejected() {
        let json = r#"{ "users": { "properties": {} } }"#;
        assert!(matches!(SchemaMap::from_json(json), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_parse_namespace() {
        assert_eq!(parse_namespace("encryption.__keyVault").unwrap(), ("encryption", "__keyVault"));
        assert!(parse_namespace("encryption").is_err());
        assert!(parse_namespace(".keyVault").is_err());
        assert!(parse_namespace("encryption.").is_err());
    }

    #[test]
    fn test_empty_schema() {
        assert!(SchemaMap::new().is_empty());
        assert!(!SchemaMap::from_json(USERS_SCHEMA).unwrap().is_empty());
    }
}

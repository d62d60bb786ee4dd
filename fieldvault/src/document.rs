//! Schema-driven encryption of JSON documents.
//!
//! Encrypted fields are stored as base64 strings of the wire format. Paths are
//! dotted (`address.street`); a path whose value is absent or `null` is left
//! untouched. A document is either fully transformed or left unchanged.

use crate::error::Error;
use crate::service::FieldEncryptor;
use crate::value::EncryptedValue;
use serde_json::{Map, Value};

type Document = Map<String, Value>;

impl FieldEncryptor {
    /// Encrypts every schema field present in `document`.
    ///
    /// Returns the number of fields encrypted.
    ///
    /// # Errors
    ///
    /// Returns `Error::EncryptionFailed` if an encrypted field holds a
    /// non-string value or the cipher fails. The document is left unchanged.
    pub fn encrypt_document(
        &self,
        namespace: &str,
        document: &mut Document,
    ) -> Result<usize, Error> {
        let mut replacements = Vec::new();
        for field in self.schema().encrypted_fields(namespace) {
            match lookup(document, &field.field_path) {
                None | Some(Value::Null) => {}
                Some(Value::String(plaintext)) => {
                    let value = self.encrypt_field(plaintext, field.algorithm)?;
                    replacements.push((field.field_path.as_str(), value.to_base64()));
                }
                Some(_) => {
                    return Err(Error::EncryptionFailed(format!(
                        "field `{}` is not a string",
                        field.field_path
                    )));
                }
            }
        }

        Ok(apply(document, replacements))
    }

    /// Decrypts every schema field present in `document`.
    ///
    /// Returns the number of fields decrypted.
    ///
    /// # Errors
    ///
    /// Returns `Error::MalformedEncryptedValue` if an encrypted field does not
    /// hold an encoded value, and `Error::DecryptionFailed` if verification
    /// fails. The document is left unchanged.
    pub fn decrypt_document(
        &self,
        namespace: &str,
        document: &mut Document,
    ) -> Result<usize, Error> {
        let mut replacements = Vec::new();
        for field in self.schema().encrypted_fields(namespace) {
            match lookup(document, &field.field_path) {
                None | Some(Value::Null) => {}
                Some(Value::String(encoded)) => {
                    let value = EncryptedValue::from_base64(encoded)?;
                    replacements.push((field.field_path.as_str(), self.decrypt_field(&value)?));
                }
                Some(_) => {
                    return Err(Error::MalformedEncryptedValue(format!(
                        "field `{}` does not hold an encoded value",
                        field.field_path
                    )));
                }
            }
        }

        Ok(apply(document, replacements))
    }

    /// Encrypts a query value for an equality match on `field_path`.
    ///
    /// # Errors
    ///
    /// Returns `Error::EncryptionFailed` if the field is not encrypted or uses
    /// the random algorithm, which cannot be matched.
    pub fn equality_filter(
        &self,
        namespace: &str,
        field_path: &str,
        value: &str,
    ) -> Result<EncryptedValue, Error> {
        let algorithm = self.schema().algorithm_for(namespace, field_path).ok_or_else(|| {
            Error::EncryptionFailed(format!("field `{field_path}` is not encrypted"))
        })?;

        if !algorithm.supports_equality() {
            return Err(Error::EncryptionFailed(format!(
                "field `{field_path}` uses {algorithm} and cannot be queried by equality"
            )));
        }

        self.encrypt_field(value, algorithm)
    }
}

fn lookup<'a>(document: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn apply(document: &mut Document, replacements: Vec<(&str, String)>) -> usize {
    let count = replacements.len();
    for (path, replacement) in replacements {
        if let Some(slot) = lookup_mut(document, path) {
            *slot = Value::String(replacement);
        }
    }
    count
}

fn lookup_mut<'a>(document: &'a mut Document, path: &str) -> Option<&'a mut Value> {
    let mut segments = path.split('.');
    let mut current = document.get_mut(segments.next()?)?;
    for segment in segments {
        current = current.as_object_mut()?.get_mut(segment)?;
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::Algorithm;
    use crate::cipher::FieldCipher;
    use crate::keys::{generate_data_key, DataKeyId};
    use crate::schema::SchemaMap;
    use serde_json::json;

    const USERS: &str = "mydatabase.users";

    fn encryptor() -> FieldEncryptor {
        let schema = SchemaMap::new()
            .with_field(USERS, "ssn", Algorithm::Deterministic)
            .with_field(USERS, "creditCardNumber", Algorithm::Random)
            .with_field(USERS, "address.street", Algorithm::Random);
        FieldEncryptor::new(FieldCipher::new(DataKeyId::new_v4(), generate_data_key()), schema)
    }

    fn as_document(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_document_round_trip() {
        let encryptor = encryptor();
        let original = as_document(json!({
            "name": "Alice",
            "ssn": "123-45-6789",
            "creditCardNumber": "4111-1111-1111-1111",
            "address": { "street": "1 Main St", "city": "Springfield" }
        }));

        let mut document = original.clone();
        assert_eq!(encryptor.encrypt_document(USERS, &mut document).unwrap(), 3);
        assert_eq!(document["name"], "Alice");
        assert_eq!(document["address"]["city"], "Springfield");
        assert_ne!(document["ssn"], original["ssn"]);
        assert_ne!(document["address"]["street"], original["address"]["street"]);

        assert_eq!(encryptor.decrypt_document(USERS, &mut document).unwrap(), 3);
        assert_eq!(document, original);
    }

    #[test]
    fn test_absent_fields_are_skipped() {
        let encryptor = encryptor();
        let mut document = as_document(json!({ "name": "Bob", "creditCardNumber": null }));

        assert_eq!(encryptor.encrypt_document(USERS, &mut document).unwrap(), 0);
        assert_eq!(document["creditCardNumber"], Value::Null);
    }

    #[test]
    fn test_non_string_value_is_rejected() {
        let encryptor = encryptor();
        let original = as_document(json!({ "ssn": "123-45-6789", "creditCardNumber": 4111 }));
        let mut document = original.clone();

        let result = encryptor.encrypt_document(USERS, &mut document);
        assert!(matches!(result, Err(Error::EncryptionFailed(_))));
        assert_eq!(document, original);
    }

    #[test]
    fn test_other_collections_untouched() {
        let encryptor = encryptor();
        let mut document = as_document(json!({ "ssn": "123-45-6789" }));

        assert_eq!(encryptor.encrypt_document("mydatabase.orders", &mut document).unwrap(), 0);
        assert_eq!(document["ssn"], "123-45-6789");
    }

    #[test]
    fn test_equality_filter_matches_stored_value() {
        let encryptor = encryptor();
        let mut document = as_document(json!({ "ssn": "123-45-6789" }));
        encryptor.encrypt_document(USERS, &mut document).unwrap();

        let filter = encryptor.equality_filter(USERS, "ssn", "123-45-6789").unwrap();
        assert_eq!(document["ssn"], filter.to_base64());
    }

    #[test]
    fn test_equality_filter_refuses_random_fields() {
        let encryptor = encryptor();

        let result = encryptor.equality_filter(USERS, "creditCardNumber", "4111");
        assert!(matches!(result, Err(Error::EncryptionFailed(_))));

        let result = encryptor.equality_filter(USERS, "name", "Alice");
        assert!(matches!(result, Err(Error::EncryptionFailed(_))));
    }

    #[test]
    fn test_tampered_document_fails() {
        let encryptor = encryptor();
        let mut document = as_document(json!({ "ssn": "123-45-6789" }));
        encryptor.encrypt_document(USERS, &mut document).unwrap();

        let other = encryptor.encrypt_field("987-65-4321", Algorithm::Random).unwrap();
        let mut bytes = EncryptedValue::from_base64(document["ssn"].as_str().unwrap())
            .unwrap()
            .to_bytes();
        let other_bytes = other.to_bytes();
        let tag_start = bytes.len() - 32;
        bytes[tag_start..].copy_from_slice(&other_bytes[other_bytes.len() - 32..]);
        document.insert(
            "ssn".to_string(),
            Value::String(EncryptedValue::from_bytes(&bytes).unwrap().to_base64()),
        );

        let result = encryptor.decrypt_document(USERS, &mut document);
        assert!(matches!(result, Err(Error::DecryptionFailed)));
    }

    #[test]
    fn test_plaintext_in_encrypted_field_is_malformed() {
        let encryptor = encryptor();
        let mut document = as_document(json!({ "ssn": "123-45-6789" }));

        let result = encryptor.decrypt_document(USERS, &mut document);
        assert!(matches!(result, Err(Error::MalformedEncryptedValue(_))));
    }
}

//! Encrypted field value and its wire format.
//!
//! Format:
//! ```text
//! [algorithm:1][key_id:16][value_type:1][iv:16][ciphertext:16n][tag:32]
//! ```
//!
//! The first 18 bytes double as the associated data authenticated by the tag,
//! so changing the algorithm, key id or value type invalidates the value.

use crate::aead::{BLOCK_SIZE, IV_SIZE, TAG_SIZE};
use crate::algorithm::Algorithm;
use crate::error::Error;
use crate::keys::DataKeyId;
use base64::{engine::general_purpose::STANDARD, Engine};

/// Value type marker for UTF-8 strings.
pub const VALUE_TYPE_STRING: u8 = 0x02;

const KEY_ID_SIZE: usize = 16;

/// Length of the authenticated prefix.
pub const AAD_SIZE: usize = 1 + KEY_ID_SIZE + 1;

/// Smallest valid encoding: prefix, IV, one block, tag.
pub const MIN_ENCODED_SIZE: usize = AAD_SIZE + IV_SIZE + BLOCK_SIZE + TAG_SIZE;

/// An encrypted field value.
///
/// Immutable once produced. Two deterministic values over the same plaintext
/// and key compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EncryptedValue {
    algorithm: Algorithm,
    key_id: DataKeyId,
    value_type: u8,
    iv: [u8; IV_SIZE],
    ciphertext: Vec<u8>,
    tag: [u8; TAG_SIZE],
}

impl EncryptedValue {
    pub(crate) fn new(
        algorithm: Algorithm,
        key_id: DataKeyId,
        iv: [u8; IV_SIZE],
        ciphertext: Vec<u8>,
        tag: [u8; TAG_SIZE],
    ) -> Self {
        Self { algorithm, key_id, value_type: VALUE_TYPE_STRING, iv, ciphertext, tag }
    }

    /// Builds the associated data bound into the tag.
    pub(crate) fn associated_data(
        algorithm: Algorithm,
        key_id: &DataKeyId,
        value_type: u8,
    ) -> [u8; AAD_SIZE] {
        let mut aad = [0u8; AAD_SIZE];
        aad[0] = algorithm.tag();
        aad[1..=KEY_ID_SIZE].copy_from_slice(key_id.as_bytes());
        aad[AAD_SIZE - 1] = value_type;
        aad
    }

    /// Returns the algorithm that produced this value.
    #[must_use]
    pub const fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Returns the id of the data key this value was encrypted under.
    #[must_use]
    pub const fn key_id(&self) -> DataKeyId {
        self.key_id
    }

    /// Returns the value type marker.
    #[must_use]
    pub const fn value_type(&self) -> u8 {
        self.value_type
    }

    /// Returns the initialization vector.
    #[must_use]
    pub const fn iv(&self) -> &[u8; IV_SIZE] {
        &self.iv
    }

    /// Returns the ciphertext.
    #[must_use]
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    /// Returns the authentication tag.
    #[must_use]
    pub const fn tag(&self) -> &[u8; TAG_SIZE] {
        &self.tag
    }

    /// Serializes the value to bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let aad = Self::associated_data(self.algorithm, &self.key_id, self.value_type);

        let mut bytes = Vec::with_capacity(AAD_SIZE + IV_SIZE + self.ciphertext.len() + TAG_SIZE);
        bytes.extend_from_slice(&aad);
        bytes.extend_from_slice(&self.iv);
        bytes.extend_from_slice(&self.ciphertext);
        bytes.extend_from_slice(&self.tag);
        bytes
    }

    /// Deserializes a value from bytes.
    ///
    /// This only checks framing; authenticity is verified on decrypt.
    ///
    /// # Errors
    ///
    /// Returns `Error::MalformedEncryptedValue` if:
    /// - The data is too short
    /// - The algorithm tag or value type is unknown
    /// - The ciphertext is not a whole number of blocks
    pub fn from_bytes(data: &[u8]) -> Result<Self, Error> {
        if data.len() < MIN_ENCODED_SIZE {
            return Err(Error::MalformedEncryptedValue(format!(
                "too short: {} bytes (min: {MIN_ENCODED_SIZE})",
                data.len()
            )));
        }

        let algorithm = Algorithm::from_tag(data[0]).ok_or_else(|| {
            Error::MalformedEncryptedValue(format!("unknown algorithm tag: {}", data[0]))
        })?;

        let mut key_id = [0u8; KEY_ID_SIZE];
        key_id.copy_from_slice(&data[1..=KEY_ID_SIZE]);

        let value_type = data[AAD_SIZE - 1];
        if value_type != VALUE_TYPE_STRING {
            return Err(Error::MalformedEncryptedValue(format!(
                "unsupported value type: {value_type:#04x}"
            )));
        }

        let body = &data[AAD_SIZE..];
        let (iv_bytes, rest) = body.split_at(IV_SIZE);
        let (ciphertext, tag_bytes) = rest.split_at(rest.len() - TAG_SIZE);

        if ciphertext.len() % BLOCK_SIZE != 0 {
            return Err(Error::MalformedEncryptedValue(format!(
                "ciphertext length {} is not a multiple of {BLOCK_SIZE}",
                ciphertext.len()
            )));
        }

        let mut iv = [0u8; IV_SIZE];
        iv.copy_from_slice(iv_bytes);
        let mut tag = [0u8; TAG_SIZE];
        tag.copy_from_slice(tag_bytes);

        Ok(Self {
            algorithm,
            key_id: DataKeyId::from_bytes(key_id),
            value_type,
            iv,
            ciphertext: ciphertext.to_vec(),
            tag,
        })
    }

    /// Encodes the value as standard base64.
    #[must_use]
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.to_bytes())
    }

    /// Decodes a base64 encoded value.
    ///
    /// # Errors
    ///
    /// Returns `Error::MalformedEncryptedValue` if the text is not base64 or
    /// the decoded bytes are malformed.
    pub fn from_base64(text: &str) -> Result<Self, Error> {
        let bytes = STANDARD
            .decode(text.trim())
            .map_err(|e| Error::MalformedEncryptedValue(format!("invalid base64: {e}")))?;
        Self::from_bytes(&bytes)
    }
}

//! AEAD_AES_256_CBC_HMAC_SHA_512 construction.
//!
//! A 96-byte key is split into three 32-byte sub-keys:
//!
//! ```text
//! [enc_key:32][mac_key:32][iv_key:32]
//! ```
//!
//! - `enc_key` drives AES-256-CBC with PKCS#7 padding
//! - `mac_key` computes `HMAC-SHA-512(aad || iv || ciphertext || al)`, truncated to 32 bytes
//! - `iv_key` derives the synthetic IV in deterministic mode:
//!   `HMAC-SHA-512(aad || al || plaintext)`, truncated to 16 bytes
//!
//! `al` is the bit length of the associated data as a 64-bit big-endian integer.
//! Opening verifies the tag in constant time before any block is decrypted.

use crate::algorithm::Algorithm;
use crate::error::Error;
use aes::Aes256;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use sha2::Sha512;
use zeroize::Zeroizing;

type HmacSha512 = Hmac<Sha512>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Total key size in bytes.
pub const KEY_SIZE: usize = 96;

/// Size of each sub-key.
const SUB_KEY_SIZE: usize = 32;

/// AES block size, also the IV size.
pub const BLOCK_SIZE: usize = 16;

/// Initialization vector size.
pub const IV_SIZE: usize = BLOCK_SIZE;

/// Truncated HMAC-SHA-512 tag size.
pub const TAG_SIZE: usize = 32;

/// Output of a seal operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    /// IV used for CBC
    pub iv: [u8; IV_SIZE],
    /// Padded CBC ciphertext
    pub ciphertext: Vec<u8>,
    /// Authentication tag
    pub tag: [u8; TAG_SIZE],
}

struct SubKeys<'a> {
    enc: &'a [u8],
    mac: &'a [u8],
    iv: &'a [u8],
}

fn split_key(key: &[u8]) -> Result<SubKeys<'_>, Error> {
    if key.len() != KEY_SIZE {
        return Err(Error::InvalidKeyLength { expected: KEY_SIZE, actual: key.len() });
    }
    let (enc, rest) = key.split_at(SUB_KEY_SIZE);
    let (mac, iv) = rest.split_at(SUB_KEY_SIZE);
    Ok(SubKeys { enc, mac, iv })
}

fn aad_bit_length(aad: &[u8]) -> [u8; 8] {
    (aad.len() as u64 * 8).to_be_bytes()
}

fn new_mac(key: &[u8]) -> HmacSha512 {
    // HMAC accepts keys of any length
    <HmacSha512 as Mac>::new_from_slice(key).unwrap_or_else(|_| unreachable!())
}

fn authenticator(mac_key: &[u8], aad: &[u8], iv: &[u8], ciphertext: &[u8]) -> HmacSha512 {
    let mut mac = new_mac(mac_key);
    mac.update(aad);
    mac.update(iv);
    mac.update(ciphertext);
    mac.update(&aad_bit_length(aad));
    mac
}

fn synthetic_iv(iv_key: &[u8], aad: &[u8], plaintext: &[u8]) -> [u8; IV_SIZE] {
    let mut mac = new_mac(iv_key);
    mac.update(aad);
    mac.update(&aad_bit_length(aad));
    mac.update(plaintext);
    let digest = mac.finalize().into_bytes();

    let mut iv = [0u8; IV_SIZE];
    iv.copy_from_slice(&digest[..IV_SIZE]);
    iv
}

/// Encrypts and authenticates `plaintext` under a 96-byte key.
///
/// # Errors
///
/// Returns `Error::InvalidKeyLength` if the key is not 96 bytes and
/// `Error::EncryptionFailed` if the block cipher cannot be keyed.
pub fn seal(
    key: &[u8],
    algorithm: Algorithm,
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Sealed, Error> {
    let keys = split_key(key)?;

    let iv = match algorithm {
        Algorithm::Deterministic => synthetic_iv(keys.iv, aad, plaintext),
        Algorithm::Random => {
            let mut iv = [0u8; IV_SIZE];
            OsRng.fill_bytes(&mut iv);
            iv
        }
    };

    seal_with_iv(&keys, iv, aad, plaintext)
}

fn seal_with_iv(
    keys: &SubKeys<'_>,
    iv: [u8; IV_SIZE],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Sealed, Error> {
    let ciphertext = Aes256CbcEnc::new_from_slices(keys.enc, &iv)
        .map_err(|_| Error::EncryptionFailed("invalid cipher key".to_string()))?
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let digest = authenticator(keys.mac, aad, &iv, &ciphertext).finalize().into_bytes();
    let mut tag = [0u8; TAG_SIZE];
    tag.copy_from_slice(&digest[..TAG_SIZE]);

    Ok(Sealed { iv, ciphertext, tag })
}

/// Verifies and decrypts a sealed payload.
///
/// Every failure after key validation collapses into `Error::DecryptionFailed`.
///
/// # Errors
///
/// Returns `Error::InvalidKeyLength` for a malformed key, otherwise
/// `Error::DecryptionFailed` if the tag does not verify or the padding is invalid.
pub fn open(
    key: &[u8],
    aad: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
    tag: &[u8],
) -> Result<Zeroizing<Vec<u8>>, Error> {
    let keys = split_key(key)?;

    if tag.len() != TAG_SIZE {
        return Err(Error::DecryptionFailed);
    }
    authenticator(keys.mac, aad, iv, ciphertext)
        .verify_truncated_left(tag)
        .map_err(|_| Error::DecryptionFailed)?;

    let plaintext = Aes256CbcDec::new_from_slices(keys.enc, iv)
        .map_err(|_| Error::DecryptionFailed)?
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| Error::DecryptionFailed)?;

    Ok(Zeroizing::new(plaintext))
}

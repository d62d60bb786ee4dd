//! Field encryption algorithms.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Authenticated encryption policy for a field.
///
/// Both policies use AEAD_AES_256_CBC_HMAC_SHA_512; they differ only in how
/// the initialization vector is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Algorithm {
    /// Synthetic IV derived from the plaintext. Equal plaintexts produce equal
    /// ciphertexts, which enables exact-match queries and leaks equality.
    #[default]
    Deterministic,
    /// Fresh random IV per call. Equality queries are impossible.
    Random,
}

impl Algorithm {
    /// Wire tag used in encoded values.
    #[must_use]
    pub const fn tag(self) -> u8 {
        match self {
            Self::Deterministic => 1,
            Self::Random => 2,
        }
    }

    /// Parses a wire tag.
    #[must_use]
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Deterministic),
            2 => Some(Self::Random),
            _ => None,
        }
    }

    /// Canonical algorithm name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Deterministic => "AEAD_AES_256_CBC_HMAC_SHA_512-Deterministic",
            Self::Random => "AEAD_AES_256_CBC_HMAC_SHA_512-Random",
        }
    }

    /// Whether exact-match queries over ciphertext are meaningful.
    #[must_use]
    pub const fn supports_equality(self) -> bool {
        matches!(self, Self::Deterministic)
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Algorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AEAD_AES_256_CBC_HMAC_SHA_512-Deterministic" | "deterministic" => {
                Ok(Self::Deterministic)
            }
            "AEAD_AES_256_CBC_HMAC_SHA_512-Random" | "random" => Ok(Self::Random),
            other => Err(Error::InvalidConfig(format!("unknown algorithm: {other}"))),
        }
    }
}

impl TryFrom<String> for Algorithm {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Algorithm> for String {
    fn from(algorithm: Algorithm) -> Self {
        algorithm.name().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_algorithm_names_parse() {
        for algorithm in [Algorithm::Deterministic, Algorithm::Random] {
            assert_eq!(algorithm.name().parse::<Algorithm>().unwrap(), algorithm);
            assert_eq!(Algorithm::from_tag(algorithm.tag()), Some(algorithm));
        }
    }

    #[test]
    fn test_short_names() {
        assert_eq!("deterministic".parse::<Algorithm>().unwrap(), Algorithm::Deterministic);
        assert_eq!("random".parse::<Algorithm>().unwrap(), Algorithm::Random);
        assert!(matches!("AES-GCM".parse::<Algorithm>(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_unknown_tag() {
        assert_eq!(Algorithm::from_tag(0), None);
        assert_eq!(Algorithm::from_tag(3), None);
    }

    #[test]
    fn test_default_is_deterministic() {
        assert_eq!(Algorithm::default(), Algorithm::Deterministic);
        assert!(Algorithm::Deterministic.supports_equality());
        assert!(!Algorithm::Random.supports_equality());
    }

    #[test]
    fn test_serde_uses_canonical_name() {
        let json = serde_json::to_string(&Algorithm::Random).unwrap();
        assert_eq!(json, "\"AEAD_AES_256_CBC_HMAC_SHA_512-Random\"");
        let parsed: Algorithm = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, Algorithm::Random);
    }
}

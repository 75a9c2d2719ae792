//! Fingerprints and cache keys

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::category::Category;
use crate::CacheError;

/// Fixed-length content-addressed hash (SHA-256)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; Fingerprint::LEN]);

impl Fingerprint {
    /// Digest length in bytes
    pub const LEN: usize = 32;

    /// Wrap raw digest bytes
    pub fn from_bytes(bytes: [u8; Fingerprint::LEN]) -> Self {
        Self(bytes)
    }

    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8; Fingerprint::LEN] {
        &self.0
    }

    /// Lowercase hex encoding
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a 64-character hex string
    pub fn from_hex(s: &str) -> Result<Self, CacheError> {
        let mut out = [0u8; Fingerprint::LEN];
        hex::decode_to_slice(s, &mut out)
            .map_err(|e| CacheError::InvalidInput(format!("bad fingerprint {s:?}: {e}")))?;
        Ok(Self(out))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({}…)", &self.to_hex()[..12])
    }
}

impl FromStr for Fingerprint {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Fingerprint::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Cache key: a fingerprint scoped to a category
///
/// Keys are unique per category; the same fingerprint in two categories
/// names two unrelated entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub category: Category,
    pub fingerprint: Fingerprint,
}

impl CacheKey {
    pub fn new(category: Category, fingerprint: Fingerprint) -> Self {
        Self {
            category,
            fingerprint,
        }
    }

    /// Key string used by durable backends: `<category>:<hex>`
    pub fn storage_key(&self) -> String {
        format!("{}:{}", self.category, self.fingerprint)
    }

    /// Inverse of [`CacheKey::storage_key`]
    pub fn parse_storage_key(s: &str) -> Result<Self, CacheError> {
        let (category, hex) = s
            .split_once(':')
            .ok_or_else(|| CacheError::InvalidInput(format!("malformed storage key: {s}")))?;
        Ok(Self::new(category.parse()?, hex.parse()?))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.category, self.fingerprint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(byte: u8) -> Fingerprint {
        Fingerprint::from_bytes([byte; Fingerprint::LEN])
    }

    #[test]
    fn test_hex_format() {
        let hex = fp(0xab).to_hex();
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(Fingerprint::from_hex(&hex).unwrap(), fp(0xab));
    }

    #[test]
    fn test_from_hex_rejects_wrong_length() {
        assert!(Fingerprint::from_hex("abcd").is_err());
        assert!(Fingerprint::from_hex(&"zz".repeat(32)).is_err());
    }

    #[test]
    fn test_storage_key() {
        let key = CacheKey::new(Category::Screenshot, fp(1));
        let s = key.storage_key();
        assert!(s.starts_with("screenshot:0101"));
        assert_eq!(CacheKey::parse_storage_key(&s).unwrap(), key);
    }

    #[test]
    fn test_same_fingerprint_distinct_categories() {
        let a = CacheKey::new(Category::Asset, fp(7));
        let b = CacheKey::new(Category::Screenshot, fp(7));
        assert_ne!(a, b);
        assert_ne!(a.storage_key(), b.storage_key());
    }

    #[test]
    fn test_fingerprint_serializes_as_hex_string() {
        let json = serde_json::to_string(&fp(0x0f)).unwrap();
        assert_eq!(json, format!("\"{}\"", "0f".repeat(32)));
    }
}

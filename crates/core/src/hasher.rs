//! Content hashing: stable node identities and whole-tree checksums.
//!
//! Everything here is a pure function over its input. SHA-256 is used for
//! both purposes because identities and ledger dedup keys are derived from
//! the digest, so collision resistance is a correctness property.
//!
//! Identities are truncated to [`IDENTITY_HEX_LEN`] hex characters (64 bits).
//! At the expected scale of tens of thousands of nodes per tree the birthday
//! bound puts the collision probability below one in ten million; a collision
//! would surface as a `TreeError::DuplicateId` during validation rather than
//! as silent data loss.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::errors::HashError;
use crate::tree::NodeId;

/// Number of hex characters kept from the digest for node identities.
pub const IDENTITY_HEX_LEN: usize = 16;

/// Canonical digest of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checksum(String);

impl Checksum {
    /// Wrap an already computed hex digest (e.g. read back from storage).
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, for log lines.
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }

    /// True for a full SHA-256 digest in lowercase hex.
    pub fn is_well_formed(&self) -> bool {
        self.0.len() == 64
            && self
                .0
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Type-tagged composite key a node identity is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityKey<'a> {
    /// Bookmarks are identified by URL alone.
    Bookmark { url: &'a str },
    /// Folders by their parent path and title.
    Folder { path: &'a str, title: &'a str },
    /// Separators have no title, so their sibling position stands in for it.
    Separator { path: &'a str, position: usize },
}

impl IdentityKey<'_> {
    fn composite(&self) -> String {
        match self {
            Self::Bookmark { url } => format!("bookmark:{url}"),
            Self::Folder { path, title } => format!("folder:{path}/{title}"),
            Self::Separator { path, position } => format!("separator:{path}/{position}"),
        }
    }
}

/// Full hex SHA-256 digest of `bytes`.
pub fn hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Derive the stable identity for a node from its composite key.
pub fn identity(key: IdentityKey<'_>) -> NodeId {
    let digest = hash(key.composite().as_bytes());
    NodeId::new(&digest[..IDENTITY_HEX_LEN])
}

/// Serialize `value` to JSON with every object's keys sorted recursively.
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<String, HashError> {
    let value = serde_json::to_value(value)?;
    Ok(serde_json::to_string(&canonicalize(value))?)
}

/// Checksum of any serializable value; logically identical values always
/// produce the same digest regardless of field order.
pub fn checksum<T: Serialize + ?Sized>(value: &T) -> Result<Checksum, HashError> {
    let json = canonical_json(value)?;
    Ok(Checksum(hash(json.as_bytes())))
}

/// Recursively sort object keys. Array order is kept: children order is
/// meaningful and must change the digest.
///
/// `serde_json::Map` iteration order depends on the `preserve_order`
/// feature, which any crate in the dependency graph may switch on, so the
/// sort is done explicitly.
pub fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (key, inner) in entries {
                sorted.insert(key, canonicalize(inner));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_short_never_splits_a_char() {
        assert_eq!(Checksum::from_hex("aéééééé").short(), "aéééééé");
        assert_eq!(Checksum::from_hex("abc").short(), "abc");
        assert_eq!(Checksum::from_hex(hash(b"abc")).short(), "ba7816bf");
    }

    #[test]
    fn test_well_formed_checksum() {
        assert!(Checksum::from_hex(hash(b"abc")).is_well_formed());
        assert!(!Checksum::from_hex("abc").is_well_formed());
        assert!(!Checksum::from_hex(hash(b"abc").to_uppercase()).is_well_formed());
        assert!(!Checksum::from_hex("é".repeat(32)).is_well_formed());
    }

    #[test]
    fn test_hash_is_sha256_hex() {
        assert_eq!(
            hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_checksum_ignores_key_order() {
        let a = json!({"title": "X", "url": "https://x.com", "meta": {"b": 1, "a": 2}});
        let b = json!({"meta": {"a": 2, "b": 1}, "url": "https://x.com", "title": "X"});
        assert_eq!(checksum(&a).unwrap(), checksum(&b).unwrap());
    }

    #[test]
    fn test_checksum_sensitive_to_array_order() {
        let a = json!({"children": [1, 2]});
        let b = json!({"children": [2, 1]});
        assert_ne!(checksum(&a).unwrap(), checksum(&b).unwrap());
    }

    #[test]
    fn test_checksum_sensitive_to_leaf_change() {
        let a = json!({"title": "X"});
        let b = json!({"title": "Y"});
        assert_ne!(checksum(&a).unwrap(), checksum(&b).unwrap());
    }

    #[test]
    fn test_identity_is_stable_and_truncated() {
        let a = identity(IdentityKey::Bookmark { url: "https://a.com" });
        let b = identity(IdentityKey::Bookmark { url: "https://a.com" });
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), IDENTITY_HEX_LEN);
    }

    #[test]
    fn test_identity_is_type_tagged() {
        let bookmark = identity(IdentityKey::Bookmark { url: "toolbar/x" });
        let folder = identity(IdentityKey::Folder {
            path: "toolbar",
            title: "x",
        });
        assert_ne!(bookmark, folder);
    }

    #[test]
    fn test_canonical_json_sorts_nested_keys() {
        let out = canonical_json(&json!({"z": {"y": 1, "x": 2}, "a": [ {"d": 1, "c": 2} ]})).unwrap();
        assert_eq!(out, r#"{"a":[{"c":2,"d":1}],"z":{"x":2,"y":1}}"#);
    }
}

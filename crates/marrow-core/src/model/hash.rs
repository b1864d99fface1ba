//! Content hashes.
//!
//! Every operation and identity is addressed by the BLAKE3 hash of its
//! canonical JSON encoding, written as 64 lowercase hex characters. Entity
//! ids are the hash of the entity's creation operation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Number of hex characters shown in human-facing ids.
pub const HUMAN_ID_LEN: usize = 7;

const HEX_LEN: usize = 64;

/// A BLAKE3 content hash in lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

/// Id of an entity (the hash of its creation operation).
pub type EntityId = ContentHash;

/// Id of an identity (the hash of its content).
pub type IdentityId = ContentHash;

/// Error returned when parsing a malformed hash string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid content hash '{raw}': expected {HEX_LEN} lowercase hex characters")]
pub struct ParseHashError {
    /// The rejected input.
    pub raw: String,
}

impl ContentHash {
    /// Hash raw bytes.
    #[must_use]
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(blake3::hash(bytes).to_hex().to_string())
    }

    /// Parse a full 64-char hex hash.
    pub fn parse(raw: &str) -> Result<Self, ParseHashError> {
        let valid = raw.len() == HEX_LEN
            && raw
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if valid {
            Ok(Self(raw.to_string()))
        } else {
            Err(ParseHashError {
                raw: raw.to_string(),
            })
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form for display (`HUMAN_ID_LEN` chars).
    #[must_use]
    pub fn human(&self) -> &str {
        &self.0[..HUMAN_ID_LEN]
    }

    /// True if this hash starts with `prefix` (case-insensitive).
    #[must_use]
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.0.starts_with(&prefix.to_ascii_lowercase())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ContentHash {
    type Err = ParseHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ContentHash {
    type Error = ParseHashError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ContentHash> for String {
    fn from(value: ContentHash) -> Self {
        value.0
    }
}

impl AsRef<str> for ContentHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

//! Identities: authors of operations.
//!
//! An identity is content-addressed like an operation. Imported identities
//! carry provenance metadata (for example `github-login = octocat`) that the
//! registry uses to recognise the same remote person across runs.

mod registry;

pub use registry::IdentityRegistry;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::canonical::to_canonical_string;
use crate::error::ErrorCode;
use crate::model::hash::{ContentHash, IdentityId};
use crate::store::StoreError;

/// User-facing fields of an identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub login: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl IdentityProfile {
    #[must_use]
    pub fn with_login(login: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            ..Self::default()
        }
    }
}

/// Serialized form of an identity; its canonical encoding is hashed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityData {
    #[serde(flatten)]
    pub profile: IdentityProfile,
    pub nonce: String,
}

/// A content-addressed identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    id: IdentityId,
    #[serde(flatten)]
    data: IdentityData,
}

impl Identity {
    /// Build a new identity with a fresh nonce.
    ///
    /// # Errors
    ///
    /// [`IdentityError::InvalidInput`] for an empty or multi-line login.
    pub fn new(profile: IdentityProfile) -> Result<Self, IdentityError> {
        if profile.login.trim().is_empty() || profile.login.contains('\n') {
            return Err(IdentityError::InvalidInput(format!(
                "invalid login '{}'",
                profile.login
            )));
        }
        let data = IdentityData {
            profile,
            nonce: format!("{:016x}", rand::random::<u64>()),
        };
        Ok(Self::from_data(data)?)
    }

    /// Seal stored data, computing the id.
    pub fn from_data(data: IdentityData) -> Result<Self, serde_json::Error> {
        let encoded = to_canonical_string(&data)?;
        Ok(Self {
            id: ContentHash::of_bytes(encoded.as_bytes()),
            data,
        })
    }

    /// Canonical JSON encoding.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        to_canonical_string(&self.data)
    }

    #[must_use]
    pub const fn id(&self) -> &IdentityId {
        &self.id
    }

    #[must_use]
    pub fn login(&self) -> &str {
        &self.data.profile.login
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.data.profile.name.as_deref()
    }

    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.data.profile.email.as_deref()
    }

    #[must_use]
    pub fn avatar_url(&self) -> Option<&str> {
        self.data.profile.avatar_url.as_deref()
    }

    #[must_use]
    pub const fn metadata(&self) -> &BTreeMap<String, String> {
        &self.data.profile.metadata
    }

    #[must_use]
    pub fn get_metadata(&self, key: &str) -> Option<&str> {
        self.data.profile.metadata.get(key).map(String::as_str)
    }

    /// Name if set, otherwise login.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name().unwrap_or_else(|| self.login())
    }

    #[must_use]
    pub const fn data(&self) -> &IdentityData {
        &self.data
    }
}

/// Errors raised by the identity registry.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("identity not found: {0}")]
    NotFound(String),

    #[error("{} identities claim {key}={value}", matches.len())]
    AmbiguousMatch {
        key: String,
        value: String,
        matches: Vec<IdentityId>,
    },

    #[error("identity prefix '{prefix}' matches {} identities", matches.len())]
    AmbiguousPrefix {
        prefix: String,
        matches: Vec<IdentityId>,
    },

    #[error("invalid identity: {0}")]
    InvalidInput(String),

    #[error("failed to encode identity: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IdentityError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::IdentityNotFound,
            Self::AmbiguousMatch { .. } => ErrorCode::AmbiguousMatch,
            Self::AmbiguousPrefix { .. } => ErrorCode::AmbiguousId,
            Self::InvalidInput(_) => ErrorCode::InvalidInput,
            Self::Encode(_) => ErrorCode::InternalUnexpected,
            Self::Store(e) => e.code(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_hash_of_content() {
        let a = Identity::new(IdentityProfile::with_login("octocat")).expect("identity");
        let b = Identity::from_data(a.data().clone()).expect("seal");
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn same_profile_twice_is_two_identities() {
        let a = Identity::new(IdentityProfile::with_login("octocat")).expect("identity");
        let b = Identity::new(IdentityProfile::with_login("octocat")).expect("identity");
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn rejects_empty_login() {
        assert!(matches!(
            Identity::new(IdentityProfile::with_login(" ")),
            Err(IdentityError::InvalidInput(_))
        ));
    }

    #[test]
    fn display_name_falls_back_to_login() {
        let plain = Identity::new(IdentityProfile::with_login("octocat")).expect("identity");
        assert_eq!(plain.display_name(), "octocat");
        let named = Identity::new(IdentityProfile {
            name: Some("Mona".into()),
            ..IdentityProfile::with_login("octocat")
        })
        .expect("identity");
        assert_eq!(named.display_name(), "Mona");
    }

    #[test]
    fn encoding_is_flat() {
        let mut profile = IdentityProfile::with_login("octocat");
        profile.metadata.insert("github-login".into(), "octocat".into());
        let ident = Identity::new(profile).expect("identity");
        let encoded = ident.encode().expect("encode");
        assert!(encoded.contains(r#""login":"octocat""#));
        assert!(encoded.contains(r#""nonce":"#));
        let back: IdentityData = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(&back, ident.data());
    }
}

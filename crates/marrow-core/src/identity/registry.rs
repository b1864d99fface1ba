use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use super::{Identity, IdentityError, IdentityProfile};
use crate::model::hash::IdentityId;
use crate::store::Store;

/// In-memory index of all identities, backed by a [`Store`].
///
/// Lookups take the read lock. `ensure_identity` holds the write lock across
/// resolve-and-create so two concurrent imports of the same remote login
/// cannot both create an identity.
pub struct IdentityRegistry {
    store: Arc<dyn Store>,
    by_id: RwLock<BTreeMap<IdentityId, Identity>>,
}

impl IdentityRegistry {
    /// Load every identity from the store.
    pub fn load(store: Arc<dyn Store>) -> Result<Self, IdentityError> {
        let mut by_id = BTreeMap::new();
        for identity in store.read_identities()? {
            by_id.insert(identity.id().clone(), identity);
        }
        debug!(count = by_id.len(), "loaded identities");
        Ok(Self {
            store,
            by_id: RwLock::new(by_id),
        })
    }

    pub fn get(&self, id: &IdentityId) -> Result<Identity, IdentityError> {
        self.by_id
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| IdentityError::NotFound(id.to_string()))
    }

    /// Resolve a (possibly abbreviated) id.
    pub fn resolve_prefix(&self, prefix: &str) -> Result<Identity, IdentityError> {
        let map = self.by_id.read();
        let matches: Vec<&Identity> = map.values().filter(|i| i.id().has_prefix(prefix)).collect();
        match matches.as_slice() {
            [] => Err(IdentityError::NotFound(prefix.to_string())),
            [one] => Ok((*one).clone()),
            many => Err(IdentityError::AmbiguousPrefix {
                prefix: prefix.to_string(),
                matches: many.iter().map(|i| i.id().clone()).collect(),
            }),
        }
    }

    /// The unique identity holding metadata `key = value`.
    ///
    /// # Errors
    ///
    /// [`IdentityError::NotFound`] when none holds it,
    /// [`IdentityError::AmbiguousMatch`] when several do.
    pub fn resolve_by_metadata(&self, key: &str, value: &str) -> Result<Identity, IdentityError> {
        let map = self.by_id.read();
        find_by_metadata(&map, key, value)
    }

    /// Return the identity holding `key = profile.login`, creating it (with
    /// that metadata attached) when none exists. The boolean is `true` when
    /// a new identity was created.
    pub fn ensure_identity(
        &self,
        key: &str,
        mut profile: IdentityProfile,
    ) -> Result<(Identity, bool), IdentityError> {
        let mut map = self.by_id.write();
        match find_by_metadata(&map, key, &profile.login) {
            Ok(existing) => return Ok((existing, false)),
            Err(IdentityError::NotFound(_)) => {}
            Err(other) => return Err(other),
        }

        profile
            .metadata
            .insert(key.to_string(), profile.login.clone());
        let identity = Identity::new(profile)?;
        self.store.append_identity(&identity)?;
        debug!(id = %identity.id().human(), login = identity.login(), "created identity");
        map.insert(identity.id().clone(), identity.clone());
        Ok((identity, true))
    }

    /// Create an identity without any dedup check.
    pub fn new_identity_raw(&self, profile: IdentityProfile) -> Result<Identity, IdentityError> {
        let identity = Identity::new(profile)?;
        let mut map = self.by_id.write();
        self.store.append_identity(&identity)?;
        map.insert(identity.id().clone(), identity.clone());
        Ok(identity)
    }

    /// Add an identity built elsewhere (another clone). Returns `false` if it
    /// was already known.
    pub fn import(&self, identity: Identity) -> Result<bool, IdentityError> {
        let mut map = self.by_id.write();
        if map.contains_key(identity.id()) {
            return Ok(false);
        }
        for (key, value) in identity.metadata() {
            if map.values().any(|i| i.get_metadata(key) == Some(value.as_str())) {
                warn!(
                    key = key.as_str(),
                    value = value.as_str(),
                    id = %identity.id().human(),
                    "imported identity duplicates metadata"
                );
            }
        }
        self.store.append_identity(&identity)?;
        map.insert(identity.id().clone(), identity);
        Ok(true)
    }

    /// All identities, ordered by id.
    #[must_use]
    pub fn all(&self) -> Vec<Identity> {
        self.by_id.read().values().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.read().is_empty()
    }
}

fn find_by_metadata(
    map: &BTreeMap<IdentityId, Identity>,
    key: &str,
    value: &str,
) -> Result<Identity, IdentityError> {
    let matches: Vec<&Identity> = map
        .values()
        .filter(|i| i.get_metadata(key) == Some(value))
        .collect();
    match matches.as_slice() {
        [] => Err(IdentityError::NotFound(format!("{key}={value}"))),
        [one] => Ok((*one).clone()),
        many => Err(IdentityError::AmbiguousMatch {
            key: key.to_string(),
            value: value.to_string(),
            matches: many.iter().map(|i| i.id().clone()).collect(),
        }),
    }
}

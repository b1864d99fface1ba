//! Entity cache.
//!
//! [`RepoCache`] sits between callers and the [`Store`]: it replays every log
//! once at open, keeps an [`EntityExcerpt`] per entity for listing and
//! metadata lookups, and hands out per-entity [`EntityGuard`]s for mutation.
//! There is no repository-wide lock; two guards on different entities never
//! contend.
//!
//! Lock order: an entity mutex may be held while briefly taking the excerpt
//! or entity-map locks, never the other way round.

mod entity;
mod excerpt;

pub use entity::EntityGuard;
pub use excerpt::EntityExcerpt;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::error::ErrorCode;
use crate::identity::{IdentityError, IdentityRegistry};
use crate::model::hash::{EntityId, IdentityId};
use crate::model::{Entity, MergeOutcome, ModelError, OpPayload, Operation, Snapshot};
use crate::store::{Store, StoreError};
use entity::CachedEntity;

/// Metadata key on a `no_op` marking the operation it records facts about.
pub const EXPORT_MARKER_KEY: &str = "export-of";

/// Errors raised by the cache.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("entity not found: {0}")]
    EntityNotFound(String),

    #[error("entity prefix '{prefix}' matches {} entities", matches.len())]
    AmbiguousPrefix {
        prefix: String,
        matches: Vec<EntityId>,
    },

    #[error("{} records claim {key}={value}", matches.len())]
    AmbiguousMatch {
        key: String,
        value: String,
        matches: Vec<EntityId>,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Identity(#[from] IdentityError),
}

impl CacheError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::EntityNotFound(_) => ErrorCode::EntityNotFound,
            Self::AmbiguousPrefix { .. } => ErrorCode::AmbiguousId,
            Self::AmbiguousMatch { .. } => ErrorCode::AmbiguousMatch,
            Self::InvalidInput(_) => ErrorCode::InvalidInput,
            Self::Model(e) => e.code(),
            Self::Store(e) => e.code(),
            Self::Identity(e) => e.code(),
        }
    }
}

/// Summary of a clone merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub identities_added: usize,
    pub entities_added: usize,
    pub entities_updated: usize,
    pub operations_added: usize,
}

/// In-memory view of a repository over a [`Store`].
pub struct RepoCache {
    store: Arc<dyn Store>,
    identities: IdentityRegistry,
    entities: RwLock<HashMap<EntityId, Arc<Mutex<CachedEntity>>>>,
    excerpts: RwLock<BTreeMap<EntityId, EntityExcerpt>>,
    /// Serializes metadata lookups that may end in a create.
    creating: Mutex<()>,
}

impl RepoCache {
    /// Load identities and replay every stored log.
    ///
    /// # Errors
    ///
    /// Fails on storage errors and on any log that does not replay.
    pub fn open(store: Arc<dyn Store>) -> Result<Self, CacheError> {
        let identities = IdentityRegistry::load(Arc::clone(&store))?;
        let mut entities = HashMap::new();
        let mut excerpts = BTreeMap::new();

        for id in store.list_entities()? {
            let ops = store.read_log(&id)?;
            if ops.is_empty() {
                continue;
            }
            let entity = Entity::from_operations(ops)?;
            if entity.id() != &id {
                return Err(StoreError::Corrupt {
                    path: id.to_string(),
                    line: 1,
                    reason: format!("log root hashes to {}", entity.id()),
                }
                .into());
            }
            let snapshot = entity.replay()?;
            excerpts.insert(id.clone(), EntityExcerpt::from_snapshot(&snapshot));
            entities.insert(id, Arc::new(Mutex::new(CachedEntity::loaded(entity, snapshot))));
        }
        info!(
            entities = entities.len(),
            identities = identities.len(),
            "opened repository cache"
        );

        Ok(Self {
            store,
            identities,
            entities: RwLock::new(entities),
            excerpts: RwLock::new(excerpts),
            creating: Mutex::new(()),
        })
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    #[must_use]
    pub const fn identities(&self) -> &IdentityRegistry {
        &self.identities
    }

    /// Create an entity and lock it. Nothing is durable until the guard is
    /// flushed.
    pub fn new_entity_raw(
        &self,
        author: &IdentityId,
        timestamp: i64,
        title: &str,
        message: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<EntityGuard<'_>, CacheError> {
        let (entity, _) = Entity::create(author.clone(), timestamp, title, message, metadata)?;
        let snapshot = entity.replay()?;
        let id = entity.id().clone();
        let excerpt = EntityExcerpt::from_snapshot(&snapshot);

        let cell = Arc::new(Mutex::new(CachedEntity::fresh(entity, snapshot)));
        let guard = Mutex::lock_arc(&cell);
        self.entities.write().insert(id.clone(), cell);
        self.excerpts.write().insert(id.clone(), excerpt);
        debug!(entity = %id.human(), "created entity");
        Ok(EntityGuard::new(self, guard))
    }

    /// Lock an entity for a mutation sequence.
    ///
    /// # Errors
    ///
    /// [`CacheError::EntityNotFound`] for an unknown id.
    pub fn lock(&self, id: &EntityId) -> Result<EntityGuard<'_>, CacheError> {
        let cell = self
            .entities
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| CacheError::EntityNotFound(id.to_string()))?;
        let guard = Mutex::lock_arc(&cell);
        if guard.removed {
            return Err(CacheError::EntityNotFound(id.to_string()));
        }
        Ok(EntityGuard::new(self, guard))
    }

    /// Append one operation to an existing entity and flush it.
    pub fn append(
        &self,
        id: &EntityId,
        author: &IdentityId,
        timestamp: i64,
        payload: OpPayload,
        metadata: BTreeMap<String, String>,
    ) -> Result<Operation, CacheError> {
        let mut guard = self.lock(id)?;
        let op = match payload {
            OpPayload::Create(_) => {
                return Err(CacheError::InvalidInput(format!(
                    "entity {} is already created",
                    id.human()
                )));
            }
            OpPayload::AddComment(d) => guard.add_comment_raw(author, timestamp, &d.message, metadata),
            OpPayload::EditComment(d) => {
                guard.edit_comment_raw(author, timestamp, &d.target, &d.message, metadata)
            }
            OpPayload::SetTitle(d) => guard.set_title_raw(author, timestamp, &d.title, metadata),
            OpPayload::LabelChange(d) => {
                guard.change_labels_raw(author, timestamp, d.added, d.removed, metadata)
            }
            OpPayload::SetStatus(d) => guard.set_status_raw(author, timestamp, d.status, metadata),
            OpPayload::NoOp(_) => guard.no_op_raw(author, timestamp, metadata),
        }?;
        if let Err(e) = guard.flush_if_dirty() {
            guard.rollback();
            return Err(e);
        }
        Ok(op)
    }

    /// The entity known remotely as `key = value`, if any.
    ///
    /// Matches create-op metadata and export markers that point at the
    /// create op.
    ///
    /// # Errors
    ///
    /// [`CacheError::AmbiguousMatch`] if several entities claim the pair.
    pub fn resolve_create_by_metadata(
        &self,
        key: &str,
        value: &str,
    ) -> Result<Option<EntityId>, CacheError> {
        let excerpts = self.excerpts.read();
        let mut matches: Vec<EntityId> = excerpts
            .values()
            .filter(|e| e.matches(key, value))
            .map(|e| e.id.clone())
            .collect();
        match matches.len() {
            0 | 1 => Ok(matches.pop()),
            _ => Err(CacheError::AmbiguousMatch {
                key: key.to_string(),
                value: value.to_string(),
                matches,
            }),
        }
    }

    /// Lock the entity whose create op carries `key = metadata[key]`, or
    /// create it from the given fields when there is none. The flag is
    /// `true` for a new entity, which is not durable until flushed.
    ///
    /// Lookup and creation happen under one lock, so concurrent callers
    /// with the same pair end up on the same entity.
    ///
    /// # Errors
    ///
    /// [`CacheError::InvalidInput`] when `metadata` lacks `key`, and
    /// [`CacheError::AmbiguousMatch`] when several entities claim the pair.
    pub fn resolve_or_create_by_metadata(
        &self,
        key: &str,
        author: &IdentityId,
        timestamp: i64,
        title: &str,
        message: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<(EntityGuard<'_>, bool), CacheError> {
        let Some(value) = metadata.get(key).cloned() else {
            return Err(CacheError::InvalidInput(format!(
                "create metadata has no {key}"
            )));
        };
        let creating = self.creating.lock();
        if let Some(id) = self.resolve_create_by_metadata(key, &value)? {
            drop(creating);
            return Ok((self.lock(&id)?, false));
        }
        let guard = self.new_entity_raw(author, timestamp, title, message, metadata)?;
        drop(creating);
        Ok((guard, true))
    }

    /// Resolve an abbreviated entity id.
    pub fn resolve_by_prefix(&self, prefix: &str) -> Result<EntityId, CacheError> {
        let excerpts = self.excerpts.read();
        let matches: Vec<EntityId> = excerpts
            .keys()
            .filter(|id| id.has_prefix(prefix))
            .cloned()
            .collect();
        match matches.as_slice() {
            [] => Err(CacheError::EntityNotFound(prefix.to_string())),
            [one] => Ok(one.clone()),
            _ => Err(CacheError::AmbiguousPrefix {
                prefix: prefix.to_string(),
                matches,
            }),
        }
    }

    /// Current snapshot of an entity (briefly takes its lock).
    pub fn snapshot(&self, id: &EntityId) -> Result<Snapshot, CacheError> {
        Ok(self.lock(id)?.snapshot().clone())
    }

    #[must_use]
    pub fn excerpt(&self, id: &EntityId) -> Option<EntityExcerpt> {
        self.excerpts.read().get(id).cloned()
    }

    /// All excerpts ordered by id.
    #[must_use]
    pub fn all_excerpts(&self) -> Vec<EntityExcerpt> {
        self.excerpts.read().values().cloned().collect()
    }

    /// All entity ids, sorted.
    #[must_use]
    pub fn entity_ids(&self) -> Vec<EntityId> {
        self.excerpts.read().keys().cloned().collect()
    }

    /// Union a copy of an entity from another clone and flush the result.
    pub fn merge_entity(&self, remote: &Entity) -> Result<MergeOutcome, CacheError> {
        let known = self.entities.read().contains_key(remote.id());
        if known {
            let mut guard = self.lock(remote.id())?;
            let outcome = guard.merge(remote)?;
            if let Err(e) = guard.flush_if_dirty() {
                guard.rollback();
                return Err(e);
            }
            return Ok(outcome);
        }

        let snapshot = remote.replay()?;
        let excerpt = EntityExcerpt::from_snapshot(&snapshot);
        let cell = Arc::new(Mutex::new(CachedEntity::fresh(remote.clone(), snapshot)));
        let mut guard = EntityGuard::new(self, Mutex::lock_arc(&cell));
        self.entities.write().insert(remote.id().clone(), cell);
        self.excerpts.write().insert(remote.id().clone(), excerpt);
        if let Err(e) = guard.flush_if_dirty() {
            guard.rollback();
            return Err(e);
        }
        Ok(MergeOutcome {
            added: remote.len(),
        })
    }

    /// Pull every identity and entity from another store into this one.
    pub fn merge_store(&self, other: &dyn Store) -> Result<MergeReport, CacheError> {
        let mut report = MergeReport::default();
        for identity in other.read_identities()? {
            if self.identities.import(identity)? {
                report.identities_added += 1;
            }
        }
        for id in other.list_entities()? {
            let ops = other.read_log(&id)?;
            if ops.is_empty() {
                continue;
            }
            let remote = Entity::from_operations(ops)?;
            let existed = self.entities.read().contains_key(remote.id());
            let outcome = self.merge_entity(&remote)?;
            if !existed {
                report.entities_added += 1;
            } else if !outcome.is_noop() {
                report.entities_updated += 1;
            }
            report.operations_added += outcome.added;
        }
        info!(
            identities = report.identities_added,
            added = report.entities_added,
            updated = report.entities_updated,
            operations = report.operations_added,
            "merged clone"
        );
        Ok(report)
    }

    pub(crate) fn refresh_excerpt(&self, snapshot: &Snapshot) {
        self.excerpts
            .write()
            .insert(snapshot.id.clone(), EntityExcerpt::from_snapshot(snapshot));
    }

    pub(crate) fn evict(&self, id: &EntityId) {
        self.entities.write().remove(id);
        self.excerpts.write().remove(id);
    }
}

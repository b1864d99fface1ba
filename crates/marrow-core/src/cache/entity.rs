use std::collections::BTreeMap;

use parking_lot::{ArcMutexGuard, RawMutex};
use tracing::{debug, warn};

use super::{CacheError, EXPORT_MARKER_KEY, RepoCache};
use crate::model::hash::{ContentHash, EntityId, IdentityId};
use crate::model::{
    AddCommentData, EditCommentData, Entity, LabelChangeData, NoOpData, OpPayload, Operation,
    SetStatusData, SetTitleData, Snapshot, Status,
};

/// Cached state of one entity: the log, its projection, and how much of the
/// log is durable.
pub(crate) struct CachedEntity {
    pub(crate) entity: Entity,
    pub(crate) snapshot: Snapshot,
    /// Number of leading operations already written to the store.
    pub(crate) flushed: usize,
    /// Set when a never-flushed entity is rolled back and evicted.
    pub(crate) removed: bool,
}

impl CachedEntity {
    pub(crate) fn loaded(entity: Entity, snapshot: Snapshot) -> Self {
        let flushed = entity.len();
        Self {
            entity,
            snapshot,
            flushed,
            removed: false,
        }
    }

    pub(crate) fn fresh(entity: Entity, snapshot: Snapshot) -> Self {
        Self {
            entity,
            snapshot,
            flushed: 0,
            removed: false,
        }
    }
}

/// Exclusive access to one entity for a whole mutation sequence.
///
/// Mutations are applied in memory immediately (the snapshot is refreshed
/// after each one) and become durable on [`flush_if_dirty`](Self::flush_if_dirty).
/// [`rollback`](Self::rollback) discards everything not yet flushed.
pub struct EntityGuard<'a> {
    repo: &'a RepoCache,
    inner: ArcMutexGuard<RawMutex, CachedEntity>,
}

impl<'a> EntityGuard<'a> {
    pub(crate) fn new(repo: &'a RepoCache, inner: ArcMutexGuard<RawMutex, CachedEntity>) -> Self {
        Self { repo, inner }
    }

    #[must_use]
    pub fn id(&self) -> &EntityId {
        self.inner.entity.id()
    }

    #[must_use]
    pub fn snapshot(&self) -> &Snapshot {
        &self.inner.snapshot
    }

    #[must_use]
    pub fn entity(&self) -> &Entity {
        &self.inner.entity
    }

    /// True when there are operations not yet written to the store.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        !self.inner.removed && self.inner.entity.len() > self.inner.flushed
    }

    /// Number of operations not yet written to the store.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.entity.len().saturating_sub(self.inner.flushed)
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    fn apply(
        &mut self,
        author: &IdentityId,
        timestamp: i64,
        payload: OpPayload,
        metadata: BTreeMap<String, String>,
    ) -> Result<Operation, CacheError> {
        if self.inner.removed {
            return Err(CacheError::EntityNotFound(self.id().to_string()));
        }
        let op = self
            .inner
            .entity
            .append(author.clone(), timestamp, payload, metadata)?;
        match self.inner.entity.replay() {
            Ok(snapshot) => self.inner.snapshot = snapshot,
            Err(e) => {
                let keep = self.inner.entity.len() - 1;
                self.inner.entity.truncate(keep);
                return Err(e.into());
            }
        }
        self.repo.refresh_excerpt(&self.inner.snapshot);
        debug!(
            entity = %self.id().human(),
            op = %op.hash().human(),
            kind = op.payload().kind(),
            "applied operation"
        );
        Ok(op)
    }

    pub fn add_comment_raw(
        &mut self,
        author: &IdentityId,
        timestamp: i64,
        message: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<Operation, CacheError> {
        self.apply(
            author,
            timestamp,
            OpPayload::AddComment(AddCommentData {
                message: message.to_string(),
            }),
            metadata,
        )
    }

    /// Edit the comment created by operation `target` (the entity id for the
    /// description).
    pub fn edit_comment_raw(
        &mut self,
        author: &IdentityId,
        timestamp: i64,
        target: &ContentHash,
        message: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<Operation, CacheError> {
        if self.inner.snapshot.search_comment(target).is_none() {
            return Err(CacheError::InvalidInput(format!(
                "entity {} has no comment {}",
                self.id().human(),
                target.human()
            )));
        }
        self.apply(
            author,
            timestamp,
            OpPayload::EditComment(EditCommentData {
                target: target.clone(),
                message: message.to_string(),
            }),
            metadata,
        )
    }

    pub fn set_title_raw(
        &mut self,
        author: &IdentityId,
        timestamp: i64,
        title: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<Operation, CacheError> {
        let was = self.inner.snapshot.title.clone();
        self.apply(
            author,
            timestamp,
            OpPayload::SetTitle(SetTitleData {
                title: title.to_string(),
                was,
            }),
            metadata,
        )
    }

    /// Record a label change as given, even if it changes nothing.
    pub fn change_labels_raw(
        &mut self,
        author: &IdentityId,
        timestamp: i64,
        added: Vec<String>,
        removed: Vec<String>,
        metadata: BTreeMap<String, String>,
    ) -> Result<Operation, CacheError> {
        self.apply(
            author,
            timestamp,
            OpPayload::LabelChange(LabelChangeData { added, removed }),
            metadata,
        )
    }

    pub fn open_raw(
        &mut self,
        author: &IdentityId,
        timestamp: i64,
        metadata: BTreeMap<String, String>,
    ) -> Result<Operation, CacheError> {
        self.set_status_raw(author, timestamp, Status::Open, metadata)
    }

    pub fn close_raw(
        &mut self,
        author: &IdentityId,
        timestamp: i64,
        metadata: BTreeMap<String, String>,
    ) -> Result<Operation, CacheError> {
        self.set_status_raw(author, timestamp, Status::Closed, metadata)
    }

    pub fn set_status_raw(
        &mut self,
        author: &IdentityId,
        timestamp: i64,
        status: Status,
        metadata: BTreeMap<String, String>,
    ) -> Result<Operation, CacheError> {
        self.apply(
            author,
            timestamp,
            OpPayload::SetStatus(SetStatusData { status }),
            metadata,
        )
    }

    /// Append a metadata-only operation (export markers).
    pub fn no_op_raw(
        &mut self,
        author: &IdentityId,
        timestamp: i64,
        metadata: BTreeMap<String, String>,
    ) -> Result<Operation, CacheError> {
        self.apply(author, timestamp, OpPayload::NoOp(NoOpData {}), metadata)
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    /// The operation known remotely as `key = value`, if any.
    ///
    /// An export marker carrying the pair resolves to the operation it marks.
    ///
    /// # Errors
    ///
    /// [`CacheError::AmbiguousMatch`] if the pair points at several operations.
    pub fn resolve_operation_by_metadata(
        &self,
        key: &str,
        value: &str,
    ) -> Result<Option<ContentHash>, CacheError> {
        let mut found: Vec<ContentHash> = Vec::new();
        for op in self.inner.entity.operations() {
            if op.get_metadata(key) != Some(value) {
                continue;
            }
            let resolved = match op.get_metadata(EXPORT_MARKER_KEY) {
                Some(marked) if matches!(op.payload(), OpPayload::NoOp(_)) => {
                    match ContentHash::parse(marked) {
                        Ok(hash) => hash,
                        Err(e) => {
                            warn!(entity = %self.id().human(), error = %e, "bad export marker");
                            continue;
                        }
                    }
                }
                _ => op.hash().clone(),
            };
            if !found.contains(&resolved) {
                found.push(resolved);
            }
        }
        match found.len() {
            0 | 1 => Ok(found.pop()),
            _ => Err(CacheError::AmbiguousMatch {
                key: key.to_string(),
                value: value.to_string(),
                matches: found,
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Durability
    // -----------------------------------------------------------------------

    /// Write pending operations to the store in one atomic append.
    ///
    /// Returns `true` if anything was written. On error the operations stay
    /// pending; callers normally [`rollback`](Self::rollback).
    pub fn flush_if_dirty(&mut self) -> Result<bool, CacheError> {
        if !self.is_dirty() {
            return Ok(false);
        }
        let flushed = self.inner.flushed;
        let id = self.id().clone();
        self.repo
            .store()
            .append_operations(&id, &self.inner.entity.operations()[flushed..])?;
        let count = self.inner.entity.len() - flushed;
        self.inner.flushed = self.inner.entity.len();
        debug!(entity = %id.human(), count, "flushed entity");
        Ok(true)
    }

    /// Discard every operation not yet flushed. A never-flushed entity is
    /// evicted from the cache entirely.
    pub fn rollback(&mut self) {
        if !self.is_dirty() {
            return;
        }
        let dropped = self.pending();
        if self.inner.flushed == 0 {
            let id = self.id().clone();
            self.inner.removed = true;
            self.repo.evict(&id);
            debug!(entity = %id.human(), "rolled back new entity");
            return;
        }
        let keep = self.inner.flushed;
        self.inner.entity.truncate(keep);
        match self.inner.entity.replay() {
            Ok(snapshot) => {
                self.inner.snapshot = snapshot;
                self.repo.refresh_excerpt(&self.inner.snapshot);
            }
            Err(e) => warn!(entity = %self.id().human(), error = %e, "replay after rollback failed"),
        }
        debug!(entity = %self.id().human(), dropped, "rolled back pending operations");
    }

    /// Union a remote copy into this entity (in memory; flush to persist).
    pub(crate) fn merge(&mut self, remote: &Entity) -> Result<crate::model::MergeOutcome, CacheError> {
        let outcome = self.inner.entity.merge(remote)?;
        if !outcome.is_noop() {
            self.inner.snapshot = self.inner.entity.replay()?;
            self.repo.refresh_excerpt(&self.inner.snapshot);
        }
        Ok(outcome)
    }
}

impl Drop for EntityGuard<'_> {
    fn drop(&mut self) {
        if self.is_dirty() {
            warn!(
                entity = %self.id().human(),
                pending = self.pending(),
                "entity lock released with unflushed operations"
            );
        }
    }
}

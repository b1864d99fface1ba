use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::RwLock;

use super::{Store, StoreError};
use crate::identity::Identity;
use crate::model::Operation;
use crate::model::hash::EntityId;

/// In-memory [`Store`] for tests.
///
/// `fail_appends(true)` makes every subsequent operation append fail with an
/// I/O error, which lets tests exercise the flush-failure paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    logs: RwLock<BTreeMap<EntityId, Vec<Operation>>>,
    identities: RwLock<Vec<Identity>>,
    fail_appends: AtomicBool,
    append_calls: AtomicUsize,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    /// Number of `append_operations` calls that reached the store.
    #[must_use]
    pub fn append_calls(&self) -> usize {
        self.append_calls.load(Ordering::SeqCst)
    }
}

impl Store for MemoryStore {
    fn append_operations(&self, entity: &EntityId, ops: &[Operation]) -> Result<(), StoreError> {
        self.append_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(StoreError::Io(io::Error::other("injected append failure")));
        }
        if ops.is_empty() {
            return Ok(());
        }
        self.logs
            .write()
            .entry(entity.clone())
            .or_default()
            .extend_from_slice(ops);
        Ok(())
    }

    fn read_log(&self, entity: &EntityId) -> Result<Vec<Operation>, StoreError> {
        Ok(self.logs.read().get(entity).cloned().unwrap_or_default())
    }

    fn list_entities(&self) -> Result<Vec<EntityId>, StoreError> {
        Ok(self.logs.read().keys().cloned().collect())
    }

    fn append_identity(&self, identity: &Identity) -> Result<(), StoreError> {
        self.identities.write().push(identity.clone());
        Ok(())
    }

    fn read_identities(&self) -> Result<Vec<Identity>, StoreError> {
        Ok(self.identities.read().clone())
    }
}

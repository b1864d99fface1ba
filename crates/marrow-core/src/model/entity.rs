//! An entity: one append-only operation log rooted at a `create` op.

use std::collections::{BTreeMap, HashSet};

use super::ModelError;
use super::hash::{ContentHash, EntityId, IdentityId};
use super::operation::{CreateData, OpPayload, Operation};
use super::snapshot::{Snapshot, replay};

/// Result of merging a remote copy of an entity into a local one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Number of remote operations appended.
    pub added: usize,
}

impl MergeOutcome {
    #[must_use]
    pub const fn is_noop(self) -> bool {
        self.added == 0
    }
}

/// An operation log. The first operation is always `create` and its hash is
/// the entity id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    id: EntityId,
    ops: Vec<Operation>,
}

impl Entity {
    /// Start a new entity.
    ///
    /// Returns the entity and its creation operation.
    ///
    /// # Errors
    ///
    /// [`ModelError::InvalidInput`] for an empty or multi-line title.
    pub fn create(
        author: IdentityId,
        timestamp: i64,
        title: &str,
        message: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<(Self, Operation), ModelError> {
        let op = Operation::new(
            author,
            timestamp,
            OpPayload::Create(CreateData {
                title: title.to_string(),
                message: message.to_string(),
            }),
            metadata,
        )?;
        let entity = Self {
            id: op.hash().clone(),
            ops: vec![op.clone()],
        };
        Ok((entity, op))
    }

    /// Rebuild an entity from a stored log.
    ///
    /// # Errors
    ///
    /// [`ModelError::CorruptLog`] if the log is empty or not rooted at `create`.
    pub fn from_operations(ops: Vec<Operation>) -> Result<Self, ModelError> {
        let Some(first) = ops.first() else {
            return Err(ModelError::CorruptLog {
                index: 0,
                reason: "empty log".into(),
            });
        };
        if !first.is_create() {
            return Err(ModelError::CorruptLog {
                index: 0,
                reason: format!("first operation is '{}'", first.payload().kind()),
            });
        }
        Ok(Self {
            id: first.hash().clone(),
            ops,
        })
    }

    /// Validate `payload`, build one operation and append it.
    ///
    /// # Errors
    ///
    /// [`ModelError::InvalidInput`] for an invalid payload or a second `create`.
    pub fn append(
        &mut self,
        author: IdentityId,
        timestamp: i64,
        payload: OpPayload,
        metadata: BTreeMap<String, String>,
    ) -> Result<Operation, ModelError> {
        if matches!(payload, OpPayload::Create(_)) {
            return Err(ModelError::InvalidInput(format!(
                "entity {} is already created",
                self.id.human()
            )));
        }
        let op = Operation::new(author, timestamp, payload, metadata)?;
        self.ops.push(op.clone());
        Ok(op)
    }

    /// Append an already-built operation.
    ///
    /// # Errors
    ///
    /// [`ModelError::InvalidInput`] if `op` is a `create`.
    pub fn push(&mut self, op: Operation) -> Result<(), ModelError> {
        if op.is_create() {
            return Err(ModelError::InvalidInput(format!(
                "entity {} is already created",
                self.id.human()
            )));
        }
        self.ops.push(op);
        Ok(())
    }

    /// Project the log into its current state.
    pub fn replay(&self) -> Result<Snapshot, ModelError> {
        replay(&self.ops)
    }

    /// Union with another copy of the same entity: local ops keep their
    /// order, remote ops not already present follow in remote order.
    ///
    /// # Errors
    ///
    /// [`ModelError::RootMismatch`] if the two logs have different roots.
    pub fn merge(&mut self, other: &Self) -> Result<MergeOutcome, ModelError> {
        if self.id != other.id {
            return Err(ModelError::RootMismatch {
                local: self.id.clone(),
                remote: other.id.clone(),
            });
        }
        let mut known: HashSet<ContentHash> = self.ops.iter().map(|op| op.hash().clone()).collect();
        let mut added = 0;
        for op in &other.ops {
            if known.insert(op.hash().clone()) {
                self.ops.push(op.clone());
                added += 1;
            }
        }
        Ok(MergeOutcome { added })
    }

    #[must_use]
    pub const fn id(&self) -> &EntityId {
        &self.id
    }

    #[must_use]
    pub fn operations(&self) -> &[Operation] {
        &self.ops
    }

    /// The root `create` operation.
    #[must_use]
    pub fn create_op(&self) -> &Operation {
        &self.ops[0]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Always false: an entity holds at least its `create` op.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    #[must_use]
    pub fn contains(&self, hash: &ContentHash) -> bool {
        self.ops.iter().any(|op| op.hash() == hash)
    }

    /// Drop operations past `len`. Never removes the root.
    pub(crate) fn truncate(&mut self, len: usize) {
        self.ops.truncate(len.max(1));
    }
}

//! Operation-log entity model.
//!
//! - [`hash`]: content hashes and id aliases
//! - [`operation`]: immutable operations and their payloads
//! - [`entity`]: append-only logs, merge
//! - [`snapshot`]: replay into current state
//! - [`timeline`]: display entries produced by replay

pub mod entity;
pub mod hash;
pub mod operation;
pub mod snapshot;
pub mod timeline;

pub use entity::{Entity, MergeOutcome};
pub use hash::{ContentHash, EntityId, HUMAN_ID_LEN, IdentityId, ParseHashError};
pub use operation::{
    AddCommentData, CreateData, EditCommentData, LabelChangeData, NoOpData, OpPayload, Operation,
    OperationData, SetStatusData, SetTitleData, Status,
};
pub use snapshot::{Comment, Snapshot, replay};
pub use timeline::{CommentRevision, CommentTimelineItem, TimelineItem};

use crate::error::ErrorCode;

/// Errors raised by the model layer.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("corrupt log at operation {index}: {reason}")]
    CorruptLog { index: usize, reason: String },

    #[error("failed to encode operation: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("cannot merge entity {remote} into {local}: different roots")]
    RootMismatch { local: EntityId, remote: EntityId },
}

impl ModelError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidInput(_) | Self::RootMismatch { .. } => ErrorCode::InvalidInput,
            Self::CorruptLog { .. } => ErrorCode::CorruptLog,
            Self::Encode(_) => ErrorCode::InternalUnexpected,
        }
    }
}

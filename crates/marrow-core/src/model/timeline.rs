//! Timeline entries shown by `mw show`.
//!
//! One entry per visible event. Comment entries (the opening post and every
//! later comment) bundle their edits as a history so a renderer can show
//! "edited" markers without re-walking the log.

use serde::Serialize;

use super::hash::{ContentHash, IdentityId};
use super::operation::Status;

/// One revision of a comment's text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommentRevision {
    /// Hash of the operation that produced this text.
    pub hash: ContentHash,
    pub author: IdentityId,
    pub message: String,
    pub unix_time: i64,
}

/// A comment-like timeline entry together with its edit history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommentTimelineItem {
    /// Hash of the operation that created the comment.
    pub hash: ContentHash,
    pub author: IdentityId,
    /// Current text (last revision).
    pub message: String,
    pub created_at: i64,
    /// Revisions in log order. The first entry is the original text.
    pub history: Vec<CommentRevision>,
}

impl CommentTimelineItem {
    pub(crate) fn new(hash: ContentHash, author: IdentityId, message: String, at: i64) -> Self {
        let history = vec![CommentRevision {
            hash: hash.clone(),
            author: author.clone(),
            message: message.clone(),
            unix_time: at,
        }];
        Self {
            hash,
            author,
            message,
            created_at: at,
            history,
        }
    }

    pub(crate) fn push_revision(&mut self, revision: CommentRevision) {
        self.message.clone_from(&revision.message);
        self.history.push(revision);
    }

    /// True once at least one edit has been applied.
    #[must_use]
    pub fn is_edited(&self) -> bool {
        self.history.len() > 1
    }
}

/// A single entry of an entity's timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimelineItem {
    Create(CommentTimelineItem),
    AddComment(CommentTimelineItem),
    SetTitle {
        hash: ContentHash,
        author: IdentityId,
        unix_time: i64,
        title: String,
        was: String,
    },
    SetStatus {
        hash: ContentHash,
        author: IdentityId,
        unix_time: i64,
        status: Status,
    },
    LabelChange {
        hash: ContentHash,
        author: IdentityId,
        unix_time: i64,
        added: Vec<String>,
        removed: Vec<String>,
    },
}

impl TimelineItem {
    /// Hash of the operation this entry was produced from.
    #[must_use]
    pub const fn hash(&self) -> &ContentHash {
        match self {
            Self::Create(c) | Self::AddComment(c) => &c.hash,
            Self::SetTitle { hash, .. }
            | Self::SetStatus { hash, .. }
            | Self::LabelChange { hash, .. } => hash,
        }
    }

    pub(crate) fn as_comment_mut(&mut self) -> Option<&mut CommentTimelineItem> {
        match self {
            Self::Create(c) | Self::AddComment(c) => Some(c),
            _ => None,
        }
    }
}

//! Snapshot projection: fold an operation log into current state.
//!
//! Replay is a pure left fold over the log. Structural damage (a log that
//! does not start with `create`, or contains a second one) is fatal; softer
//! anomalies such as edits of unknown comments or clock skew are logged and
//! skipped so one odd remote record cannot make an entity unreadable.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::warn;

use super::ModelError;
use super::hash::{ContentHash, EntityId, IdentityId};
use super::operation::{OpPayload, Operation, Status};
use super::timeline::{CommentRevision, CommentTimelineItem, TimelineItem};

/// A comment as currently visible. `comments[0]` is the entity description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Comment {
    /// Hash of the operation that created this comment.
    pub id: ContentHash,
    pub author: IdentityId,
    pub message: String,
    pub unix_time: i64,
    /// Time of the last applied edit, if any.
    pub edited_at: Option<i64>,
}

/// Projected state of one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub id: EntityId,
    pub status: Status,
    pub title: String,
    pub comments: Vec<Comment>,
    /// Sorted, deduplicated.
    pub labels: Vec<String>,
    pub author: IdentityId,
    /// Every operation author, first-seen order.
    pub actors: Vec<IdentityId>,
    /// Creator plus comment and edit authors, first-seen order.
    pub participants: Vec<IdentityId>,
    pub created_at: i64,
    pub edited_at: i64,
    pub timeline: Vec<TimelineItem>,
    #[serde(skip)]
    pub operations: Vec<Operation>,
}

impl Snapshot {
    /// Find a comment by the hash of the operation that created it.
    #[must_use]
    pub fn search_comment(&self, id: &ContentHash) -> Option<&Comment> {
        self.comments.iter().find(|c| &c.id == id)
    }

    /// Metadata attached to the creation operation.
    #[must_use]
    pub fn create_metadata(&self, key: &str) -> Option<&str> {
        self.operations.first().and_then(|op| op.get_metadata(key))
    }

    /// Unix time of the most recent operation.
    #[must_use]
    pub const fn last_edit_unix(&self) -> i64 {
        self.edited_at
    }

    #[must_use]
    pub fn has_participant(&self, id: &IdentityId) -> bool {
        self.participants.contains(id)
    }

    #[must_use]
    pub fn has_actor(&self, id: &IdentityId) -> bool {
        self.actors.contains(id)
    }
}

fn push_unique(list: &mut Vec<IdentityId>, id: &IdentityId) {
    if !list.contains(id) {
        list.push(id.clone());
    }
}

/// Replay `ops` into a [`Snapshot`].
///
/// # Errors
///
/// [`ModelError::CorruptLog`] if the log is empty, does not start with a
/// `create` operation, or contains a second one.
pub fn replay(ops: &[Operation]) -> Result<Snapshot, ModelError> {
    let Some(first) = ops.first() else {
        return Err(ModelError::CorruptLog {
            index: 0,
            reason: "empty log".into(),
        });
    };
    let OpPayload::Create(create) = first.payload() else {
        return Err(ModelError::CorruptLog {
            index: 0,
            reason: format!("first operation is '{}', expected 'create'", first.payload().kind()),
        });
    };

    let id = first.hash().clone();
    let mut snap = Snapshot {
        id: id.clone(),
        status: Status::Open,
        title: create.title.clone(),
        comments: vec![Comment {
            id: id.clone(),
            author: first.author().clone(),
            message: create.message.clone(),
            unix_time: first.timestamp(),
            edited_at: None,
        }],
        labels: Vec::new(),
        author: first.author().clone(),
        actors: vec![first.author().clone()],
        participants: vec![first.author().clone()],
        created_at: first.timestamp(),
        edited_at: first.timestamp(),
        timeline: vec![TimelineItem::Create(CommentTimelineItem::new(
            id,
            first.author().clone(),
            create.message.clone(),
            first.timestamp(),
        ))],
        operations: ops.to_vec(),
    };
    let mut labels = BTreeSet::new();
    let mut last_ts = first.timestamp();

    for (index, op) in ops.iter().enumerate().skip(1) {
        let ts = op.timestamp();
        if ts < last_ts {
            warn!(
                entity = %snap.id.human(),
                index,
                previous = last_ts,
                timestamp = ts,
                "operation timestamp goes backwards"
            );
        }
        last_ts = last_ts.max(ts);
        push_unique(&mut snap.actors, op.author());

        match op.payload() {
            OpPayload::Create(_) => {
                return Err(ModelError::CorruptLog {
                    index,
                    reason: "second 'create' operation".into(),
                });
            }
            OpPayload::AddComment(d) => {
                push_unique(&mut snap.participants, op.author());
                snap.comments.push(Comment {
                    id: op.hash().clone(),
                    author: op.author().clone(),
                    message: d.message.clone(),
                    unix_time: ts,
                    edited_at: None,
                });
                snap.timeline.push(TimelineItem::AddComment(CommentTimelineItem::new(
                    op.hash().clone(),
                    op.author().clone(),
                    d.message.clone(),
                    ts,
                )));
            }
            OpPayload::EditComment(d) => {
                let Some(comment) = snap.comments.iter_mut().find(|c| c.id == d.target) else {
                    warn!(
                        entity = %snap.id.human(),
                        index,
                        target = %d.target.human(),
                        "edit targets unknown comment, skipped"
                    );
                    continue;
                };
                comment.message.clone_from(&d.message);
                comment.edited_at = Some(ts);
                push_unique(&mut snap.participants, op.author());
                if let Some(item) = snap
                    .timeline
                    .iter_mut()
                    .find(|t| t.hash() == &d.target)
                    .and_then(TimelineItem::as_comment_mut)
                {
                    item.push_revision(CommentRevision {
                        hash: op.hash().clone(),
                        author: op.author().clone(),
                        message: d.message.clone(),
                        unix_time: ts,
                    });
                }
            }
            OpPayload::SetTitle(d) => {
                snap.title.clone_from(&d.title);
                snap.timeline.push(TimelineItem::SetTitle {
                    hash: op.hash().clone(),
                    author: op.author().clone(),
                    unix_time: ts,
                    title: d.title.clone(),
                    was: d.was.clone(),
                });
            }
            OpPayload::LabelChange(d) => {
                for label in &d.added {
                    labels.insert(label.clone());
                }
                for label in &d.removed {
                    labels.remove(label);
                }
                snap.timeline.push(TimelineItem::LabelChange {
                    hash: op.hash().clone(),
                    author: op.author().clone(),
                    unix_time: ts,
                    added: d.added.clone(),
                    removed: d.removed.clone(),
                });
            }
            OpPayload::SetStatus(d) => {
                snap.status = d.status;
                snap.timeline.push(TimelineItem::SetStatus {
                    hash: op.hash().clone(),
                    author: op.author().clone(),
                    unix_time: ts,
                    status: d.status,
                });
            }
            OpPayload::NoOp(_) => {}
        }
    }

    snap.labels = labels.into_iter().collect();
    snap.edited_at = last_ts;
    Ok(snap)
}

//! Storage interface for operation logs and identities.
//!
//! The cache and the bridges only see the [`Store`] trait. Two
//! implementations ship: [`FileStore`] (durable, one append-only file per
//! entity) and [`MemoryStore`] (tests, with fault injection).
//!
//! Both share the same line format:
//!
//! ```text
//! <64-hex hash>\t<canonical json>\n
//! ```
//!
//! The hash is recomputed on read and compared against the stored one, so a
//! hand-edited or bit-rotted line surfaces as [`StoreError::Corrupt`].

mod file;
mod memory;

pub use file::{FileStore, MARROW_DIR};
pub use memory::MemoryStore;

use std::io;
use std::path::PathBuf;

use tracing::warn;

use crate::error::ErrorCode;
use crate::identity::{Identity, IdentityData};
use crate::lock::LockError;
use crate::model::hash::{ContentHash, EntityId};
use crate::model::{ModelError, Operation, OperationData};

/// Durable storage for operation logs and identities.
///
/// `append_operations` is atomic: either every op of the batch becomes
/// durable or none does.
pub trait Store: Send + Sync {
    fn append_operations(&self, entity: &EntityId, ops: &[Operation]) -> Result<(), StoreError>;

    /// The stored log in append order; empty for an unknown entity.
    fn read_log(&self, entity: &EntityId) -> Result<Vec<Operation>, StoreError>;

    /// Every entity with a stored log, sorted by id.
    fn list_entities(&self) -> Result<Vec<EntityId>, StoreError>;

    fn append_identity(&self, identity: &Identity) -> Result<(), StoreError>;

    fn read_identities(&self) -> Result<Vec<Identity>, StoreError>;
}

/// Errors raised by a [`Store`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no marrow repository at {}", .0.display())]
    NotInitialized(PathBuf),

    #[error("store I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("corrupt record at {path}:{line}: {reason}")]
    Corrupt {
        path: String,
        line: usize,
        reason: String,
    },
}

impl StoreError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NotInitialized(_) => ErrorCode::NotInitialized,
            Self::Io(_) => ErrorCode::StorageFailure,
            Self::Lock(e) => e.code(),
            Self::Encode(_) => ErrorCode::InternalUnexpected,
            Self::Model(e) => e.code(),
            Self::Corrupt { .. } => ErrorCode::CorruptLog,
        }
    }
}

// ---------------------------------------------------------------------------
// Line codec
// ---------------------------------------------------------------------------

pub(crate) fn encode_operation(op: &Operation) -> Result<String, StoreError> {
    Ok(format!("{}\t{}\n", op.hash(), op.encode()?))
}

pub(crate) fn encode_identity(identity: &Identity) -> Result<String, StoreError> {
    Ok(format!("{}\t{}\n", identity.id(), identity.encode()?))
}

/// Complete (newline-terminated) lines of `content`, numbered from 1.
///
/// A trailing fragment without a newline is an interrupted write; it is
/// dropped with a warning and never parsed.
pub(crate) fn complete_lines<'a>(content: &'a str, origin: &str) -> Vec<(usize, &'a str)> {
    let body = match content.rfind('\n') {
        Some(pos) => {
            if pos + 1 < content.len() {
                warn!(
                    path = origin,
                    bytes = content.len() - pos - 1,
                    "ignoring torn trailing line"
                );
            }
            &content[..=pos]
        }
        None => {
            if !content.is_empty() {
                warn!(path = origin, bytes = content.len(), "ignoring torn trailing line");
            }
            ""
        }
    };
    body.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| (i + 1, line))
        .collect()
}

fn split_line<'a>(line: &'a str, origin: &str, lineno: usize) -> Result<(ContentHash, &'a str), StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt {
        path: origin.to_string(),
        line: lineno,
        reason,
    };
    let (hash, json) = line
        .split_once('\t')
        .ok_or_else(|| corrupt("missing tab separator".into()))?;
    let hash = ContentHash::parse(hash).map_err(|e| corrupt(e.to_string()))?;
    Ok((hash, json))
}

pub(crate) fn decode_operation(line: &str, origin: &str, lineno: usize) -> Result<Operation, StoreError> {
    let (stored, json) = split_line(line, origin, lineno)?;
    let data: OperationData = serde_json::from_str(json).map_err(|e| StoreError::Corrupt {
        path: origin.to_string(),
        line: lineno,
        reason: e.to_string(),
    })?;
    let op = Operation::from_data(data)?;
    if op.hash() != &stored {
        return Err(StoreError::Corrupt {
            path: origin.to_string(),
            line: lineno,
            reason: format!("hash mismatch: stored {} computed {}", stored, op.hash()),
        });
    }
    Ok(op)
}

pub(crate) fn decode_identity(line: &str, origin: &str, lineno: usize) -> Result<Identity, StoreError> {
    let (stored, json) = split_line(line, origin, lineno)?;
    let data: IdentityData = serde_json::from_str(json).map_err(|e| StoreError::Corrupt {
        path: origin.to_string(),
        line: lineno,
        reason: e.to_string(),
    })?;
    let identity = Identity::from_data(data)?;
    if identity.id() != &stored {
        return Err(StoreError::Corrupt {
            path: origin.to_string(),
            line: lineno,
            reason: format!("hash mismatch: stored {} computed {}", stored, identity.id()),
        });
    }
    Ok(identity)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::identity::IdentityProfile;
    use crate::model::{AddCommentData, OpPayload};

    fn op() -> Operation {
        Operation::new(
            ContentHash::of_bytes(b"a"),
            1,
            OpPayload::AddComment(AddCommentData {
                message: "line one\nline two".into(),
            }),
            BTreeMap::new(),
        )
        .expect("op")
    }

    #[test]
    fn operation_line_roundtrip() {
        let op = op();
        let line = encode_operation(&op).expect("encode");
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        let back = decode_operation(line.trim_end(), "mem", 1).expect("decode");
        assert_eq!(back, op);
    }

    #[test]
    fn identity_line_roundtrip() {
        let ident = Identity::new(IdentityProfile::with_login("x")).expect("identity");
        let line = encode_identity(&ident).expect("encode");
        let back = decode_identity(line.trim_end(), "mem", 1).expect("decode");
        assert_eq!(back, ident);
    }

    #[test]
    fn tampered_line_is_corrupt() {
        let line = encode_operation(&op()).expect("encode");
        let tampered = line.trim_end().replace("line one", "line 1");
        assert!(matches!(
            decode_operation(&tampered, "mem", 3),
            Err(StoreError::Corrupt { line: 3, .. })
        ));
        assert!(matches!(
            decode_operation("not a record", "mem", 1),
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn torn_tail_is_dropped() {
        let lines = complete_lines("a\nb\npartial", "mem");
        assert_eq!(lines, vec![(1, "a"), (2, "b")]);
        assert!(complete_lines("partial", "mem").is_empty());
        assert_eq!(complete_lines("a\n\nb\n", "mem"), vec![(1, "a"), (3, "b")]);
    }
}

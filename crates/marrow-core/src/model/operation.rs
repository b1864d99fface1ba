//! Operations: the immutable, content-addressed unit of change.
//!
//! An [`Operation`] wraps its serialized form ([`OperationData`]) together
//! with the hash computed from it at construction. Fields are only reachable
//! through accessors, so the hash can never drift from the content.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::ModelError;
use super::hash::{ContentHash, IdentityId};
use crate::canonical::to_canonical_string;

/// Lifecycle status of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Open,
    Closed,
}

impl Status {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "closed" => Ok(Self::Closed),
            other => Err(ModelError::InvalidInput(format!(
                "unknown status '{other}': expected 'open' or 'closed'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Payload for `create`. Always the first operation of a log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateData {
    pub title: String,
    pub message: String,
}

/// Payload for `add_comment`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddCommentData {
    pub message: String,
}

/// Payload for `edit_comment`. `target` is the hash of the operation that
/// created the comment (the create op for the description).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditCommentData {
    pub target: ContentHash,
    pub message: String,
}

/// Payload for `set_title`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetTitleData {
    pub title: String,
    /// Title this operation replaced, for display.
    pub was: String,
}

/// Payload for `label_change`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelChangeData {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub added: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed: Vec<String>,
}

/// Payload for `set_status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetStatusData {
    pub status: Status,
}

/// Payload for `no_op`: carries metadata only (export markers and the like).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoOpData {}

/// Typed payload of an operation, tagged by `type` in the JSON form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OpPayload {
    Create(CreateData),
    AddComment(AddCommentData),
    EditComment(EditCommentData),
    SetTitle(SetTitleData),
    LabelChange(LabelChangeData),
    SetStatus(SetStatusData),
    NoOp(NoOpData),
}

impl OpPayload {
    /// Stable kind name, matching the JSON `type` tag.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Create(_) => "create",
            Self::AddComment(_) => "add_comment",
            Self::EditComment(_) => "edit_comment",
            Self::SetTitle(_) => "set_title",
            Self::LabelChange(_) => "label_change",
            Self::SetStatus(_) => "set_status",
            Self::NoOp(_) => "no_op",
        }
    }

    /// Check the source-independent constraints on a payload.
    pub fn validate(&self) -> Result<(), ModelError> {
        match self {
            Self::Create(d) => validate_title(&d.title),
            Self::SetTitle(d) => validate_title(&d.title),
            Self::LabelChange(d) => {
                if d.added.is_empty() && d.removed.is_empty() {
                    return Err(ModelError::InvalidInput(
                        "label change must add or remove at least one label".into(),
                    ));
                }
                d.added.iter().chain(&d.removed).try_for_each(|l| validate_label(l))
            }
            Self::AddComment(_) | Self::EditComment(_) | Self::SetStatus(_) | Self::NoOp(_) => {
                Ok(())
            }
        }
    }
}

fn validate_title(title: &str) -> Result<(), ModelError> {
    if title.trim().is_empty() {
        return Err(ModelError::InvalidInput("title must not be empty".into()));
    }
    if title.contains('\n') {
        return Err(ModelError::InvalidInput(
            "title must be a single line".into(),
        ));
    }
    Ok(())
}

fn validate_label(label: &str) -> Result<(), ModelError> {
    if label.trim().is_empty() || label.contains('\n') {
        return Err(ModelError::InvalidInput(format!("invalid label '{label}'")));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

/// Serialized form of an operation. This is what gets hashed and stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationData {
    pub author: IdentityId,
    /// Unix seconds, supplied by the author.
    pub timestamp: i64,
    /// Random value fixed at creation; keeps identical edits distinct.
    pub nonce: String,
    pub payload: OpPayload,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

/// An immutable operation with its content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Operation {
    hash: ContentHash,
    #[serde(flatten)]
    data: OperationData,
}

impl Operation {
    /// Build a new operation with a fresh random nonce.
    pub fn new(
        author: IdentityId,
        timestamp: i64,
        payload: OpPayload,
        metadata: BTreeMap<String, String>,
    ) -> Result<Self, ModelError> {
        let nonce = format!("{:016x}", rand::random::<u64>());
        Self::with_nonce(author, timestamp, nonce, payload, metadata)
    }

    /// Build an operation with an explicit nonce (replaying stored data, tests).
    pub fn with_nonce(
        author: IdentityId,
        timestamp: i64,
        nonce: String,
        payload: OpPayload,
        metadata: BTreeMap<String, String>,
    ) -> Result<Self, ModelError> {
        payload.validate()?;
        Self::from_data(OperationData {
            author,
            timestamp,
            nonce,
            payload,
            metadata,
        })
    }

    /// Seal stored data, computing its hash. Does not re-validate the payload;
    /// stored history is accepted as written.
    pub fn from_data(data: OperationData) -> Result<Self, ModelError> {
        let encoded = to_canonical_string(&data)?;
        Ok(Self {
            hash: ContentHash::of_bytes(encoded.as_bytes()),
            data,
        })
    }

    /// Content hash: BLAKE3 of the canonical JSON encoding.
    #[must_use]
    pub const fn hash(&self) -> &ContentHash {
        &self.hash
    }

    /// Canonical JSON encoding (the exact bytes that were hashed).
    pub fn encode(&self) -> Result<String, ModelError> {
        Ok(to_canonical_string(&self.data)?)
    }

    #[must_use]
    pub const fn author(&self) -> &IdentityId {
        &self.data.author
    }

    #[must_use]
    pub const fn timestamp(&self) -> i64 {
        self.data.timestamp
    }

    #[must_use]
    pub const fn payload(&self) -> &OpPayload {
        &self.data.payload
    }

    #[must_use]
    pub const fn metadata(&self) -> &BTreeMap<String, String> {
        &self.data.metadata
    }

    #[must_use]
    pub fn get_metadata(&self, key: &str) -> Option<&str> {
        self.data.metadata.get(key).map(String::as_str)
    }

    #[must_use]
    pub const fn data(&self) -> &OperationData {
        &self.data
    }

    #[must_use]
    pub const fn is_create(&self) -> bool {
        matches!(self.data.payload, OpPayload::Create(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn author() -> IdentityId {
        ContentHash::of_bytes(b"alice")
    }

    fn comment(msg: &str, nonce: &str) -> Operation {
        Operation::with_nonce(
            author(),
            1_700_000_000,
            nonce.into(),
            OpPayload::AddComment(AddCommentData {
                message: msg.into(),
            }),
            BTreeMap::new(),
        )
        .expect("valid op")
    }

    #[test]
    fn hash_is_pure_function_of_content() {
        assert_eq!(comment("hi", "n1").hash(), comment("hi", "n1").hash());
        assert_ne!(comment("hi", "n1").hash(), comment("hi", "n2").hash());
        assert_ne!(comment("hi", "n1").hash(), comment("ho", "n1").hash());
    }

    #[test]
    fn metadata_participates_in_hash() {
        let plain = comment("hi", "n");
        let mut meta = BTreeMap::new();
        meta.insert("origin".to_string(), "github".to_string());
        let tagged = Operation::with_nonce(
            author(),
            1_700_000_000,
            "n".into(),
            OpPayload::AddComment(AddCommentData {
                message: "hi".into(),
            }),
            meta,
        )
        .expect("valid op");
        assert_ne!(plain.hash(), tagged.hash());
        assert_eq!(tagged.get_metadata("origin"), Some("github"));
    }

    #[test]
    fn encode_roundtrips_through_from_data() {
        let op = comment("multi\nline", "n");
        let encoded = op.encode().expect("encode");
        assert!(!encoded.contains('\n'));
        let data: OperationData = serde_json::from_str(&encoded).expect("decode");
        let back = Operation::from_data(data).expect("seal");
        assert_eq!(back.hash(), op.hash());
    }

    #[test]
    fn payload_tag_is_snake_case() {
        let op = comment("x", "n");
        let encoded = op.encode().expect("encode");
        assert!(encoded.contains(r#""type":"add_comment""#));
        let noop = serde_json::to_string(&OpPayload::NoOp(NoOpData {})).expect("ser");
        assert_eq!(noop, r#"{"type":"no_op"}"#);
    }

    #[test]
    fn validation_rejects_bad_titles_and_labels() {
        let bad_title = OpPayload::SetTitle(SetTitleData {
            title: "  ".into(),
            was: "old".into(),
        });
        assert!(bad_title.validate().is_err());

        let multi_line = OpPayload::Create(CreateData {
            title: "a\nb".into(),
            message: String::new(),
        });
        assert!(multi_line.validate().is_err());

        let empty_change = OpPayload::LabelChange(LabelChangeData {
            added: vec![],
            removed: vec![],
        });
        assert!(empty_change.validate().is_err());

        let blank_label = OpPayload::LabelChange(LabelChangeData {
            added: vec![" ".into()],
            removed: vec![],
        });
        assert!(blank_label.validate().is_err());
    }

    #[test]
    fn status_parses() {
        assert_eq!("open".parse::<Status>().expect("parse"), Status::Open);
        assert_eq!("closed".parse::<Status>().expect("parse"), Status::Closed);
        assert!("done".parse::<Status>().is_err());
    }
}

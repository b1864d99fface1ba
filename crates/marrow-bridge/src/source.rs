//! The source iterator contract and the normalized remote record shape.
//!
//! A source walks a remote tracker item by item. For each item it yields the
//! item's events in source order; the first event is always the opening post,
//! whose body is the item description. Per-tracker code only has to produce
//! these records; deduplication, identity handling and commits live in the
//! engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use marrow_core::ErrorCode;
use marrow_core::identity::IdentityProfile;
use marrow_core::model::Status;

/// Login shown for deleted remote accounts.
pub const GHOST_LOGIN: &str = "ghost";

/// A remote user as reported by the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteActor {
    pub login: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl RemoteActor {
    #[must_use]
    pub fn new(login: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            name: None,
            email: None,
            avatar_url: None,
        }
    }

    /// Stand-in for an account the tracker no longer knows.
    #[must_use]
    pub fn ghost() -> Self {
        Self {
            name: Some("Ghost".to_string()),
            ..Self::new(GHOST_LOGIN)
        }
    }

    #[must_use]
    pub fn profile(&self) -> IdentityProfile {
        IdentityProfile {
            name: self.name.clone(),
            email: self.email.clone(),
            login: self.login.clone(),
            avatar_url: self.avatar_url.clone(),
            metadata: Default::default(),
        }
    }
}

/// One tracked item (issue, bug, ticket).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteItem {
    /// Stable remote id.
    pub id: String,
    /// Canonical web url; used to find the local entity.
    pub url: String,
    pub title: String,
    pub author: RemoteActor,
    pub created_at: DateTime<Utc>,
}

/// One revision of a remote comment body. `body: None` is a deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEdit {
    pub id: String,
    pub editor: RemoteActor,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub body: Option<String>,
}

/// What happened in a remote event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RemoteEventKind {
    /// A comment. For the opening event, the item description.
    ///
    /// When `edits` is non-empty its first entry is the original text and
    /// `body` is the current text.
    Comment {
        body: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        edits: Vec<RemoteEdit>,
    },
    StatusChange {
        status: Status,
    },
    LabelAdd {
        label: String,
    },
    LabelRemove {
        label: String,
    },
    TitleChange {
        title: String,
    },
    /// An event the model has no counterpart for.
    Unsupported {
        kind: String,
    },
}

/// One event of an item's timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEvent {
    /// Stable remote id, used for deduplication.
    pub id: String,
    pub actor: RemoteActor,
    pub created_at: DateTime<Utc>,
    pub kind: RemoteEventKind,
}

/// Errors a source reports. Every one is terminal for the run.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("request to {url} failed: {message}")]
    Http { url: String, message: String },

    #[error("failed to decode {what}: {message}")]
    Decode { what: String, message: String },

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Protocol(String),
}

impl SourceError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::RemoteFetchFailure
    }
}

/// A per-tracker iterator over items and their events.
///
/// `Ok(None)` means exhausted; `Err` is a terminal failure. `next_event`
/// refers to the item most recently returned by `next_item`.
pub trait Source: Send {
    /// Origin tag written into imported metadata (`github`, `jsonl`, ...).
    fn target(&self) -> &str;

    fn next_item(&mut self) -> Result<Option<RemoteItem>, SourceError>;

    fn next_event(&mut self) -> Result<Option<RemoteEvent>, SourceError>;
}

/// Metadata key recording where an operation came from.
pub const ORIGIN_KEY: &str = "origin";

/// Metadata keys derived from a target name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataKeys {
    /// Value for the `origin` key.
    pub target: String,
    /// `<target>-id`, the remote id of an event, comment or edit.
    pub id: String,
    /// `<target>-item-id`, the remote id of the item. Only the create
    /// operation and its export markers carry it, so an event whose id
    /// happens to equal its item's id never resolves to the description.
    pub item_id: String,
    /// `<target>-url`
    pub url: String,
    /// `<target>-login`, attached to identities.
    pub login: String,
}

impl MetadataKeys {
    #[must_use]
    pub fn for_target(target: &str) -> Self {
        Self {
            target: target.to_string(),
            id: format!("{target}-id"),
            item_id: format!("{target}-item-id"),
            url: format!("{target}-url"),
            login: format!("{target}-login"),
        }
    }
}

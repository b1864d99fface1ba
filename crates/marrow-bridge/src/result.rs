//! Per-event results streamed out of bridge runs.

use std::fmt;

use marrow_core::model::{ContentHash, EntityId, IdentityId};
use serde::Serialize;

use crate::error::SyncError;

/// One outcome of an import run. `Error` is always the last result.
#[derive(Debug)]
pub enum ImportResult {
    /// A new entity was created from a remote item.
    Entity { id: EntityId },
    Comment { entity: EntityId, op: ContentHash },
    CommentEdition { entity: EntityId, op: ContentHash },
    StatusChange { entity: EntityId, op: ContentHash },
    TitleEdition { entity: EntityId, op: ContentHash },
    LabelChange { entity: EntityId, op: ContentHash },
    /// A local identity was created for a remote user.
    Identity { id: IdentityId },
    /// Nothing to do for this record.
    Nothing {
        entity: Option<EntityId>,
        reason: String,
    },
    Error { error: SyncError, context: String },
}

impl ImportResult {
    /// Short stable tag, used for counters and JSON output.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Entity { .. } => "entity",
            Self::Comment { .. } => "comment",
            Self::CommentEdition { .. } => "comment_edition",
            Self::StatusChange { .. } => "status_change",
            Self::TitleEdition { .. } => "title_edition",
            Self::LabelChange { .. } => "label_change",
            Self::Identity { .. } => "identity",
            Self::Nothing { .. } => "nothing",
            Self::Error { .. } => "error",
        }
    }

    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    #[must_use]
    pub const fn is_nothing(&self) -> bool {
        matches!(self, Self::Nothing { .. })
    }
}

impl fmt::Display for ImportResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entity { id } => write!(f, "new entity {}", id.human()),
            Self::Comment { entity, op } => {
                write!(f, "new comment {} on {}", op.human(), entity.human())
            }
            Self::CommentEdition { entity, op } => {
                write!(f, "comment edited by {} on {}", op.human(), entity.human())
            }
            Self::StatusChange { entity, op } => {
                write!(f, "status changed by {} on {}", op.human(), entity.human())
            }
            Self::TitleEdition { entity, op } => {
                write!(f, "title changed by {} on {}", op.human(), entity.human())
            }
            Self::LabelChange { entity, op } => {
                write!(f, "labels changed by {} on {}", op.human(), entity.human())
            }
            Self::Identity { id } => write!(f, "new identity {}", id.human()),
            Self::Nothing {
                entity: Some(entity),
                reason,
            } => write!(f, "nothing to do on {}: {reason}", entity.human()),
            Self::Nothing { entity: None, reason } => write!(f, "nothing to do: {reason}"),
            Self::Error { error, context } if context.is_empty() => write!(f, "import error: {error}"),
            Self::Error { error, context } => write!(f, "import error at {context}: {error}"),
        }
    }
}

/// One outcome of an export run. `Error` is always the last result.
#[derive(Debug)]
pub enum ExportResult {
    /// A local entity was pushed as a new remote item.
    Entity { id: EntityId, remote_url: String },
    Comment { entity: EntityId, op: ContentHash },
    CommentEdition { entity: EntityId, op: ContentHash },
    StatusChange { entity: EntityId, op: ContentHash },
    TitleEdition { entity: EntityId, op: ContentHash },
    LabelChange { entity: EntityId, op: ContentHash },
    Nothing {
        entity: Option<EntityId>,
        reason: String,
    },
    Error { error: SyncError, context: String },
}

impl ExportResult {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Entity { .. } => "entity",
            Self::Comment { .. } => "comment",
            Self::CommentEdition { .. } => "comment_edition",
            Self::StatusChange { .. } => "status_change",
            Self::TitleEdition { .. } => "title_edition",
            Self::LabelChange { .. } => "label_change",
            Self::Nothing { .. } => "nothing",
            Self::Error { .. } => "error",
        }
    }

    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    #[must_use]
    pub const fn is_nothing(&self) -> bool {
        matches!(self, Self::Nothing { .. })
    }
}

impl fmt::Display for ExportResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entity { id, remote_url } => {
                write!(f, "exported entity {} as {remote_url}", id.human())
            }
            Self::Comment { entity, op } => {
                write!(f, "exported comment {} on {}", op.human(), entity.human())
            }
            Self::CommentEdition { entity, op } => {
                write!(f, "exported comment edit {} on {}", op.human(), entity.human())
            }
            Self::StatusChange { entity, op } => {
                write!(f, "exported status change {} on {}", op.human(), entity.human())
            }
            Self::TitleEdition { entity, op } => {
                write!(f, "exported title change {} on {}", op.human(), entity.human())
            }
            Self::LabelChange { entity, op } => {
                write!(f, "exported label change {} on {}", op.human(), entity.human())
            }
            Self::Nothing {
                entity: Some(entity),
                reason,
            } => write!(f, "nothing to do on {}: {reason}", entity.human()),
            Self::Nothing { entity: None, reason } => write!(f, "nothing to do: {reason}"),
            Self::Error { error, context } if context.is_empty() => write!(f, "export error: {error}"),
            Self::Error { error, context } => write!(f, "export error at {context}: {error}"),
        }
    }
}

/// Per-kind counters for a finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub entities: usize,
    pub comments: usize,
    pub edits: usize,
    pub status_changes: usize,
    pub title_changes: usize,
    pub label_changes: usize,
    pub identities: usize,
    pub nothing: usize,
    pub errors: usize,
}

impl RunStats {
    pub fn tally_import(&mut self, result: &ImportResult) {
        match result {
            ImportResult::Entity { .. } => self.entities += 1,
            ImportResult::Comment { .. } => self.comments += 1,
            ImportResult::CommentEdition { .. } => self.edits += 1,
            ImportResult::StatusChange { .. } => self.status_changes += 1,
            ImportResult::TitleEdition { .. } => self.title_changes += 1,
            ImportResult::LabelChange { .. } => self.label_changes += 1,
            ImportResult::Identity { .. } => self.identities += 1,
            ImportResult::Nothing { .. } => self.nothing += 1,
            ImportResult::Error { .. } => self.errors += 1,
        }
    }

    pub fn tally_export(&mut self, result: &ExportResult) {
        match result {
            ExportResult::Entity { .. } => self.entities += 1,
            ExportResult::Comment { .. } => self.comments += 1,
            ExportResult::CommentEdition { .. } => self.edits += 1,
            ExportResult::StatusChange { .. } => self.status_changes += 1,
            ExportResult::TitleEdition { .. } => self.title_changes += 1,
            ExportResult::LabelChange { .. } => self.label_changes += 1,
            ExportResult::Nothing { .. } => self.nothing += 1,
            ExportResult::Error { .. } => self.errors += 1,
        }
    }

    /// Results that changed local or remote state.
    #[must_use]
    pub const fn changes(&self) -> usize {
        self.entities
            + self.comments
            + self.edits
            + self.status_changes
            + self.title_changes
            + self.label_changes
            + self.identities
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_count_changes_only() {
        let id = ContentHash::of_bytes(b"entity");
        let mut stats = RunStats::default();
        stats.tally_import(&ImportResult::Entity { id: id.clone() });
        stats.tally_import(&ImportResult::Nothing {
            entity: Some(id.clone()),
            reason: "already imported".into(),
        });
        stats.tally_import(&ImportResult::Error {
            error: SyncError::Cancelled,
            context: String::new(),
        });
        assert_eq!(stats.changes(), 1);
        assert_eq!(stats.nothing, 1);
        assert_eq!(stats.errors, 1);
    }

    #[test]
    fn display_includes_context() {
        let shown = ImportResult::Error {
            error: SyncError::NoEvents { item: "42".into() },
            context: "https://example.test/42".into(),
        }
        .to_string();
        assert!(shown.contains("https://example.test/42"));
        assert!(shown.contains("no events"));
    }
}

use marrow_core::{CacheError, ErrorCode, IdentityError};

use crate::export::SinkError;
use crate::source::SourceError;

/// Why a bridge run stopped early. Reported as the final `Error` result.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("run cancelled")]
    Cancelled,

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("remote item {item} has no events")]
    NoEvents { item: String },

    #[error("remote item {item} opens with a {kind} event instead of its description")]
    UnexpectedOpening { item: String, kind: String },

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error("failed to commit entity {entity}: {source}")]
    Commit {
        entity: String,
        #[source]
        source: CacheError,
    },
}

impl SyncError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Cancelled => ErrorCode::Cancelled,
            Self::Source(e) => e.code(),
            Self::Sink(e) => e.code(),
            Self::NoEvents { .. } | Self::UnexpectedOpening { .. } => ErrorCode::RemoteFetchFailure,
            Self::Cache(e) => e.code(),
            Self::Identity(e) => e.code(),
            Self::Commit { .. } => ErrorCode::StorageFailure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes() {
        assert_eq!(SyncError::Cancelled.code(), ErrorCode::Cancelled);
        assert_eq!(
            SyncError::NoEvents { item: "7".into() }.code(),
            ErrorCode::RemoteFetchFailure
        );
        let commit = SyncError::Commit {
            entity: "abc".into(),
            source: CacheError::EntityNotFound("abc".into()),
        };
        assert_eq!(commit.code(), ErrorCode::StorageFailure);
        assert!(commit.to_string().contains("abc"));
    }
}

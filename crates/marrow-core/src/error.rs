use std::fmt;

/// Machine-readable error codes for agent-friendly decision making.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotInitialized,
    ConfigParseError,
    EntityNotFound,
    IdentityNotFound,
    AmbiguousId,
    AmbiguousMatch,
    InvalidInput,
    CorruptLog,
    StorageFailure,
    LockContention,
    RemoteFetchFailure,
    RemoteWriteFailure,
    Cancelled,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NotInitialized => "E1001",
            Self::ConfigParseError => "E1002",
            Self::EntityNotFound => "E2001",
            Self::IdentityNotFound => "E2002",
            Self::AmbiguousId => "E2003",
            Self::AmbiguousMatch => "E2004",
            Self::InvalidInput => "E2005",
            Self::CorruptLog => "E3001",
            Self::StorageFailure => "E5001",
            Self::LockContention => "E5002",
            Self::RemoteFetchFailure => "E6001",
            Self::RemoteWriteFailure => "E6002",
            Self::Cancelled => "E7001",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::NotInitialized => "Repository not initialized",
            Self::ConfigParseError => "Config file parse error",
            Self::EntityNotFound => "Entity not found",
            Self::IdentityNotFound => "Identity not found",
            Self::AmbiguousId => "Ambiguous id prefix",
            Self::AmbiguousMatch => "Several records claim the same external identity",
            Self::InvalidInput => "Invalid input",
            Self::CorruptLog => "Corrupt operation log",
            Self::StorageFailure => "Storage write or read failed",
            Self::LockContention => "Lock contention",
            Self::RemoteFetchFailure => "Remote fetch failed",
            Self::RemoteWriteFailure => "Remote write failed",
            Self::Cancelled => "Run cancelled",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators and agents.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::NotInitialized => Some("Run `mw init` to initialize this repository."),
            Self::ConfigParseError => Some("Fix syntax in .marrow/config.toml and retry."),
            Self::EntityNotFound | Self::IdentityNotFound => None,
            Self::AmbiguousId => Some("Use a longer id prefix to disambiguate."),
            Self::AmbiguousMatch => {
                Some("Inspect the duplicated records; they must be reconciled by hand.")
            }
            Self::InvalidInput => None,
            Self::CorruptLog => Some("Restore the damaged log from another clone."),
            Self::StorageFailure => Some("Check disk space and write permissions."),
            Self::LockContention => Some("Retry after the other `mw` process releases its lock."),
            Self::RemoteFetchFailure | Self::RemoteWriteFailure => {
                Some("Check network access and credentials, then rerun; runs resume safely.")
            }
            Self::Cancelled => Some("Rerun the command; already committed items are kept."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

//! marrow-bridge: mirror external issue trackers into marrow entities.
//!
//! A bridge is a [`Source`] (read side) and optionally a [`Sink`] (write
//! side) for one tracker. The engines in [`import`] and [`export`] are
//! generic over both: per-tracker code only normalizes records, while
//! deduplication, identity handling and commits are shared.
//!
//! Runs execute on a blocking thread and stream their results through a
//! bounded channel ([`ResultStream`]). Cancellation is cooperative and
//! checked once per item.

pub mod error;
pub mod export;
pub mod github;
pub mod import;
pub mod records;
pub mod registry;
pub mod result;
pub mod source;
pub mod stream;

pub use error::SyncError;
pub use export::{RemoteRef, Sink, SinkError, export_all};
pub use import::import_all;
pub use records::{JsonlSink, RecordSource, RemoteRecord};
pub use registry::{BridgeFactory, BridgeRegistry};
pub use result::{ExportResult, ImportResult, RunStats};
pub use source::{
    MetadataKeys, RemoteActor, RemoteEdit, RemoteEvent, RemoteEventKind, RemoteItem, Source,
    SourceError,
};
pub use stream::ResultStream;

//! marrow-core library.
//!
//! # Conventions
//!
//! - **Errors**: per-module `thiserror` enums, each mapping to a stable
//!   [`error::ErrorCode`]. Binaries wrap them in `anyhow::Result`.
//! - **Logging**: `tracing` macros (`info!`, `warn!`, `debug!`).

pub mod cache;
pub mod canonical;
pub mod config;
pub mod error;
pub mod identity;
pub mod lock;
pub mod model;
pub mod store;

pub use cache::{CacheError, EntityExcerpt, EntityGuard, RepoCache};
pub use error::ErrorCode;
pub use identity::{Identity, IdentityError, IdentityProfile, IdentityRegistry};
pub use model::{ContentHash, Entity, EntityId, IdentityId, Operation, Snapshot};
pub use store::{FileStore, MemoryStore, Store, StoreError};

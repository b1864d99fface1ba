//! GitHub issues over the REST API.
//!
//! Items are issues (pull requests are skipped), identified by issue number
//! and html url. Timeline comments, close/reopen, label and rename events map
//! onto the model; everything else is reported as unsupported. REST exposes
//! no comment edit history, so edits are detected by text comparison.

mod client;
mod sink;
mod source;

pub use client::{DEFAULT_API_URL, GitHubClient, HttpError, RepoSlug};
pub use sink::GitHubSink;
pub use source::GitHubSource;

pub const GITHUB_TARGET: &str = "github";

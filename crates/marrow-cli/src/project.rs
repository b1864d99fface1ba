//! Locating and opening the repository a command runs against.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result, anyhow};
use chrono::Utc;
use marrow_core::config::{self, ProjectConfig};
use marrow_core::model::{Comment, EntityId, IdentityId, Snapshot};
use marrow_core::store::MARROW_DIR;
use marrow_core::{FileStore, Identity, RepoCache, StoreError};

/// An opened repository plus its project config.
pub struct Project {
    pub root: PathBuf,
    pub config: ProjectConfig,
    pub repo: Arc<RepoCache>,
}

/// Walk up from `start` to the first directory holding `.marrow/`.
pub fn find_project_root(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();
    loop {
        if current.join(MARROW_DIR).is_dir() {
            return Some(current);
        }
        if !current.pop() {
            return None;
        }
    }
}

impl Project {
    pub fn open(start: &Path) -> Result<Self> {
        let root = find_project_root(start)
            .ok_or_else(|| StoreError::NotInitialized(start.join(MARROW_DIR)))?;
        let config = config::load_project_config(&root)?;
        let store = FileStore::open(root.join(MARROW_DIR))?;
        let repo = RepoCache::open(Arc::new(store))
            .with_context(|| format!("failed to load repository at {}", root.display()))?;
        Ok(Self {
            root,
            config,
            repo: Arc::new(repo),
        })
    }

    /// The identity local writes are attributed to (`[user] identity`).
    pub fn user(&self) -> Result<Identity> {
        let id = self.config.user.identity.as_deref().ok_or_else(|| {
            anyhow!("no user identity configured; run `mw user create <login>` first")
        })?;
        self.repo
            .identities()
            .resolve_prefix(id)
            .with_context(|| format!("configured identity '{id}' is not in this repository"))
    }

    pub fn resolve_entity(&self, prefix: &str) -> Result<EntityId> {
        Ok(self.repo.resolve_by_prefix(prefix.trim())?)
    }

    /// Login of an identity, falling back to its short id.
    pub fn login_of(&self, id: &IdentityId) -> String {
        self.repo
            .identities()
            .get(id)
            .map_or_else(|_| id.human().to_string(), |i| i.login().to_string())
    }
}

/// A comment of `snapshot` by id prefix. The entity id itself selects the
/// description.
pub fn resolve_comment<'a>(snapshot: &'a Snapshot, prefix: &str) -> Result<&'a Comment> {
    let prefix = prefix.trim();
    let matches: Vec<&Comment> = snapshot
        .comments
        .iter()
        .filter(|c| c.id.has_prefix(prefix))
        .collect();
    match matches.as_slice() {
        [] => Err(anyhow!(
            "entity {} has no comment matching '{prefix}'",
            snapshot.id.human()
        )),
        [one] => Ok(one),
        many => Err(anyhow!(
            "comment prefix '{prefix}' matches {} comments; use a longer prefix",
            many.len()
        )),
    }
}

pub fn now_unix() -> i64 {
    Utc::now().timestamp()
}

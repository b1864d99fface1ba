//! Bridge construction from `[bridge.<name>]` config sections.
//!
//! The registry is an ordinary value built at startup; callers decide which
//! factories it holds.

use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result, anyhow, bail};
use chrono::{DateTime, Utc};
use marrow_core::config::BridgeConfig;

use crate::export::Sink;
use crate::github::{GITHUB_TARGET, GitHubClient, GitHubSink, GitHubSource, RepoSlug};
use crate::records::{JSONL_TARGET, JsonlSink, RecordSource};
use crate::source::{RemoteActor, Source};

pub const DEFAULT_TOKEN_ENV: &str = "GITHUB_TOKEN";

/// Builds the source and sink for one kind of tracker.
pub trait BridgeFactory: Send + Sync {
    /// Value of `target` in the config section.
    fn target(&self) -> &'static str;

    /// Reject a config section this factory cannot use.
    fn validate(&self, config: &BridgeConfig) -> Result<()>;

    fn source(
        &self,
        project_root: &Path,
        config: &BridgeConfig,
        since: Option<DateTime<Utc>>,
    ) -> Result<Box<dyn Source>>;

    fn sink(&self, project_root: &Path, config: &BridgeConfig) -> Result<Box<dyn Sink>>;
}

#[derive(Default)]
pub struct BridgeRegistry {
    factories: BTreeMap<&'static str, Box<dyn BridgeFactory>>,
}

impl BridgeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in bridge.
    #[must_use]
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(JsonlFactory));
        registry.register(Box::new(GitHubFactory));
        registry
    }

    /// Add a factory, replacing any previous one for the same target.
    pub fn register(&mut self, factory: Box<dyn BridgeFactory>) {
        self.factories.insert(factory.target(), factory);
    }

    #[must_use]
    pub fn targets(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }

    pub fn factory(&self, target: &str) -> Result<&dyn BridgeFactory> {
        self.factories
            .get(target)
            .map(|f| &**f)
            .ok_or_else(|| {
                anyhow!(
                    "unknown bridge target '{target}' (known: {})",
                    self.targets().join(", ")
                )
            })
    }

    pub fn source(
        &self,
        project_root: &Path,
        config: &BridgeConfig,
        since: Option<DateTime<Utc>>,
    ) -> Result<Box<dyn Source>> {
        let factory = self.factory(&config.target)?;
        factory.validate(config)?;
        factory.source(project_root, config, since)
    }

    pub fn sink(&self, project_root: &Path, config: &BridgeConfig) -> Result<Box<dyn Sink>> {
        let factory = self.factory(&config.target)?;
        factory.validate(config)?;
        factory.sink(project_root, config)
    }
}

struct JsonlFactory;

impl JsonlFactory {
    fn path(project_root: &Path, config: &BridgeConfig) -> Result<PathBuf> {
        let path = config
            .path
            .as_ref()
            .context("jsonl bridge needs `path`")?;
        Ok(if path.is_absolute() {
            path.clone()
        } else {
            project_root.join(path)
        })
    }
}

impl BridgeFactory for JsonlFactory {
    fn target(&self) -> &'static str {
        JSONL_TARGET
    }

    fn validate(&self, config: &BridgeConfig) -> Result<()> {
        if config.path.is_none() {
            bail!("jsonl bridge needs `path`");
        }
        Ok(())
    }

    fn source(
        &self,
        project_root: &Path,
        config: &BridgeConfig,
        since: Option<DateTime<Utc>>,
    ) -> Result<Box<dyn Source>> {
        let path = Self::path(project_root, config)?;
        let source = RecordSource::open_jsonl(&path, since)
            .with_context(|| format!("failed to open {}", path.display()))?;
        Ok(Box::new(source))
    }

    fn sink(&self, project_root: &Path, config: &BridgeConfig) -> Result<Box<dyn Sink>> {
        let path = Self::path(project_root, config)?;
        let actor = RemoteActor::new(config.owner.as_deref().unwrap_or("marrow"));
        let sink = JsonlSink::open(&path, actor)
            .with_context(|| format!("failed to open {}", path.display()))?;
        Ok(Box::new(sink))
    }
}

struct GitHubFactory;

impl GitHubFactory {
    fn repo(config: &BridgeConfig) -> Result<RepoSlug> {
        let owner = config.owner.as_deref().context("github bridge needs `owner`")?;
        let project = config
            .project
            .as_deref()
            .context("github bridge needs `project`")?;
        RepoSlug::new(owner, project).map_err(|e| anyhow!(e))
    }

    fn token(config: &BridgeConfig) -> Option<String> {
        let var = config.token_env.as_deref().unwrap_or(DEFAULT_TOKEN_ENV);
        env::var(var).ok().filter(|t| !t.trim().is_empty())
    }
}

impl BridgeFactory for GitHubFactory {
    fn target(&self) -> &'static str {
        GITHUB_TARGET
    }

    fn validate(&self, config: &BridgeConfig) -> Result<()> {
        Self::repo(config).map(drop)
    }

    fn source(
        &self,
        _project_root: &Path,
        config: &BridgeConfig,
        since: Option<DateTime<Utc>>,
    ) -> Result<Box<dyn Source>> {
        let client = GitHubClient::new(config.api_url.as_deref(), Self::token(config));
        Ok(Box::new(GitHubSource::new(client, Self::repo(config)?, since)))
    }

    fn sink(&self, _project_root: &Path, config: &BridgeConfig) -> Result<Box<dyn Sink>> {
        let var = config.token_env.as_deref().unwrap_or(DEFAULT_TOKEN_ENV);
        let token = Self::token(config)
            .with_context(|| format!("exporting to github needs a token in ${var}"))?;
        let client = GitHubClient::new(config.api_url.as_deref(), Some(token));
        Ok(Box::new(GitHubSink::new(client, Self::repo(config)?)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(target: &str) -> BridgeConfig {
        BridgeConfig {
            target: target.to_string(),
            owner: None,
            project: None,
            token_env: None,
            path: None,
            api_url: None,
        }
    }

    #[test]
    fn builtin_targets() {
        assert_eq!(BridgeRegistry::with_builtin().targets(), vec!["github", "jsonl"]);
        assert!(BridgeRegistry::new().targets().is_empty());
    }

    #[test]
    fn unknown_target_is_rejected() {
        let registry = BridgeRegistry::with_builtin();
        let err = registry
            .source(Path::new("."), &config("gitlab"), None)
            .err()
            .expect("must fail");
        assert!(err.to_string().contains("unknown bridge target 'gitlab'"));
    }

    #[test]
    fn github_needs_owner_and_project() {
        let registry = BridgeRegistry::with_builtin();
        let mut cfg = config("github");
        assert!(registry.source(Path::new("."), &cfg, None).is_err());
        cfg.owner = Some("octo".into());
        cfg.project = Some("hello".into());
        assert!(registry.source(Path::new("."), &cfg, None).is_ok());
    }

    #[test]
    fn github_export_needs_token() {
        let mut cfg = config("github");
        cfg.owner = Some("octo".into());
        cfg.project = Some("hello".into());
        cfg.token_env = Some("MARROW_TEST_TOKEN_THAT_IS_NEVER_SET".into());
        let err = BridgeRegistry::with_builtin()
            .sink(Path::new("."), &cfg)
            .err()
            .expect("must fail");
        assert!(err.to_string().contains("MARROW_TEST_TOKEN_THAT_IS_NEVER_SET"));
    }

    #[test]
    fn jsonl_paths_resolve_against_project_root() {
        let tmp = tempfile::TempDir::new().expect("tempdir");
        let mut cfg = config("jsonl");
        cfg.path = Some(PathBuf::from("dump.jsonl"));
        let resolved = JsonlFactory::path(tmp.path(), &cfg).expect("path");
        assert_eq!(resolved, tmp.path().join("dump.jsonl"));
        // A missing dump is an empty source.
        let mut source = BridgeRegistry::with_builtin()
            .source(tmp.path(), &cfg, None)
            .expect("source");
        assert!(source.next_item().expect("item").is_none());
    }
}

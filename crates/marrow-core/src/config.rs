use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use crate::error::ErrorCode;
use crate::store::MARROW_DIR;

/// Capacity of the result channel between a sync run and its consumer.
pub const DEFAULT_RESULT_BUFFER: usize = 16;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub user: UserSection,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub bridge: BTreeMap<String, BridgeConfig>,
}

/// The identity used for local writes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_result_buffer")]
    pub result_buffer: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            result_buffer: default_result_buffer(),
        }
    }
}

/// One configured bridge (`[bridge.<name>]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Source kind: `github` or `jsonl`.
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    /// Environment variable holding the API token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,
    /// Dump file for `jsonl` bridges.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UserConfig {
    #[serde(default)]
    pub output: Option<String>,
}

/// A config or state file that exists but does not parse.
#[derive(Debug, thiserror::Error)]
#[error("failed to parse {}: {reason}", .path.display())]
pub struct ConfigParseError {
    pub path: PathBuf,
    pub reason: String,
}

impl ConfigParseError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::ConfigParseError
    }
}

fn parse_toml<T: serde::de::DeserializeOwned>(path: &Path, content: &str) -> Result<T> {
    toml::from_str::<T>(content).map_err(|e| {
        ConfigParseError {
            path: path.to_path_buf(),
            reason: e.message().to_string(),
        }
        .into()
    })
}

/// Per-bridge sync watermarks, stored in `.marrow/bridges/<name>.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_import: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_export: Option<DateTime<Utc>>,
}

fn config_path(project_root: &Path) -> PathBuf {
    project_root.join(MARROW_DIR).join("config.toml")
}

fn state_path(project_root: &Path, bridge: &str) -> PathBuf {
    project_root
        .join(MARROW_DIR)
        .join("bridges")
        .join(format!("{bridge}.toml"))
}

pub fn load_project_config(project_root: &Path) -> Result<ProjectConfig> {
    let path = config_path(project_root);
    if !path.exists() {
        return Ok(ProjectConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let config: ProjectConfig = parse_toml(&path, &content)?;
    if config.sync.result_buffer == 0 {
        bail!("{}: sync.result_buffer must be at least 1", path.display());
    }
    Ok(config)
}

pub fn save_project_config(project_root: &Path, config: &ProjectConfig) -> Result<()> {
    let path = config_path(project_root);
    let content = toml::to_string_pretty(config).context("Failed to serialize config")?;
    std::fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))
}

pub fn load_user_config() -> Result<UserConfig> {
    let Some(config_dir) = dirs::config_dir() else {
        return Ok(UserConfig::default());
    };

    let path = config_dir.join("marrow/config.toml");
    if !path.exists() {
        return Ok(UserConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    parse_toml(&path, &content)
}

pub fn load_bridge_state(project_root: &Path, bridge: &str) -> Result<BridgeState> {
    let path = state_path(project_root, bridge);
    if !path.exists() {
        return Ok(BridgeState::default());
    }
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse_toml(&path, &content)
}

pub fn save_bridge_state(project_root: &Path, bridge: &str, state: &BridgeState) -> Result<()> {
    let path = state_path(project_root, bridge);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let content = toml::to_string_pretty(state).context("Failed to serialize bridge state")?;
    std::fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))
}

/// Pick the output mode: `--json`, then `MARROW_FORMAT`, then user config,
/// then `pretty` on a terminal and `text` otherwise.
#[must_use]
pub fn resolve_output(cli_json: bool, user_output: Option<&str>, env_format: Option<&str>) -> String {
    fn normalize_output_mode(raw: &str) -> Option<&'static str> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pretty" => Some("pretty"),
            "text" => Some("text"),
            "json" => Some("json"),
            _ => None,
        }
    }

    if cli_json {
        return "json".to_string();
    }

    if let Some(mode) = env_format.and_then(normalize_output_mode) {
        return mode.to_string();
    }

    if let Some(mode) = user_output.and_then(normalize_output_mode) {
        return mode.to_string();
    }

    if std::io::stdout().is_terminal() {
        "pretty".to_string()
    } else {
        "text".to_string()
    }
}

const fn default_result_buffer() -> usize {
    DEFAULT_RESULT_BUFFER
}

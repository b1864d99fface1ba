//! `mw bridge`: configure bridges and run imports/exports.
//!
//! Each run executes on a tokio runtime owned by the command. Ctrl-C cancels
//! the shared token; the engine stops after the item it is working on and
//! reports the cancellation as its last result. A bridge's watermark only
//! advances after a run without errors.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result, bail};
use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};
use marrow_bridge::{
    BridgeRegistry, ExportResult, ImportResult, ResultStream, RunStats, export_all, import_all,
};
use marrow_core::config::{self, BridgeConfig, BridgeState, ProjectConfig};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::output::{OutputMode, render, render_mode};
use crate::project::Project;

#[derive(Args, Debug)]
pub struct BridgeArgs {
    #[command(subcommand)]
    pub command: BridgeCommand,
}

#[derive(Subcommand, Debug)]
pub enum BridgeCommand {
    #[command(about = "List configured bridges")]
    Ls,

    #[command(
        about = "Configure a bridge",
        after_help = "EXAMPLES:\n    # Mirror GitHub issues (token read from $GITHUB_TOKEN)\n    mw bridge add upstream --target github --owner octo --project hello\n\n    # Exchange records through a JSONL dump\n    mw bridge add dump --target jsonl --path ../shared/issues.jsonl"
    )]
    Add(BridgeAddArgs),

    #[command(about = "Remove a bridge and forget its watermarks")]
    Rm(BridgeRmArgs),

    #[command(
        about = "Import remote changes",
        after_help = "EXAMPLES:\n    # Pull the only configured bridge\n    mw bridge pull\n\n    # Pull everything changed in the last week\n    mw bridge pull upstream --since 2024-05-01T00:00:00Z"
    )]
    Pull(BridgeRunArgs),

    #[command(about = "Export local changes")]
    Push(BridgeRunArgs),
}

#[derive(Args, Debug)]
pub struct BridgeAddArgs {
    /// Bridge name, used by `pull`/`push`.
    pub name: String,

    /// Tracker kind (`github` or `jsonl`).
    #[arg(long)]
    pub target: String,

    #[arg(long)]
    pub owner: Option<String>,

    #[arg(long)]
    pub project: Option<String>,

    /// Environment variable holding the API token.
    #[arg(long)]
    pub token_env: Option<String>,

    /// Dump file for `jsonl` bridges, relative to the project root.
    #[arg(long)]
    pub path: Option<PathBuf>,

    /// API base URL (GitHub Enterprise and test servers).
    #[arg(long)]
    pub api_url: Option<String>,

    /// Replace an existing bridge of the same name.
    #[arg(long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct BridgeRmArgs {
    pub name: String,
}

#[derive(Args, Debug)]
pub struct BridgeRunArgs {
    /// Bridge to run. Optional when exactly one is configured.
    pub name: Option<String>,

    /// Run every configured bridge.
    #[arg(long, conflicts_with = "name")]
    pub all: bool,

    /// Only consider changes at or after this RFC 3339 time.
    #[arg(long)]
    pub since: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct BridgeRow {
    name: String,
    #[serde(flatten)]
    config: BridgeConfig,
    #[serde(flatten)]
    state: BridgeState,
}

#[derive(Debug, Serialize)]
struct RunReport {
    bridge: String,
    target: String,
    direction: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    since: Option<DateTime<Utc>>,
    stats: RunStats,
    errors: Vec<String>,
    cancelled: bool,
}

pub fn run_bridge(args: &BridgeArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    match &args.command {
        BridgeCommand::Ls => run_ls(output, project_root),
        BridgeCommand::Add(add) => run_add(add, output, project_root),
        BridgeCommand::Rm(rm) => run_rm(rm, output, project_root),
        BridgeCommand::Pull(run) => run_pull(run, output, project_root),
        BridgeCommand::Push(run) => run_push(run, output, project_root),
    }
}

fn run_ls(output: OutputMode, project_root: &Path) -> Result<()> {
    let project = Project::open(project_root)?;
    let rows = project
        .config
        .bridge
        .iter()
        .map(|(name, cfg)| {
            Ok(BridgeRow {
                name: name.clone(),
                config: cfg.clone(),
                state: config::load_bridge_state(&project.root, name)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    render_mode(
        output,
        &rows,
        |rows, w| {
            for r in rows {
                writeln!(w, "{}  {}  {}", r.name, r.config.target, describe_remote(&r.config))?;
            }
            Ok(())
        },
        |rows, w| {
            if rows.is_empty() {
                return writeln!(w, "No bridges. Add one with `mw bridge add`.");
            }
            for r in rows {
                writeln!(w, "{} ({}): {}", r.name, r.config.target, describe_remote(&r.config))?;
                writeln!(w, "    last pull: {}", describe_time(r.state.last_import))?;
                writeln!(w, "    last push: {}", describe_time(r.state.last_export))?;
            }
            Ok(())
        },
    )
}

fn describe_remote(cfg: &BridgeConfig) -> String {
    match (&cfg.owner, &cfg.project, &cfg.path) {
        (Some(owner), Some(project), _) => format!("{owner}/{project}"),
        (_, _, Some(path)) => path.display().to_string(),
        _ => "-".to_string(),
    }
}

fn describe_time(at: Option<DateTime<Utc>>) -> String {
    at.map_or_else(|| "never".to_string(), |t| t.to_rfc3339())
}

fn run_add(args: &BridgeAddArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let mut project = Project::open(project_root)?;
    let name = args.name.trim();
    if name.is_empty() || name.contains(['/', '\\', '.']) {
        bail!("invalid bridge name '{name}'");
    }
    if project.config.bridge.contains_key(name) && !args.force {
        bail!("bridge '{name}' already exists. Use --force to replace it.");
    }

    let cfg = BridgeConfig {
        target: args.target.trim().to_string(),
        owner: args.owner.clone(),
        project: args.project.clone(),
        token_env: args.token_env.clone(),
        path: args.path.clone(),
        api_url: args.api_url.clone(),
    };
    let registry = BridgeRegistry::with_builtin();
    registry.factory(&cfg.target)?.validate(&cfg)?;

    project.config.bridge.insert(name.to_string(), cfg.clone());
    config::save_project_config(&project.root, &project.config)?;
    config::save_bridge_state(&project.root, name, &BridgeState::default())?;
    info!(bridge = name, target = cfg.target.as_str(), "configured bridge");

    let row = BridgeRow {
        name: name.to_string(),
        config: cfg,
        state: BridgeState::default(),
    };
    render(output, &row, |r, w| {
        writeln!(w, "✓ Added bridge {} ({}: {})", r.name, r.config.target, describe_remote(&r.config))
    })
}

fn run_rm(args: &BridgeRmArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let mut project = Project::open(project_root)?;
    if project.config.bridge.remove(&args.name).is_none() {
        bail!("no bridge named '{}'", args.name);
    }
    config::save_project_config(&project.root, &project.config)?;
    config::save_bridge_state(&project.root, &args.name, &BridgeState::default())?;

    let out = serde_json::json!({ "ok": true, "removed": args.name });
    render(output, &out, |_, w| writeln!(w, "✓ Removed bridge {}", args.name))
}

/// Bridge names a run applies to.
fn select_bridges(config: &ProjectConfig, args: &BridgeRunArgs) -> Result<Vec<String>> {
    if config.bridge.is_empty() {
        bail!("no bridges configured. Add one with `mw bridge add`.");
    }
    if args.all {
        return Ok(config.bridge.keys().cloned().collect());
    }
    match &args.name {
        Some(name) if config.bridge.contains_key(name) => Ok(vec![name.clone()]),
        Some(name) => bail!(
            "no bridge named '{name}' (configured: {})",
            config.bridge.keys().cloned().collect::<Vec<_>>().join(", ")
        ),
        None if config.bridge.len() == 1 => Ok(config.bridge.keys().cloned().collect()),
        None => bail!("several bridges are configured; name one or pass --all"),
    }
}

fn bridge_config<'a>(config: &'a ProjectConfig, name: &str) -> Result<&'a BridgeConfig> {
    config
        .bridge
        .get(name)
        .with_context(|| format!("no bridge named '{name}'"))
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")
}

async fn watch_interrupt(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        warn!("interrupt received; stopping after the current item");
        cancel.cancel();
    }
}

/// What the CLI needs from a streamed result.
trait RunResult: fmt::Display + Send + 'static {
    fn tally(&self, stats: &mut RunStats);
    fn is_error(&self) -> bool;
    fn is_nothing(&self) -> bool;
}

impl RunResult for ImportResult {
    fn tally(&self, stats: &mut RunStats) {
        stats.tally_import(self);
    }
    fn is_error(&self) -> bool {
        Self::is_error(self)
    }
    fn is_nothing(&self) -> bool {
        Self::is_nothing(self)
    }
}

impl RunResult for ExportResult {
    fn tally(&self, stats: &mut RunStats) {
        stats.tally_export(self);
    }
    fn is_error(&self) -> bool {
        Self::is_error(self)
    }
    fn is_nothing(&self) -> bool {
        Self::is_nothing(self)
    }
}

/// Consume a run, echoing changes as they arrive (errors go to stderr).
async fn drain<T: RunResult>(
    mut stream: ResultStream<T>,
    output: OutputMode,
) -> (RunStats, Vec<String>) {
    let mut stats = RunStats::default();
    let mut errors = Vec::new();
    while let Some(result) = stream.next().await {
        result.tally(&mut stats);
        if result.is_error() {
            errors.push(result.to_string());
            if !output.is_json() {
                eprintln!("  {result}");
            }
        } else if result.is_nothing() {
            debug!(result = %result, "skipped");
        } else if !output.is_json() {
            println!("  {result}");
        }
    }
    stream.join().await;
    (stats, errors)
}

fn run_pull(args: &BridgeRunArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let project = Project::open(project_root)?;
    let names = select_bridges(&project.config, args)?;
    let registry = BridgeRegistry::with_builtin();
    let buffer = project.config.sync.result_buffer;
    let runtime = runtime()?;
    let cancel = CancellationToken::new();
    runtime.spawn(watch_interrupt(cancel.clone()));

    let mut reports = Vec::new();
    for name in names {
        if cancel.is_cancelled() {
            break;
        }
        let cfg = bridge_config(&project.config, &name)?;
        let mut state = config::load_bridge_state(&project.root, &name)?;
        let since = args.since.or(state.last_import);
        let started = Utc::now();
        let source = registry
            .source(&project.root, cfg, since)
            .with_context(|| format!("bridge '{name}'"))?;

        info!(bridge = name.as_str(), target = cfg.target.as_str(), ?since, "pulling");
        if !output.is_json() {
            println!("{name}: pulling from {}", describe_remote(cfg));
        }
        let (stats, errors) = runtime.block_on(async {
            let stream = import_all(project.repo.clone(), source, cancel.clone(), buffer);
            drain(stream, output).await
        });

        if errors.is_empty() {
            state.last_import = Some(started);
            config::save_bridge_state(&project.root, &name, &state)?;
        }
        info!(
            bridge = name.as_str(),
            changes = stats.changes(),
            errors = stats.errors,
            "pull finished"
        );
        reports.push(RunReport {
            bridge: name.clone(),
            target: cfg.target.clone(),
            direction: "pull",
            since,
            stats,
            errors,
            cancelled: cancel.is_cancelled(),
        });
    }

    finish(output, &reports)
}

fn run_push(args: &BridgeRunArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let project = Project::open(project_root)?;
    let me = project.user()?;
    let names = select_bridges(&project.config, args)?;
    let registry = BridgeRegistry::with_builtin();
    let buffer = project.config.sync.result_buffer;
    let runtime = runtime()?;
    let cancel = CancellationToken::new();
    runtime.spawn(watch_interrupt(cancel.clone()));

    let mut reports = Vec::new();
    for name in names {
        if cancel.is_cancelled() {
            break;
        }
        let cfg = bridge_config(&project.config, &name)?;
        let mut state = config::load_bridge_state(&project.root, &name)?;
        let started = Utc::now();
        let sink = registry
            .sink(&project.root, cfg)
            .with_context(|| format!("bridge '{name}'"))?;

        info!(bridge = name.as_str(), target = cfg.target.as_str(), since = ?args.since, "pushing");
        if !output.is_json() {
            println!("{name}: pushing to {}", describe_remote(cfg));
        }
        let (stats, errors) = runtime.block_on(async {
            let stream = export_all(
                project.repo.clone(),
                sink,
                me.id().clone(),
                args.since,
                cancel.clone(),
                buffer,
            );
            drain(stream, output).await
        });

        if errors.is_empty() {
            state.last_export = Some(started);
            config::save_bridge_state(&project.root, &name, &state)?;
        }
        info!(
            bridge = name.as_str(),
            changes = stats.changes(),
            errors = stats.errors,
            "push finished"
        );
        reports.push(RunReport {
            bridge: name.clone(),
            target: cfg.target.clone(),
            direction: "push",
            since: args.since,
            stats,
            errors,
            cancelled: cancel.is_cancelled(),
        });
    }

    finish(output, &reports)
}

fn finish(output: OutputMode, reports: &[RunReport]) -> Result<()> {
    render(output, &reports, |reports, w| {
        for r in *reports {
            let s = &r.stats;
            writeln!(
                w,
                "{}: {} new, {} comments, {} edits, {} status, {} title, {} label changes, {} unchanged{}",
                r.bridge,
                s.entities,
                s.comments,
                s.edits,
                s.status_changes,
                s.title_changes,
                s.label_changes,
                s.nothing,
                if r.cancelled { " (cancelled)" } else { "" }
            )?;
        }
        Ok(())
    })?;

    let failed = reports.iter().filter(|r| !r.errors.is_empty()).count();
    if failed > 0 {
        bail!("{failed} bridge run(s) reported errors; watermarks were left unchanged");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(names: &[&str]) -> ProjectConfig {
        let mut config = ProjectConfig::default();
        for name in names {
            config.bridge.insert(
                (*name).to_string(),
                BridgeConfig {
                    target: "jsonl".into(),
                    owner: None,
                    project: None,
                    token_env: None,
                    path: Some(PathBuf::from(format!("{name}.jsonl"))),
                    api_url: None,
                },
            );
        }
        config
    }

    fn run_args(name: Option<&str>, all: bool) -> BridgeRunArgs {
        BridgeRunArgs {
            name: name.map(str::to_string),
            all,
            since: None,
        }
    }

    #[test]
    fn single_bridge_is_implicit() {
        let config = config_with(&["dump"]);
        assert_eq!(select_bridges(&config, &run_args(None, false)).expect("select"), vec!["dump"]);
    }

    #[test]
    fn several_bridges_need_a_name() {
        let config = config_with(&["a", "b"]);
        assert!(select_bridges(&config, &run_args(None, false)).is_err());
        assert_eq!(select_bridges(&config, &run_args(Some("b"), false)).expect("select"), vec!["b"]);
        assert_eq!(select_bridges(&config, &run_args(None, true)).expect("select"), vec!["a", "b"]);
    }

    #[test]
    fn unknown_bridge_lists_known_ones() {
        let config = config_with(&["a", "b"]);
        let err = select_bridges(&config, &run_args(Some("c"), false)).expect_err("unknown");
        assert!(err.to_string().contains("configured: a, b"));
    }

    #[test]
    fn no_bridges_is_an_error() {
        assert!(select_bridges(&ProjectConfig::default(), &run_args(None, true)).is_err());
    }

    #[test]
    fn remote_description() {
        let mut cfg = config_with(&["x"]).bridge.remove("x").expect("bridge");
        assert_eq!(describe_remote(&cfg), "x.jsonl");
        cfg.owner = Some("octo".into());
        cfg.project = Some("hello".into());
        assert_eq!(describe_remote(&cfg), "octo/hello");
    }
}

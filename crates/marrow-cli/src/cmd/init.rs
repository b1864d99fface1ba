use std::path::Path;

use anyhow::{Context as _, Result, bail};
use clap::Args;
use marrow_core::FileStore;
use marrow_core::config::{self, ProjectConfig};
use marrow_core::store::MARROW_DIR;
use serde::Serialize;

use crate::output::{OutputMode, render};

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Re-run initialization over an existing `.marrow/`. Logs and config are kept.
    #[arg(long)]
    pub force: bool,
}

const GITIGNORE: &str = "bridges/\nentities/*.lock\nidentities.jsonl.lock\n";

#[derive(Debug, Serialize)]
struct InitOutput {
    ok: bool,
    path: String,
}

/// Execute `mw init`. Creates the repository skeleton:
///
/// ```text
/// .marrow/
///   entities/
///   identities.jsonl
///   config.toml    (written only if missing)
///   .gitignore     (bridge watermarks and lock files)
/// ```
pub fn run_init(args: &InitArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let dir = project_root.join(MARROW_DIR);
    if dir.exists() && !args.force {
        bail!("{MARROW_DIR}/ already exists. Use `mw init --force` to reinitialize.");
    }

    FileStore::init(&dir)
        .with_context(|| format!("Failed to initialize {}", dir.display()))?;

    if !dir.join("config.toml").exists() {
        config::save_project_config(project_root, &ProjectConfig::default())?;
    }

    let gitignore = dir.join(".gitignore");
    std::fs::write(&gitignore, GITIGNORE)
        .with_context(|| format!("Failed to write {}", gitignore.display()))?;

    let out = InitOutput {
        ok: true,
        path: dir.display().to_string(),
    };
    render(output, &out, |o, w| {
        writeln!(w, "✓ Initialized {}", o.path)?;
        writeln!(w)?;
        writeln!(w, "Next steps:")?;
        writeln!(w, "  Create your identity (required for writes):")?;
        writeln!(w, "    mw user create <login>")?;
        writeln!(w, "  File your first entity:")?;
        writeln!(w, "    mw create -t \"Something is broken\"")
    })
}

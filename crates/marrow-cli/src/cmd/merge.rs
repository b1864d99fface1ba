use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result, bail};
use clap::Args;
use marrow_core::FileStore;
use marrow_core::store::MARROW_DIR;
use serde::Serialize;

use crate::output::{OutputMode, render};
use crate::project::Project;

#[derive(Args, Debug)]
pub struct MergeArgs {
    /// Another clone: its project directory or its `.marrow/` directory.
    pub other: PathBuf,
}

#[derive(Debug, Serialize)]
struct MergeOutput {
    from: String,
    identities_added: usize,
    entities_added: usize,
    entities_updated: usize,
    operations_added: usize,
}

/// Accept either a project root or the `.marrow` directory itself.
fn other_store_dir(path: &Path) -> PathBuf {
    let nested = path.join(MARROW_DIR);
    if nested.is_dir() { nested } else { path.to_path_buf() }
}

pub fn run_merge(args: &MergeArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let project = Project::open(project_root)?;
    let dir = other_store_dir(&args.other);
    let ours = project.root.join(MARROW_DIR);
    if dir.canonicalize().ok() == ours.canonicalize().ok() {
        bail!("refusing to merge a repository into itself");
    }
    let other = FileStore::open(&dir)
        .with_context(|| format!("{} is not a marrow repository", args.other.display()))?;

    let report = project
        .repo
        .merge_store(&other)
        .with_context(|| format!("failed to merge {}", dir.display()))?;

    let out = MergeOutput {
        from: dir.display().to_string(),
        identities_added: report.identities_added,
        entities_added: report.entities_added,
        entities_updated: report.entities_updated,
        operations_added: report.operations_added,
    };
    render(output, &out, |o, w| {
        if o.operations_added == 0 && o.identities_added == 0 {
            return writeln!(w, "Already up to date with {}", o.from);
        }
        writeln!(
            w,
            "✓ Merged {}: {} new entities, {} updated, {} operations, {} identities",
            o.from, o.entities_added, o.entities_updated, o.operations_added, o.identities_added
        )
    })
}

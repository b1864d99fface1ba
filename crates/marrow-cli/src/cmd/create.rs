use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context as _, Result, bail};
use clap::Args;
use serde::Serialize;

use crate::output::{OutputMode, render};
use crate::project::{Project, now_unix};

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Entity title.
    #[arg(long, short = 't')]
    pub title: String,

    /// Description (the opening comment).
    #[arg(long, short = 'm', default_value = "")]
    pub message: String,

    /// Labels to attach right away (repeatable).
    #[arg(long = "label", short = 'l')]
    pub labels: Vec<String>,
}

#[derive(Debug, Serialize)]
struct CreateOutput {
    id: String,
    human_id: String,
    title: String,
    labels: Vec<String>,
    author: String,
}

pub fn run_create(args: &CreateArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    if args.title.trim().is_empty() {
        bail!("title must not be empty");
    }
    let project = Project::open(project_root)?;
    let me = project.user()?;
    let now = now_unix();

    let mut guard = project
        .repo
        .new_entity_raw(me.id(), now, args.title.trim(), &args.message, BTreeMap::new())
        .context("failed to create entity")?;
    let labels: Vec<String> = normalize_labels(&args.labels);
    let written = if labels.is_empty() {
        guard.flush_if_dirty()
    } else {
        guard
            .change_labels_raw(me.id(), now, labels.clone(), Vec::new(), BTreeMap::new())
            .and_then(|_| guard.flush_if_dirty())
    };
    if let Err(e) = written {
        guard.rollback();
        return Err(e).context("failed to write entity");
    }

    let id = guard.id().clone();
    drop(guard);
    let out = CreateOutput {
        human_id: id.human().to_string(),
        id: id.to_string(),
        title: args.title.trim().to_string(),
        labels,
        author: me.login().to_string(),
    };
    render(output, &out, |o, w| writeln!(w, "✓ Created {}: {}", o.human_id, o.title))
}

/// Trim, drop empties and dedup, keeping first-seen order.
pub fn normalize_labels(raw: &[String]) -> Vec<String> {
    let mut labels: Vec<String> = Vec::new();
    for label in raw.iter().map(|l| l.trim()).filter(|l| !l.is_empty()) {
        if !labels.iter().any(|l| l == label) {
            labels.push(label.to_string());
        }
    }
    labels
}

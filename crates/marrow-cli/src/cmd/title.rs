use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context as _, Result, bail};
use clap::Args;
use marrow_core::model::{OpPayload, SetTitleData};
use serde::Serialize;

use crate::output::{OutputMode, render};
use crate::project::{Project, now_unix};

#[derive(Args, Debug)]
pub struct TitleArgs {
    /// Entity id (supports partial ids).
    pub id: String,

    /// New title.
    pub title: String,
}

#[derive(Debug, Serialize)]
struct TitleOutput {
    entity: String,
    title: String,
    was: String,
    changed: bool,
}

pub fn run_title(args: &TitleArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let title = args.title.trim();
    if title.is_empty() {
        bail!("title must not be empty");
    }
    let project = Project::open(project_root)?;
    let me = project.user()?;
    let id = project.resolve_entity(&args.id)?;
    let was = project.repo.snapshot(&id)?.title;

    let changed = was != title;
    if changed {
        project
            .repo
            .append(
                &id,
                me.id(),
                now_unix(),
                OpPayload::SetTitle(SetTitleData {
                    title: title.to_string(),
                    was: was.clone(),
                }),
                BTreeMap::new(),
            )
            .with_context(|| format!("failed to retitle {}", id.human()))?;
    }

    let out = TitleOutput {
        entity: id.to_string(),
        title: title.to_string(),
        was,
        changed,
    };
    render(output, &out, |o, w| {
        if o.changed {
            writeln!(w, "✓ {}: {} (was: {})", &o.entity[..7], o.title, o.was)
        } else {
            writeln!(w, "{}: title unchanged", &o.entity[..7])
        }
    })
}

//! `mw open` and `mw close`.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context as _, Result};
use clap::Args;
use marrow_core::model::{OpPayload, SetStatusData, Status};
use serde::Serialize;

use crate::output::{OutputMode, render};
use crate::project::{Project, now_unix};

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Entity id (supports partial ids).
    pub id: String,
}

#[derive(Debug, Serialize)]
struct StatusOutput {
    entity: String,
    status: Status,
    changed: bool,
}

pub fn run_open(args: &StatusArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    set_status(args, Status::Open, output, project_root)
}

pub fn run_close(args: &StatusArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    set_status(args, Status::Closed, output, project_root)
}

fn set_status(
    args: &StatusArgs,
    status: Status,
    output: OutputMode,
    project_root: &Path,
) -> Result<()> {
    let project = Project::open(project_root)?;
    let me = project.user()?;
    let id = project.resolve_entity(&args.id)?;

    let changed = project.repo.snapshot(&id)?.status != status;
    if changed {
        project
            .repo
            .append(
                &id,
                me.id(),
                now_unix(),
                OpPayload::SetStatus(SetStatusData { status }),
                BTreeMap::new(),
            )
            .with_context(|| format!("failed to set {} {status}", id.human()))?;
    }

    let out = StatusOutput {
        entity: id.to_string(),
        status,
        changed,
    };
    render(output, &out, |o, w| {
        if o.changed {
            writeln!(w, "✓ {} is now {}", &o.entity[..7], o.status)
        } else {
            writeln!(w, "{} is already {}", &o.entity[..7], o.status)
        }
    })
}

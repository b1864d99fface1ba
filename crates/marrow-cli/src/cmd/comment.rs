//! `mw comment` and `mw comment-edit`.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context as _, Result, bail};
use clap::Args;
use marrow_core::model::{AddCommentData, EditCommentData, OpPayload};
use serde::Serialize;

use crate::output::{OutputMode, render};
use crate::project::{Project, now_unix, resolve_comment};

const MAX_COMMENT_BODY_CHARS: usize = 65_536;

#[derive(Args, Debug)]
pub struct CommentArgs {
    /// Entity id (supports partial ids).
    pub id: String,

    /// Comment body.
    pub body: String,
}

#[derive(Args, Debug)]
pub struct CommentEditArgs {
    /// Entity id (supports partial ids).
    pub id: String,

    /// Comment id from `mw show`. The entity id edits the description.
    pub comment: String,

    /// Replacement text.
    pub body: String,
}

#[derive(Debug, Serialize)]
struct CommentOutput {
    ok: bool,
    entity: String,
    comment: String,
    op: String,
    author: String,
    ts: i64,
}

fn validate_body(body: &str) -> Result<()> {
    if body.trim().is_empty() {
        bail!("comment body must not be empty");
    }
    let len = body.chars().count();
    if len > MAX_COMMENT_BODY_CHARS {
        bail!("comment body must be <= {MAX_COMMENT_BODY_CHARS} characters (got {len})");
    }
    Ok(())
}

pub fn run_comment(args: &CommentArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    validate_body(&args.body)?;
    let project = Project::open(project_root)?;
    let me = project.user()?;
    let id = project.resolve_entity(&args.id)?;
    let ts = now_unix();

    let op = project
        .repo
        .append(
            &id,
            me.id(),
            ts,
            OpPayload::AddComment(AddCommentData {
                message: args.body.clone(),
            }),
            BTreeMap::new(),
        )
        .with_context(|| format!("failed to comment on {}", id.human()))?;

    let out = CommentOutput {
        ok: true,
        entity: id.to_string(),
        comment: op.hash().to_string(),
        op: op.hash().to_string(),
        author: me.login().to_string(),
        ts,
    };
    render(output, &out, |o, w| {
        writeln!(w, "✓ Commented on {} ({})", &o.entity[..7], &o.comment[..7])
    })
}

pub fn run_comment_edit(
    args: &CommentEditArgs,
    output: OutputMode,
    project_root: &Path,
) -> Result<()> {
    validate_body(&args.body)?;
    let project = Project::open(project_root)?;
    let me = project.user()?;
    let id = project.resolve_entity(&args.id)?;
    let snapshot = project.repo.snapshot(&id)?;
    let target = resolve_comment(&snapshot, &args.comment)?.id.clone();
    let ts = now_unix();

    let op = project
        .repo
        .append(
            &id,
            me.id(),
            ts,
            OpPayload::EditComment(EditCommentData {
                target: target.clone(),
                message: args.body.clone(),
            }),
            BTreeMap::new(),
        )
        .with_context(|| format!("failed to edit comment {}", target.human()))?;

    let out = CommentOutput {
        ok: true,
        entity: id.to_string(),
        comment: target.to_string(),
        op: op.hash().to_string(),
        author: me.login().to_string(),
        ts,
    };
    render(output, &out, |o, w| {
        writeln!(w, "✓ Edited comment {} on {}", &o.comment[..7], &o.entity[..7])
    })
}

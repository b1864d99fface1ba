use std::path::Path;

use anyhow::Result;
use clap::Args;
use marrow_core::EntityExcerpt;
use marrow_core::model::Status;
use serde::Serialize;

use crate::output::{OutputMode, format_unix, render_mode};
use crate::project::Project;

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Only entities with this status (`open` or `closed`).
    #[arg(long, short = 's')]
    pub status: Option<Status>,

    /// Only entities carrying this label (repeatable; all must match).
    #[arg(long = "label", short = 'l')]
    pub labels: Vec<String>,

    /// Only entities created by this login.
    #[arg(long)]
    pub author: Option<String>,

    /// Maximum number of rows.
    #[arg(long, short = 'n')]
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct ListRow {
    id: String,
    human_id: String,
    status: Status,
    title: String,
    labels: Vec<String>,
    author: String,
    comments: usize,
    edited_at: i64,
}

fn keep(excerpt: &EntityExcerpt, args: &ListArgs) -> bool {
    args.status.is_none_or(|s| excerpt.status == s)
        && args.labels.iter().all(|l| excerpt.labels.contains(l))
}

pub fn run_list(args: &ListArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let project = Project::open(project_root)?;

    let mut excerpts: Vec<EntityExcerpt> = project
        .repo
        .all_excerpts()
        .into_iter()
        .filter(|e| keep(e, args))
        .collect();
    // Most recently touched first; id breaks ties so output is stable.
    excerpts.sort_by(|a, b| b.edited_at.cmp(&a.edited_at).then_with(|| a.id.cmp(&b.id)));

    let mut rows: Vec<ListRow> = excerpts
        .iter()
        .map(|e| ListRow {
            id: e.id.to_string(),
            human_id: e.id.human().to_string(),
            status: e.status,
            title: e.title.clone(),
            labels: e.labels.clone(),
            author: project.login_of(&e.author),
            comments: e.comment_count.saturating_sub(1),
            edited_at: e.edited_at,
        })
        .filter(|r| args.author.as_deref().is_none_or(|a| r.author == a))
        .collect();
    if let Some(limit) = args.limit {
        rows.truncate(limit);
    }

    render_mode(
        output,
        &rows,
        |rows, w| {
            for r in rows {
                writeln!(w, "{}  {}  {}  {}", r.human_id, r.status, r.title, r.labels.join(","))?;
            }
            Ok(())
        },
        |rows, w| {
            if rows.is_empty() {
                return writeln!(w, "No matching entities.");
            }
            for r in rows {
                writeln!(w, "{} [{:<6}] {}", r.human_id, r.status.as_str(), r.title)?;
                let labels = if r.labels.is_empty() {
                    String::new()
                } else {
                    format!("  labels: {}", r.labels.join(", "))
                };
                writeln!(
                    w,
                    "        by {}, {} comments, updated {}{labels}",
                    r.author,
                    r.comments,
                    format_unix(r.edited_at)
                )?;
            }
            Ok(())
        },
    )
}

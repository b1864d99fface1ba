use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::Path;

use anyhow::Result;
use clap::Args;
use marrow_bridge::source::ORIGIN_KEY;
use marrow_core::model::{IdentityId, Status, TimelineItem};
use serde::Serialize;

use crate::output::{OutputMode, format_unix, pretty_kv, pretty_rule, pretty_section, render_mode};
use crate::project::Project;

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Entity id (supports partial ids).
    pub id: String,
}

#[derive(Debug, Serialize)]
struct ShowOutput {
    id: String,
    title: String,
    status: Status,
    labels: Vec<String>,
    author: String,
    created_at: i64,
    edited_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    origin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    origin_url: Option<String>,
    participants: Vec<String>,
    timeline: Vec<TimelineItem>,
    /// Identity id to login, for every author in the timeline.
    logins: BTreeMap<String, String>,
}

impl ShowOutput {
    fn login(&self, id: &IdentityId) -> String {
        let id = id.to_string();
        self.logins.get(&id).cloned().unwrap_or(id)
    }
}

pub fn run_show(args: &ShowArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let project = Project::open(project_root)?;
    let id = project.resolve_entity(&args.id)?;
    let snap = project.repo.snapshot(&id)?;

    let logins: BTreeMap<String, String> = snap
        .actors
        .iter()
        .map(|a| (a.to_string(), project.login_of(a)))
        .collect();
    let origin = snap.create_metadata(ORIGIN_KEY).map(str::to_string);
    let origin_url = origin
        .as_deref()
        .and_then(|o| snap.create_metadata(&format!("{o}-url")))
        .map(str::to_string);

    let out = ShowOutput {
        id: id.to_string(),
        title: snap.title.clone(),
        status: snap.status,
        labels: snap.labels.clone(),
        author: project.login_of(&snap.author),
        created_at: snap.created_at,
        edited_at: snap.edited_at,
        origin,
        origin_url,
        participants: snap.participants.iter().map(|p| project.login_of(p)).collect(),
        timeline: snap.timeline.clone(),
        logins,
    };
    render_mode(output, &out, render_text, render_pretty)
}

fn render_text(o: &ShowOutput, w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "{}  {}  {}", &o.id[..7], o.status, o.title)?;
    if !o.labels.is_empty() {
        writeln!(w, "labels  {}", o.labels.join(","))?;
    }
    for item in &o.timeline {
        match item {
            TimelineItem::Create(c) | TimelineItem::AddComment(c) => {
                let edited = if c.is_edited() { " (edited)" } else { "" };
                writeln!(
                    w,
                    "comment  {}  {}  {}{edited}",
                    c.hash.human(),
                    o.login(&c.author),
                    c.message.replace('\n', "\\n")
                )?;
            }
            other => writeln!(w, "event  {}  {}", other.hash().human(), describe(o, other))?,
        }
    }
    Ok(())
}

fn render_pretty(o: &ShowOutput, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, &format!("{}  {}", &o.id[..7], o.title))?;
    pretty_kv(w, "status", o.status.as_str())?;
    pretty_kv(w, "author", &o.author)?;
    pretty_kv(w, "created", format_unix(o.created_at))?;
    pretty_kv(w, "updated", format_unix(o.edited_at))?;
    if !o.labels.is_empty() {
        pretty_kv(w, "labels", o.labels.join(", "))?;
    }
    if let Some(origin) = &o.origin {
        let value = o
            .origin_url
            .as_ref()
            .map_or_else(|| origin.clone(), |url| format!("{origin} ({url})"));
        pretty_kv(w, "origin", value)?;
    }
    pretty_kv(w, "people", o.participants.join(", "))?;

    for item in &o.timeline {
        writeln!(w)?;
        match item {
            TimelineItem::Create(c) | TimelineItem::AddComment(c) => {
                let edited = if c.is_edited() { ", edited" } else { "" };
                writeln!(
                    w,
                    "{} commented at {} [{}{edited}]",
                    o.login(&c.author),
                    format_unix(c.created_at),
                    c.hash.human()
                )?;
                pretty_rule(w)?;
                if c.message.is_empty() {
                    writeln!(w, "  (no description)")?;
                }
                for line in c.message.lines() {
                    writeln!(w, "  {line}")?;
                }
            }
            other => writeln!(w, "* {}", describe(o, other))?,
        }
    }
    Ok(())
}

fn describe(o: &ShowOutput, item: &TimelineItem) -> String {
    match item {
        TimelineItem::Create(c) | TimelineItem::AddComment(c) => {
            format!("{} commented", o.login(&c.author))
        }
        TimelineItem::SetTitle {
            author,
            unix_time,
            title,
            was,
            ..
        } => format!(
            "{} renamed \"{was}\" to \"{title}\" at {}",
            o.login(author),
            format_unix(*unix_time)
        ),
        TimelineItem::SetStatus {
            author,
            unix_time,
            status,
            ..
        } => {
            let verb = match status {
                Status::Open => "reopened",
                Status::Closed => "closed",
            };
            format!("{} {verb} at {}", o.login(author), format_unix(*unix_time))
        }
        TimelineItem::LabelChange {
            author,
            unix_time,
            added,
            removed,
            ..
        } => {
            let mut parts = Vec::new();
            if !added.is_empty() {
                parts.push(format!("added {}", added.join(", ")));
            }
            if !removed.is_empty() {
                parts.push(format!("removed {}", removed.join(", ")));
            }
            format!(
                "{} {} at {}",
                o.login(author),
                parts.join(" and "),
                format_unix(*unix_time)
            )
        }
    }
}

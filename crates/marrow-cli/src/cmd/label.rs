use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context as _, Result, bail};
use clap::Args;
use marrow_core::model::{LabelChangeData, OpPayload};
use serde::Serialize;

use crate::cmd::create::normalize_labels;
use crate::output::{OutputMode, render};
use crate::project::{Project, now_unix};

#[derive(Args, Debug)]
pub struct LabelArgs {
    /// Entity id (supports partial ids).
    pub id: String,

    /// Labels to add (repeatable).
    #[arg(long = "add", short = 'a')]
    pub add: Vec<String>,

    /// Labels to remove (repeatable).
    #[arg(long = "rm", short = 'r')]
    pub remove: Vec<String>,
}

#[derive(Debug, Serialize)]
struct LabelOutput {
    entity: String,
    added: Vec<String>,
    removed: Vec<String>,
    labels: Vec<String>,
}

/// Split requested changes into the ones that actually change `current`.
fn effective_change(
    current: &[String],
    add: &[String],
    remove: &[String],
) -> (Vec<String>, Vec<String>) {
    let added = normalize_labels(add)
        .into_iter()
        .filter(|l| !current.contains(l))
        .collect();
    let removed = normalize_labels(remove)
        .into_iter()
        .filter(|l| current.contains(l) && !add.iter().any(|a| a.trim() == l))
        .collect();
    (added, removed)
}

pub fn run_label(args: &LabelArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    if args.add.is_empty() && args.remove.is_empty() {
        bail!("nothing to do: pass --add and/or --rm");
    }
    let project = Project::open(project_root)?;
    let me = project.user()?;
    let id = project.resolve_entity(&args.id)?;

    let current = project.repo.snapshot(&id)?.labels;
    let (added, removed) = effective_change(&current, &args.add, &args.remove);
    if !added.is_empty() || !removed.is_empty() {
        project
            .repo
            .append(
                &id,
                me.id(),
                now_unix(),
                OpPayload::LabelChange(LabelChangeData {
                    added: added.clone(),
                    removed: removed.clone(),
                }),
                BTreeMap::new(),
            )
            .with_context(|| format!("failed to change labels of {}", id.human()))?;
    }

    let out = LabelOutput {
        labels: project.repo.snapshot(&id)?.labels,
        entity: id.to_string(),
        added,
        removed,
    };
    render(output, &out, |o, w| {
        if o.added.is_empty() && o.removed.is_empty() {
            writeln!(w, "{}: labels unchanged", &o.entity[..7])
        } else {
            writeln!(w, "✓ {} labels: [{}]", &o.entity[..7], o.labels.join(", "))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &[&str]) -> Vec<String> {
        v.iter().map(|x| (*x).to_string()).collect()
    }

    #[test]
    fn only_real_changes_are_kept() {
        let current = s(&["bug", "ui"]);
        let (added, removed) = effective_change(&current, &s(&["bug", "p1"]), &s(&["ui", "nope"]));
        assert_eq!(added, s(&["p1"]));
        assert_eq!(removed, s(&["ui"]));
    }

    #[test]
    fn add_wins_over_remove_of_the_same_label() {
        let current = s(&["bug"]);
        let (added, removed) = effective_change(&current, &s(&["bug"]), &s(&["bug"]));
        assert!(added.is_empty());
        assert!(removed.is_empty());
    }
}

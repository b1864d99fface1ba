//! `mw user`: local identities.

use std::path::Path;

use anyhow::Result;
use clap::{Args, Subcommand};
use marrow_core::config;
use marrow_core::identity::IdentityProfile;
use marrow_core::{Identity, IdentityError};
use serde::Serialize;

use crate::output::{OutputMode, pretty_kv, render, render_mode};
use crate::project::Project;

#[derive(Args, Debug)]
pub struct UserArgs {
    #[command(subcommand)]
    pub command: UserCommand,
}

#[derive(Subcommand, Debug)]
pub enum UserCommand {
    #[command(
        about = "Create an identity",
        after_help = "EXAMPLES:\n    # Create and adopt an identity\n    mw user create alice --name \"Alice Liddell\" --email alice@example.com"
    )]
    Create(UserCreateArgs),

    #[command(about = "List identities")]
    Ls,

    #[command(about = "Use an existing identity for local writes")]
    Adopt(UserAdoptArgs),
}

#[derive(Args, Debug)]
pub struct UserCreateArgs {
    pub login: String,

    #[arg(long)]
    pub name: Option<String>,

    #[arg(long)]
    pub email: Option<String>,

    /// Keep the currently configured identity instead of switching to the new one.
    #[arg(long)]
    pub no_adopt: bool,
}

#[derive(Args, Debug)]
pub struct UserAdoptArgs {
    /// Identity id (supports partial ids).
    pub id: String,
}

#[derive(Debug, Serialize)]
struct UserRow {
    id: String,
    login: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    current: bool,
}

impl UserRow {
    fn new(identity: &Identity, current: Option<&str>) -> Self {
        Self {
            id: identity.id().to_string(),
            login: identity.login().to_string(),
            name: identity.name().map(str::to_string),
            email: identity.email().map(str::to_string),
            current: current.is_some_and(|c| identity.id().has_prefix(c)),
        }
    }
}

pub fn run_user(args: &UserArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    match &args.command {
        UserCommand::Create(create) => run_user_create(create, output, project_root),
        UserCommand::Ls => run_user_ls(output, project_root),
        UserCommand::Adopt(adopt) => run_user_adopt(adopt, output, project_root),
    }
}

fn run_user_create(args: &UserCreateArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let mut project = Project::open(project_root)?;
    let profile = IdentityProfile {
        name: args.name.clone(),
        email: args.email.clone(),
        ..IdentityProfile::with_login(args.login.trim())
    };
    let identity = project.repo.identities().new_identity_raw(profile)?;

    let adopt = !args.no_adopt || project.config.user.identity.is_none();
    if adopt {
        project.config.user.identity = Some(identity.id().to_string());
        config::save_project_config(&project.root, &project.config)?;
    }
    tracing::info!(id = %identity.id().human(), login = identity.login(), adopt, "created identity");

    let row = UserRow::new(&identity, project.config.user.identity.as_deref());
    render(output, &row, |r, w| {
        writeln!(w, "✓ Created identity {} ({})", &r.id[..7], r.login)?;
        if r.current {
            writeln!(w, "  Local writes are now attributed to {}.", r.login)?;
        }
        Ok(())
    })
}

fn run_user_ls(output: OutputMode, project_root: &Path) -> Result<()> {
    let project = Project::open(project_root)?;
    let current = project.config.user.identity.as_deref();
    let rows: Vec<UserRow> = project
        .repo
        .identities()
        .all()
        .iter()
        .map(|i| UserRow::new(i, current))
        .collect();

    render_mode(
        output,
        &rows,
        |rows, w| {
            for r in rows {
                writeln!(w, "{}  {}{}", &r.id[..7], r.login, if r.current { "  *" } else { "" })?;
            }
            Ok(())
        },
        |rows, w| {
            if rows.is_empty() {
                return writeln!(w, "No identities. Create one with `mw user create <login>`.");
            }
            for r in rows {
                let marker = if r.current { "* " } else { "  " };
                writeln!(w, "{marker}{}  {}", &r.id[..7], r.login)?;
                if let Some(name) = &r.name {
                    pretty_kv(w, "    name", name)?;
                }
                if let Some(email) = &r.email {
                    pretty_kv(w, "    email", email)?;
                }
            }
            Ok(())
        },
    )
}

fn run_user_adopt(args: &UserAdoptArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let mut project = Project::open(project_root)?;
    let identity = match project.repo.identities().resolve_prefix(args.id.trim()) {
        Ok(identity) => identity,
        Err(IdentityError::NotFound(_)) => {
            // Accept a login as well as an id prefix.
            let all = project.repo.identities().all();
            let mut by_login = all.iter().filter(|i| i.login() == args.id.trim());
            match (by_login.next(), by_login.next()) {
                (Some(one), None) => one.clone(),
                (Some(_), Some(_)) => {
                    anyhow::bail!("several identities use login '{}'; pass an id", args.id)
                }
                _ => return Err(IdentityError::NotFound(args.id.clone()).into()),
            }
        }
        Err(e) => return Err(e.into()),
    };

    project.config.user.identity = Some(identity.id().to_string());
    config::save_project_config(&project.root, &project.config)?;

    let row = UserRow::new(&identity, project.config.user.identity.as_deref());
    render(output, &row, |r, w| {
        writeln!(w, "✓ Local writes are now attributed to {} ({})", r.login, &r.id[..7])
    })
}

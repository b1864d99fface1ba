#![forbid(unsafe_code)]

mod cmd;
mod output;
mod project;

use std::env;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use marrow_core::config;
use output::{CliError, OutputMode, render_error};
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "marrow: offline-first issue tracker with bridges to external trackers",
    long_about = None
)]
struct Cli {
    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    /// Resolve the output mode from `--json`, `MARROW_FORMAT`, user config and
    /// the terminal.
    fn output_mode(&self) -> OutputMode {
        let user_output = config::load_user_config().ok().and_then(|c| c.output);
        let env_format = env::var("MARROW_FORMAT").ok();
        OutputMode::from_name(&config::resolve_output(
            self.json,
            user_output.as_deref(),
            env_format.as_deref(),
        ))
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "Setup",
        about = "Initialize a marrow repository",
        long_about = "Initialize a marrow repository (.marrow/) in the current directory.",
        after_help = "EXAMPLES:\n    # Initialize in the current directory\n    mw init\n\n    # Emit machine-readable output\n    mw init --json"
    )]
    Init(cmd::init::InitArgs),

    #[command(
        next_help_heading = "Setup",
        about = "Manage identities",
        after_help = "EXAMPLES:\n    # Create your identity\n    mw user create alice\n\n    # List identities (* marks yours)\n    mw user ls"
    )]
    User(cmd::user::UserArgs),

    #[command(
        next_help_heading = "Entities",
        about = "Create an entity",
        after_help = "EXAMPLES:\n    # Create with a description and a label\n    mw create -t \"Crash on start\" -m \"Segfault in the loader\" -l bug\n\n    # Emit machine-readable output\n    mw create -t \"Crash on start\" --json"
    )]
    Create(cmd::create::CreateArgs),

    #[command(
        next_help_heading = "Entities",
        about = "Add a comment",
        after_help = "EXAMPLES:\n    # Comment using a short id\n    mw comment 3f2a9c1 \"Reproduced on main\""
    )]
    Comment(cmd::comment::CommentArgs),

    #[command(
        next_help_heading = "Entities",
        about = "Replace the text of a comment",
        after_help = "EXAMPLES:\n    # Edit a comment (ids as printed by `mw show`)\n    mw comment-edit 3f2a9c1 8be01d4 \"Reproduced on main and 0.3\"\n\n    # Edit the description\n    mw comment-edit 3f2a9c1 3f2a9c1 \"New description\""
    )]
    CommentEdit(cmd::comment::CommentEditArgs),

    #[command(next_help_heading = "Entities", about = "Change the title")]
    Title(cmd::title::TitleArgs),

    #[command(next_help_heading = "Entities", about = "Reopen an entity")]
    Open(cmd::status::StatusArgs),

    #[command(next_help_heading = "Entities", about = "Close an entity")]
    Close(cmd::status::StatusArgs),

    #[command(
        next_help_heading = "Entities",
        about = "Add or remove labels",
        after_help = "EXAMPLES:\n    # Add two labels and drop one\n    mw label 3f2a9c1 --add bug --add p1 --rm triage"
    )]
    Label(cmd::label::LabelArgs),

    #[command(
        next_help_heading = "Read",
        about = "Show an entity and its timeline",
        after_help = "EXAMPLES:\n    # Show an entity\n    mw show 3f2a9c1\n\n    # Emit machine-readable output\n    mw show 3f2a9c1 --json"
    )]
    Show(cmd::show::ShowArgs),

    #[command(
        next_help_heading = "Read",
        about = "List entities",
        after_help = "EXAMPLES:\n    # Open entities labelled bug\n    mw list --status open --label bug\n\n    # Emit machine-readable output\n    mw list --json"
    )]
    List(cmd::list::ListArgs),

    #[command(
        next_help_heading = "Sync",
        about = "Import from and export to external trackers",
        after_help = "EXAMPLES:\n    # Configure and pull a GitHub repository\n    mw bridge add upstream --target github --owner octo --project hello\n    mw bridge pull upstream\n\n    # Push local changes everywhere\n    mw bridge push --all"
    )]
    Bridge(cmd::bridge::BridgeArgs),

    #[command(
        next_help_heading = "Sync",
        about = "Merge another clone into this one",
        after_help = "EXAMPLES:\n    # Union the logs of a sibling checkout\n    mw merge ../other-checkout"
    )]
    Merge(cmd::merge::MergeArgs),
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("MARROW_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "marrow=debug,mw=debug,info"
        } else {
            "marrow=info,mw=info,warn"
        })
    });

    let format = env::var("MARROW_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    // Logs go to stderr so they never mix with command output.
    let registry = tracing_subscriber::registry().with(filter);
    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn main() -> anyhow::Result<ExitCode> {
    init_tracing();

    let cli = Cli::parse();
    let project_root = env::current_dir()?;
    let output = cli.output_mode();
    debug!(command = ?cli.command, ?output, "dispatching");

    let command_result = match &cli.command {
        Commands::Init(args) => cmd::init::run_init(args, output, &project_root),
        Commands::User(args) => cmd::user::run_user(args, output, &project_root),
        Commands::Create(args) => cmd::create::run_create(args, output, &project_root),
        Commands::Comment(args) => cmd::comment::run_comment(args, output, &project_root),
        Commands::CommentEdit(args) => {
            cmd::comment::run_comment_edit(args, output, &project_root)
        }
        Commands::Title(args) => cmd::title::run_title(args, output, &project_root),
        Commands::Open(args) => cmd::status::run_open(args, output, &project_root),
        Commands::Close(args) => cmd::status::run_close(args, output, &project_root),
        Commands::Label(args) => cmd::label::run_label(args, output, &project_root),
        Commands::Show(args) => cmd::show::run_show(args, output, &project_root),
        Commands::List(args) => cmd::list::run_list(args, output, &project_root),
        Commands::Bridge(args) => cmd::bridge::run_bridge(args, output, &project_root),
        Commands::Merge(args) => cmd::merge::run_merge(args, output, &project_root),
    };

    match command_result {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(err) => {
            render_error(output, &CliError::from_error(&err))?;
            Ok(ExitCode::FAILURE)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_flag_sets_output_mode() {
        let cli = Cli::parse_from(["mw", "--json", "list"]);
        assert!(cli.json);
        assert!(cli.output_mode().is_json());
    }

    #[test]
    fn json_flag_after_subcommand() {
        let cli = Cli::parse_from(["mw", "list", "--json"]);
        assert!(cli.json);
        assert!(cli.output_mode().is_json());
    }

    #[test]
    fn create_collects_repeated_labels() {
        let cli = Cli::parse_from(["mw", "create", "-t", "Crash", "-l", "bug", "--label", "p1"]);
        match cli.command {
            Commands::Create(args) => {
                assert_eq!(args.title, "Crash");
                assert_eq!(args.labels, vec!["bug", "p1"]);
                assert!(args.message.is_empty());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn list_parses_status_filter() {
        let cli = Cli::parse_from(["mw", "list", "--status", "closed"]);
        match cli.command {
            Commands::List(args) => {
                assert_eq!(args.status, Some(marrow_core::model::Status::Closed));
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert!(Cli::try_parse_from(["mw", "list", "--status", "doing"]).is_err());
    }

    #[test]
    fn bridge_pull_all_conflicts_with_name() {
        assert!(Cli::try_parse_from(["mw", "bridge", "pull", "--all"]).is_ok());
        assert!(Cli::try_parse_from(["mw", "bridge", "pull", "upstream"]).is_ok());
        assert!(Cli::try_parse_from(["mw", "bridge", "pull", "upstream", "--all"]).is_err());
    }

    #[test]
    fn bridge_since_parses_rfc3339() {
        let cli = Cli::parse_from(["mw", "bridge", "push", "--since", "2024-05-01T00:00:00Z"]);
        let Commands::Bridge(args) = cli.command else {
            panic!("expected bridge command");
        };
        let cmd::bridge::BridgeCommand::Push(run) = args.command else {
            panic!("expected push");
        };
        assert_eq!(
            run.since.map(|t| t.to_rfc3339()),
            Some("2024-05-01T00:00:00+00:00".to_string())
        );
    }

    #[test]
    fn comment_edit_takes_three_positionals() {
        let cli = Cli::parse_from(["mw", "comment-edit", "abc", "def", "new text"]);
        let Commands::CommentEdit(args) = cli.command else {
            panic!("expected comment-edit");
        };
        assert_eq!((args.id.as_str(), args.comment.as_str()), ("abc", "def"));
        assert_eq!(args.body, "new text");
    }
}

mod cmd;
mod output;
mod root;

use clap::{ArgGroup, Parser, Subcommand};
use cmd::run::{RunArgs, RunExit};
use cmd::Project;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "cascade",
    about = "Run planning sessions in dependency order and track which artifacts are stale",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .cascade/ or .git/)
    #[arg(long, global = true, env = "CASCADE_ROOT")]
    root: Option<PathBuf>,

    /// Artifact directory, overriding artifacts_dir in the config
    #[arg(long, global = true, env = "CASCADE_ARTIFACTS")]
    artifacts: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create .cascade/config.yaml and the artifact directory
    Init,

    /// Show the state of every session
    Status,

    /// Show the next session to run
    Next,

    /// List sessions with their inputs, outputs and dependencies
    Sessions,

    /// Run one session, or cascade through everything runnable
    #[command(group(ArgGroup::new("target").required(true).args(["session", "auto"])))]
    Run {
        /// Session id to run
        #[arg(long)]
        session: Option<String>,

        /// Start at the first runnable or stale session and cascade
        #[arg(long)]
        auto: bool,

        /// Re-run the session even if it is complete
        #[arg(long)]
        force: bool,

        /// Continue with downstream sessions after --session
        #[arg(long)]
        cascade: bool,

        /// Print the planned sequence without executing
        #[arg(long)]
        dry_run: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Run { dry_run: false, .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let project = Project {
        root: root::resolve_root(cli.root.as_deref()),
        artifacts_override: cli.artifacts,
    };

    let result = match cli.command {
        Commands::Init => cmd::init::run(&project),
        Commands::Status => cmd::status::run(&project, cli.json),
        Commands::Next => cmd::next::run(&project, cli.json),
        Commands::Sessions => cmd::sessions::run(&project, cli.json),
        Commands::Run {
            session,
            auto: _,
            force,
            cascade,
            dry_run,
        } => cmd::run::run(
            &project,
            RunArgs {
                session,
                force,
                cascade,
                dry_run,
            },
            cli.json,
        ),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        let code = e.downcast_ref::<RunExit>().map_or(1, RunExit::exit_code);
        std::process::exit(code);
    }
}

//! sonarsync: converge SonarQube to a declared manifest.
//!
//! # Usage
//!
//! ```text
//! sonarsync apply [--manifest sonarsync.yaml] [--dry-run] [--verify-filters] [--json]
//! sonarsync plan [--manifest sonarsync.yaml] [--json]
//! sonarsync destroy [--manifest sonarsync.yaml] [--json]
//! sonarsync check [--manifest sonarsync.yaml]
//! sonarsync show project|gate|portfolio <key>
//! ```
//!
//! Connection flags (`--host`, `--token`, `--max-retries`, `--no-retry`,
//! `--timeout-secs`, `--metrics`) are accepted by every subcommand; host and
//! token fall back to `SONARQUBE_HOST` / `SONARQUBE_TOKEN`.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    check::CheckArgs,
    connection::ConnectionArgs,
    run::{ApplyArgs, RunArgs},
    show::ShowCommand,
};
use sonarsync_reconcile::RunMode;

#[derive(Parser, Debug)]
#[command(
    name = "sonarsync",
    version,
    about = "Converge SonarQube projects, quality gates and portfolios to a declared manifest",
    long_about = None,
)]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    /// Log at debug level (overridden by RUST_LOG).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create, update and reconcile everything the manifest declares.
    Apply(ApplyArgs),

    /// Show what `apply` would change without writing anything.
    Plan(RunArgs),

    /// Delete everything the manifest declares.
    Destroy(RunArgs),

    /// Validate the manifest offline.
    Check(CheckArgs),

    /// Print the remote state of one resource as JSON.
    Show {
        #[command(subcommand)]
        command: ShowCommand,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    commands::connection::init_tracing(cli.verbose);

    match cli.command {
        Commands::Apply(args) => {
            let mode = if args.dry_run {
                RunMode::Plan
            } else {
                RunMode::Apply
            };
            commands::run::run(args.run, mode, &cli.connection)
        }
        Commands::Plan(args) => commands::run::run(args, RunMode::Plan, &cli.connection),
        Commands::Destroy(args) => commands::run::run(args, RunMode::Destroy, &cli.connection),
        Commands::Check(args) => args.run(),
        Commands::Show { command } => commands::show::run(command, &cli.connection),
    }
}

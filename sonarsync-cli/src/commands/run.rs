//! `sonarsync apply | plan | destroy`: run the manifest pipeline.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use sonarsync_core::manifest;
use sonarsync_reconcile::{
    Change, Observed, Pipeline, PipelineError, ReconcileError, ResourceOutcome, RunMode,
    RunReport, SelectionOptions,
};

use super::connection::{self, ConnectionArgs};

pub const DEFAULT_MANIFEST: &str = "sonarsync.yaml";

/// Arguments shared by `apply`, `plan` and `destroy`.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the desired-state manifest.
    #[arg(long, short, default_value = DEFAULT_MANIFEST)]
    pub manifest: PathBuf,

    /// Read portfolio filters back after configuring them and fail on drift.
    #[arg(long)]
    pub verify_filters: bool,

    /// Emit the run report as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `sonarsync apply`.
#[derive(Args, Debug)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub run: RunArgs,

    /// Report what would change without writing anything.
    #[arg(long)]
    pub dry_run: bool,
}

pub fn run(args: RunArgs, mode: RunMode, connection: &ConnectionArgs) -> Result<()> {
    let manifest = manifest::load_at(&args.manifest)
        .with_context(|| format!("failed to load {}", args.manifest.display()))?;
    let session = connection.connect()?;
    let pipeline = Pipeline::new(session.client.clone()).with_options(SelectionOptions {
        verify_filters: args.verify_filters,
    });

    let result = connection::block_on(|cancel| async move {
        Ok(pipeline.run(&cancel, &manifest, mode).await)
    })?;
    session.print_metrics();

    match result {
        Ok(report) => {
            if args.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&report).context("failed to serialize report")?
                );
            } else {
                print_report(&report);
            }
            Ok(())
        }
        Err(err) => {
            print_failure(&err, mode);
            Err(err).context(format!("{} failed", mode_label(mode)))
        }
    }
}

fn mode_label(mode: RunMode) -> &'static str {
    match mode {
        RunMode::Apply => "apply",
        RunMode::Plan => "plan",
        RunMode::Destroy => "destroy",
    }
}

#[derive(Tabled)]
struct OutcomeRow {
    #[tabled(rename = "resource")]
    kind: String,
    #[tabled(rename = "key")]
    key: String,
    #[tabled(rename = "change")]
    change: String,
    #[tabled(rename = "operations")]
    operations: usize,
}

fn change_label(change: Change, mode: RunMode) -> String {
    let label = match (change, mode) {
        (Change::Created, RunMode::Plan) => "WOULD CREATE".green(),
        (Change::Updated, RunMode::Plan) => "WOULD UPDATE".yellow(),
        (Change::Created, _) => "CREATED".green(),
        (Change::Updated, _) => "UPDATED".yellow(),
        (Change::Unchanged, _) => "UNCHANGED".bright_black(),
        (Change::Deleted, _) => "DELETED".red(),
        (Change::Absent, _) => "ABSENT".bright_black(),
    };
    label.bold().to_string()
}

fn print_outcomes(outcomes: &[ResourceOutcome], mode: RunMode) {
    if outcomes.is_empty() {
        return;
    }
    let rows: Vec<OutcomeRow> = outcomes
        .iter()
        .map(|o| OutcomeRow {
            kind: o.kind.to_string(),
            key: o.key.clone(),
            change: change_label(o.change, mode),
            operations: o.operations.len(),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    let marker = if mode == RunMode::Plan { "~" } else { "✎" };
    for outcome in outcomes {
        for operation in &outcome.operations {
            println!("  {marker}  {operation}");
        }
    }
}

fn print_report(report: &RunReport) {
    let prefix = if report.mode == RunMode::Plan {
        "[plan] "
    } else {
        ""
    };
    println!(
        "{prefix}sonarsync v{} | {} {} | {} resources | {} changed | {} ms",
        env!("CARGO_PKG_VERSION"),
        mode_label(report.mode),
        report.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
        report.outcomes.len(),
        report.changed(),
        report.duration_ms(),
    );
    print_outcomes(&report.outcomes, report.mode);
    if report.changed() == 0 {
        println!("{prefix}✓ nothing to do");
    }
}

fn print_failure(err: &PipelineError, mode: RunMode) {
    if !err.outcomes.is_empty() {
        eprintln!("completed before the failure:");
        print_outcomes(&err.outcomes, mode);
    }
    let ReconcileError::Partial(partial) = &err.source else {
        return;
    };
    eprintln!("{} {}", "partially applied:".red().bold(), err.resource);
    for operation in &partial.completed {
        eprintln!("  ✓  {operation}");
    }
    eprintln!("  ✗  {}", partial.failed);
    match &partial.observed {
        Observed::Conditions(conditions) => {
            eprintln!("remote conditions now:");
            for condition in conditions {
                eprintln!(
                    "  ·  {} {} {}",
                    condition.metric, condition.op, condition.error
                );
            }
        }
        Observed::Portfolio(portfolio) => {
            let mode = portfolio
                .mode()
                .map(|m| m.to_string())
                .unwrap_or_else(|| "unset".to_string());
            eprintln!("remote selection now: {mode}");
            let stale = portfolio.stale_fields();
            if !stale.is_empty() {
                eprintln!("  stale fields: {}", stale.join(", "));
            }
        }
        Observed::Unavailable(reason) => eprintln!("remote state unknown: {reason}"),
    }
    eprintln!("Run the same command again to finish converging.");
}

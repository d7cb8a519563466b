//! `sonarsync check`: offline manifest validation.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use sonarsync_core::{manifest, SelectionMode};

use super::run::DEFAULT_MANIFEST;

/// Arguments for `sonarsync check`.
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Path to the desired-state manifest.
    #[arg(long, short, default_value = DEFAULT_MANIFEST)]
    pub manifest: PathBuf,
}

impl CheckArgs {
    pub fn run(self) -> Result<()> {
        let manifest = manifest::load_at(&self.manifest)
            .with_context(|| format!("{} is not a valid manifest", self.manifest.display()))?;

        let conditions: usize = manifest
            .quality_gates
            .iter()
            .map(|gate| gate.conditions.len())
            .sum();
        let count_mode = |mode: SelectionMode| {
            manifest
                .portfolios
                .iter()
                .filter(|p| p.selection.mode() == mode)
                .count()
        };

        println!(
            "{} {}",
            "✓".green().bold(),
            self.manifest.display()
        );
        println!("  {} project(s)", manifest.projects.len());
        println!(
            "  {} quality gate(s), {} condition(s)",
            manifest.quality_gates.len(),
            conditions
        );
        println!(
            "  {} portfolio(s): {} manual, {} regexp, {} filter",
            manifest.portfolios.len(),
            count_mode(SelectionMode::Manual),
            count_mode(SelectionMode::Regexp),
            count_mode(SelectionMode::Filter),
        );
        Ok(())
    }
}

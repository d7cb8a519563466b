//! `sonarsync show`: print one resource as the remote reports it.

use anyhow::{Context, Result};
use clap::Subcommand;
use serde::Serialize;

use sonarsync_core::{PortfolioKey, ProjectKey};

use super::connection::{self, ConnectionArgs};

#[derive(Subcommand, Debug)]
pub enum ShowCommand {
    /// A project, by key.
    Project { key: String },
    /// A quality gate and its conditions, by name.
    Gate { name: String },
    /// A portfolio with its selection and filters, by key.
    Portfolio { key: String },
}

pub fn run(command: ShowCommand, connection: &ConnectionArgs) -> Result<()> {
    let session = connection.connect()?;
    let client = session.client.clone();

    let rendered = connection::block_on(|cancel| async move {
        let rendered = match &command {
            ShowCommand::Project { key } => {
                let project = client
                    .projects()
                    .read(&cancel, &ProjectKey::from(key.as_str()))
                    .await
                    .with_context(|| format!("failed to read project '{key}'"))?;
                pretty(&project)?
            }
            ShowCommand::Gate { name } => {
                let gate = client
                    .quality_gates()
                    .show_by_name(&cancel, name)
                    .await
                    .with_context(|| format!("failed to read quality gate '{name}'"))?;
                pretty(&gate)?
            }
            ShowCommand::Portfolio { key } => {
                let portfolio = client
                    .portfolios()
                    .show(&cancel, &PortfolioKey::from(key.as_str()))
                    .await
                    .with_context(|| format!("failed to read portfolio '{key}'"))?;
                pretty(&portfolio)?
            }
        };
        Ok(rendered)
    });
    session.print_metrics();

    println!("{}", rendered?);
    Ok(())
}

fn pretty<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).context("failed to serialize response")
}

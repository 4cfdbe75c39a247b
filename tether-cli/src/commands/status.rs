//! Control plane status probes

use anyhow::Result;
use clap::Subcommand;
use colored::*;

use crate::config::Config;

#[derive(Subcommand)]
pub enum StatusCommands {
    /// Git state of the infrastructure repository
    Repo,
    /// Schema readiness of the durable store
    Store,
}

pub async fn handle_status_command(command: StatusCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        StatusCommands::Repo => {
            let status = client.repo_status().await?;
            println!("{}", "Repository:".bold());
            println!(
                "  Branch:    {}",
                status.branch.as_deref().unwrap_or("(detached)").cyan()
            );
            if let Some(head) = &status.head {
                println!("  HEAD:      {}", head.dimmed());
            }
            if let Some(upstream) = &status.upstream {
                println!(
                    "  Upstream:  {} (ahead {}, behind {})",
                    upstream, status.ahead, status.behind
                );
            }
            let state = if status.is_dirty() {
                format!("{} changed, {} untracked", status.changed, status.untracked).yellow()
            } else {
                "clean".green()
            };
            println!("  State:     {}", state);
        }
        StatusCommands::Store => {
            let status = client.store_status().await?;
            println!("{}", "Store:".bold());
            println!("  Backend:   {}", status.backend);
            if status.ready {
                println!("  Schema:    {}", "ready".green());
            } else {
                println!(
                    "  Schema:    {} (missing: {})",
                    "incomplete".red(),
                    status.missing_tables.join(", ")
                );
            }
        }
    }

    Ok(())
}

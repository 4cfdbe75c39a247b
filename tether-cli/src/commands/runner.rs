//! Runner command handlers
//!
//! Handles all runner-related CLI commands including listing runners.

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use tether_core::dto::runner::RunnerSummary;

use crate::config::Config;
use tether_client::OrchestratorClient;

/// Runner subcommands
#[derive(Subcommand)]
pub enum RunnerCommands {
    /// List all registered runners
    List,
    /// Show one runner, including its sealing key
    Get {
        /// Runner ID
        id: String,
    },
}

/// Handle runner commands
pub async fn handle_runner_command(command: RunnerCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        RunnerCommands::List => list_runners(&client).await,
        RunnerCommands::Get { id } => get_runner(&client, &id).await,
    }
}

/// List all registered runners
async fn list_runners(client: &OrchestratorClient) -> Result<()> {
    let runners = client.list_runners().await?;

    if runners.is_empty() {
        println!("{}", "No runners registered.".yellow());
    } else {
        println!(
            "{}",
            format!("Found {} registered runner(s):", runners.len()).bold()
        );
        println!();
        for runner in runners {
            print_runner_summary(&runner);
        }
    }

    Ok(())
}

async fn get_runner(client: &OrchestratorClient, id: &str) -> Result<()> {
    let runner = client.get_runner(id).await?;

    println!("{}", "Runner Details:".bold());
    println!("  ID:           {}", runner.id.cyan());
    println!("  Capabilities: {}", runner.capabilities.join(", "));
    println!(
        "  Key ID:       {}",
        runner.key_id.as_deref().unwrap_or("none").dimmed()
    );
    println!(
        "  Last Seen:    {}",
        runner.last_heartbeat_at.format("%Y-%m-%d %H:%M:%S")
    );
    if let Some(pem) = &runner.public_key_pem {
        println!("\n{}", "Public Key:".bold());
        print!("{}", pem);
    }

    Ok(())
}

/// Print a runner summary
fn print_runner_summary(runner: &RunnerSummary) {
    println!("  {} Runner {}", "▸".cyan(), runner.id.bold());
    println!("    Capabilities: {}", runner.capability_count);
    println!(
        "    Key ID:       {}",
        runner.key_id.as_deref().unwrap_or("none").dimmed()
    );
    println!(
        "    Registered:   {}",
        runner
            .registered_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    println!(
        "    Last Seen:    {}",
        runner
            .last_heartbeat_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    println!();
}

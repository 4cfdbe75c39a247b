//! Run command handlers
//!
//! Status, waiting, event logs, cancel and results of a run.

use std::time::Duration;

use anyhow::{Result, bail};
use clap::Subcommand;
use colored::*;
use tether_core::domain::job::JobStatus;
use uuid::Uuid;

use tether_client::{WaitOptions, WaitOutcome, wait_for_terminal};

use crate::config::Config;
use crate::output::{colorize_status, print_event, print_json, print_run_status};

const PAGE_SIZE: usize = 500;

/// Run subcommands
#[derive(Subcommand)]
pub enum RunCommands {
    /// Show the current status of a run
    Status {
        /// Run ID
        id: Uuid,
    },
    /// Wait until a run reaches a terminal status
    Wait {
        /// Run ID
        id: Uuid,

        /// Seconds between polls
        #[arg(long, default_value_t = 2)]
        interval: u64,

        /// Give up after this many seconds
        #[arg(long, default_value_t = 600)]
        timeout: u64,
    },
    /// Print a run's events
    Logs {
        /// Run ID
        id: Uuid,

        /// Only events after this sequence number
        #[arg(long)]
        after: Option<i64>,

        /// Keep printing new events until the run finishes
        #[arg(short, long)]
        follow: bool,
    },
    /// Cancel a run
    Cancel {
        /// Run ID
        id: Uuid,
    },
    /// Print a run's result
    Result {
        /// Run ID
        id: Uuid,
    },
}

pub async fn handle_run_command(command: RunCommands, config: &Config) -> Result<()> {
    match command {
        RunCommands::Status { id } => {
            let view = config.client().run_status(id).await?;
            print_run_status(&view);
            Ok(())
        }
        RunCommands::Wait {
            id,
            interval,
            timeout,
        } => {
            wait_and_report(
                config,
                id,
                Duration::from_secs(interval),
                Duration::from_secs(timeout),
            )
            .await
        }
        RunCommands::Logs { id, after, follow } => print_logs(config, id, after, follow).await,
        RunCommands::Cancel { id } => {
            let view = config.client().cancel_run(id).await?;
            println!(
                "{} run {} is now {}",
                "✓".green(),
                id.to_string().cyan(),
                colorize_status(view.status)
            );
            Ok(())
        }
        RunCommands::Result { id } => print_result(config, id).await,
    }
}

/// Waits for `run_id` and fails unless it succeeded.
pub async fn wait_and_report(
    config: &Config,
    run_id: Uuid,
    interval: Duration,
    timeout: Duration,
) -> Result<()> {
    println!("{}", format!("Waiting for run {}...", run_id).dimmed());

    let client = config.client();
    let outcome = wait_for_terminal(&client, run_id, WaitOptions { interval, timeout }).await?;

    match outcome {
        WaitOutcome::Finished {
            status,
            error_message,
        } => {
            println!(
                "Run {} finished: {}",
                run_id.to_string().cyan(),
                colorize_status(status.status)
            );
            if status.status == JobStatus::Succeeded {
                return Ok(());
            }
            match error_message {
                Some(message) => bail!("run {} {}: {}", run_id, status.status, message),
                None => bail!("run {} {}", run_id, status.status),
            }
        }
        WaitOutcome::StillRunning { last } => {
            let status = last
                .map(|view| view.status.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            bail!(
                "run {} still {} after {}s",
                run_id,
                status,
                timeout.as_secs()
            )
        }
    }
}

async fn print_logs(config: &Config, run_id: Uuid, after: Option<i64>, follow: bool) -> Result<()> {
    let client = config.client();
    let mut cursor = after;
    let mut printed = 0usize;

    loop {
        let page = client.list_events(run_id, cursor, Some(PAGE_SIZE)).await?;
        for event in &page.events {
            print_event(event);
        }
        printed += page.events.len();
        if page.next_seq.is_some() {
            cursor = page.next_seq;
        }
        if page.events.len() == PAGE_SIZE {
            continue;
        }

        if !follow || client.run_status(run_id).await?.status.is_terminal() {
            // Anything appended between the last page and the status check
            if follow {
                let tail = client.list_events(run_id, cursor, Some(PAGE_SIZE)).await?;
                tail.events.iter().for_each(print_event);
                printed += tail.events.len();
            }
            break;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    if printed == 0 {
        println!("{}", "No events found for this run.".yellow());
    }
    Ok(())
}

async fn print_result(config: &Config, run_id: Uuid) -> Result<()> {
    let client = config.client();

    if let Some(result) = client.get_result(run_id).await? {
        println!(
            "Success: {}  Exit code: {}",
            if result.success {
                "✓".green()
            } else {
                "✗".red()
            },
            result.exit_code
        );
        if let Some(error) = &result.error_message {
            println!("{}", error.red());
        }
        if let Some(output) = &result.output {
            print_json(output);
            return Ok(());
        }
    }

    match client.get_large_result(run_id).await? {
        Some(large) => print_json(&large),
        None => println!("{}", "No result stored for this run.".yellow()),
    }
    Ok(())
}

//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod job;
mod run;
mod runner;
mod seal;
mod status;

pub use job::JobCommands;
pub use run::RunCommands;
pub use runner::RunnerCommands;
pub use seal::SealArgs;
pub use status::StatusCommands;

use anyhow::Result;
use clap::Subcommand;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Job submission and inspection
    Job {
        #[command(subcommand)]
        command: JobCommands,
    },
    /// Run status, logs and control
    Run {
        #[command(subcommand)]
        command: RunCommands,
    },
    /// Runner management
    Runner {
        #[command(subcommand)]
        command: RunnerCommands,
    },
    /// Seal a JSON document for a runner without enqueuing anything
    Seal(SealArgs),
    /// Control plane status probes
    Status {
        #[command(subcommand)]
        command: StatusCommands,
    },
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Job { command } => job::handle_job_command(command, config).await,
        Commands::Run { command } => run::handle_run_command(command, config).await,
        Commands::Runner { command } => runner::handle_runner_command(command, config).await,
        Commands::Seal(args) => seal::handle_seal_command(args, config).await,
        Commands::Status { command } => status::handle_status_command(command, config).await,
    }
}

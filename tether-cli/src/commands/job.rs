//! Job command handlers
//!
//! Handles job submission, including sealing a secret for the target
//! runner, and job inspection.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, anyhow};
use clap::Subcommand;
use colored::*;
use serde_json::{Map, Value};
use tether_core::domain::kind::JobKind;
use tether_core::dto::job::EnqueueJob;
use uuid::Uuid;

use super::run::wait_and_report;
use super::seal::{fetch_recipient, parse_kind, read_payload, seal_for};
use crate::config::Config;
use crate::output::print_job_details;

/// Job subcommands
#[derive(Subcommand)]
pub enum JobCommands {
    /// Enqueue a job
    Enqueue {
        /// Project the job belongs to
        #[arg(long)]
        project: String,

        /// Job kind: custom, ssh, probe or export
        #[arg(long, value_parser = parse_kind, default_value = "custom")]
        kind: JobKind,

        /// Human-readable title
        #[arg(long)]
        title: String,

        /// Only this runner may lease the job
        #[arg(long)]
        target_runner: Option<String>,

        /// Remote host for ssh jobs
        #[arg(long)]
        host: Option<String>,

        /// Extra payload metadata as key=value
        #[arg(long = "meta", value_parser = parse_meta)]
        meta: Vec<(String, String)>,

        /// JSON file sealed for the target runner
        #[arg(long, requires = "target_runner")]
        secret_file: Option<PathBuf>,

        /// Enqueue first and attach the sealed input in a second call
        #[arg(long, requires = "secret_file")]
        two_phase: bool,

        /// Hold the job until `job finalize` attaches its sealed input
        #[arg(long, requires = "target_runner", conflicts_with = "secret_file")]
        expect_sealed_input: bool,

        /// Wait for the run to finish
        #[arg(long)]
        wait: bool,

        /// Give up waiting after this many seconds
        #[arg(long, default_value_t = 600)]
        timeout: u64,

        /// Command and arguments
        #[arg(last = true, required = true)]
        args: Vec<String>,
    },
    /// Attach a sealed secret to a job enqueued with `--expect-sealed-input`
    Finalize {
        /// Job ID
        id: Uuid,

        /// JSON file sealed for the job's target runner
        #[arg(long)]
        secret_file: PathBuf,
    },
    /// Get job details
    Get {
        /// Job ID
        id: Uuid,
    },
}

/// Handle job commands
pub async fn handle_job_command(command: JobCommands, config: &Config) -> Result<()> {
    match command {
        JobCommands::Enqueue {
            project,
            kind,
            title,
            target_runner,
            host,
            meta,
            secret_file,
            two_phase,
            expect_sealed_input,
            wait,
            timeout,
            args,
        } => {
            let mut payload_meta = Map::new();
            for (key, value) in meta {
                payload_meta.insert(key, Value::String(value));
            }
            if let Some(host) = host {
                payload_meta.insert("host".to_string(), Value::String(host));
            }
            if kind == JobKind::Ssh && !payload_meta.contains_key("host") {
                return Err(anyhow!("ssh jobs need --host"));
            }

            let request = EnqueueJob {
                job_id: None,
                project_id: project,
                kind,
                title,
                args,
                target_runner_id: target_runner,
                payload_meta: Value::Object(payload_meta),
                sealed_input: None,
                expect_sealed_input,
            };
            let run_id = enqueue(config, request, secret_file, two_phase).await?;

            if wait {
                wait_and_report(config, run_id, Duration::from_secs(2), Duration::from_secs(timeout))
                    .await?;
            }
            Ok(())
        }
        JobCommands::Finalize { id, secret_file } => finalize(config, id, &secret_file).await,
        JobCommands::Get { id } => {
            let job = config.client().get_job(id).await?;
            print_job_details(&job);
            Ok(())
        }
    }
}

async fn enqueue(
    config: &Config,
    mut request: EnqueueJob,
    secret_file: Option<PathBuf>,
    two_phase: bool,
) -> Result<Uuid> {
    let client = config.client();

    let sealed = match (&secret_file, &request.target_runner_id) {
        (Some(path), Some(target)) => {
            let recipient = fetch_recipient(&client, target).await?;
            let payload = read_payload(path)?;
            let job_id = Uuid::new_v4();
            request.job_id = Some(job_id);
            Some(seal_for(
                &recipient,
                &request.project_id,
                job_id,
                request.kind,
                target,
                &payload,
            )?)
        }
        (Some(_), None) => return Err(anyhow!("--secret-file needs --target-runner")),
        _ => None,
    };

    let queued = match sealed {
        Some(sealed) if two_phase => {
            request.expect_sealed_input = true;
            let queued = client.enqueue_job(request).await?;
            client.finalize_sealed_input(queued.job_id, sealed).await?;
            queued
        }
        sealed => {
            request.sealed_input = sealed;
            client.enqueue_job(request).await?
        }
    };

    println!("{}", "✓ Job enqueued".green());
    println!("  Job ID: {}", queued.job_id.to_string().dimmed());
    println!("  Run ID: {}", queued.run_id.to_string().cyan());

    Ok(queued.run_id)
}

/// Seals `secret_file` against the stored job's own fields, so the binding
/// matches what the runner will rebuild.
async fn finalize(config: &Config, job_id: Uuid, secret_file: &Path) -> Result<()> {
    let client = config.client();
    let job = client.get_job(job_id).await?;

    if !job.awaiting_sealed_input {
        return Err(anyhow!("job {} is not waiting for sealed input", job_id));
    }
    let target = job
        .target_runner_id
        .as_deref()
        .ok_or_else(|| anyhow!("job {} has no target runner", job_id))?;

    let recipient = fetch_recipient(&client, target).await?;
    let payload = read_payload(secret_file)?;
    let sealed = seal_for(&recipient, &job.project_id, job.id, job.kind, target, &payload)?;
    client.finalize_sealed_input(job.id, sealed).await?;

    println!(
        "{} sealed input attached to job {} for runner {}",
        "✓".green(),
        job.id.to_string().cyan(),
        target
    );
    Ok(())
}

fn parse_meta(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{}'", s)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_meta() {
        assert_eq!(
            parse_meta("region=eu-west=1").unwrap(),
            ("region".to_string(), "eu-west=1".to_string())
        );
        assert!(parse_meta("novalue").is_err());
        assert!(parse_meta("=x").is_err());
    }
}

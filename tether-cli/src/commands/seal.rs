//! Sealing secrets for a target runner
//!
//! The runner's public key is fetched from the orchestrator, and the
//! envelope is bound to the job it will travel with, so the job id must be
//! known before sealing.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::Args;
use colored::*;
use tether_client::OrchestratorClient;
use tether_core::domain::job::SealedInput;
use tether_core::domain::kind::JobKind;
use tether_envelope::{ALGORITHM, Aad, RecipientKey, seal_json};
use uuid::Uuid;

use crate::config::Config;
use crate::output::print_json;

/// Arguments for `tether seal`
#[derive(Args)]
pub struct SealArgs {
    /// Runner the envelope is sealed for
    #[arg(long)]
    pub runner: String,

    /// Project the job belongs to
    #[arg(long)]
    pub project: String,

    /// Job the envelope is bound to
    #[arg(long)]
    pub job_id: Uuid,

    /// Kind of the job
    #[arg(long, value_parser = parse_kind)]
    pub kind: JobKind,

    /// JSON file to seal
    #[arg(long)]
    pub input: PathBuf,
}

pub fn parse_kind(s: &str) -> Result<JobKind, String> {
    s.parse().map_err(|e: tether_core::domain::kind::UnknownKind| e.to_string())
}

pub async fn handle_seal_command(args: SealArgs, config: &Config) -> Result<()> {
    let client = config.client();
    let recipient = fetch_recipient(&client, &args.runner).await?;
    let payload = read_payload(&args.input)?;

    let sealed = seal_for(
        &recipient,
        &args.project,
        args.job_id,
        args.kind,
        &args.runner,
        &payload,
    )?;

    eprintln!(
        "{}",
        format!("Sealed {} for runner {} (key {})", args.input.display(), args.runner, recipient.key_id)
            .green()
    );
    print_json(&serde_json::to_value(&sealed)?);

    Ok(())
}

/// Looks up the sealing key a runner registered.
pub async fn fetch_recipient(client: &OrchestratorClient, runner_id: &str) -> Result<RecipientKey> {
    let runner = client
        .get_runner(runner_id)
        .await
        .with_context(|| format!("Failed to fetch runner {}", runner_id))?;

    let pem = runner
        .public_key_pem
        .ok_or_else(|| anyhow!("Runner {} has not published a sealing key", runner_id))?;
    let recipient = RecipientKey::from_pem(&pem).context("Runner published an invalid key")?;

    if let Some(registered) = runner.key_id.as_deref() {
        if registered != recipient.key_id {
            return Err(anyhow!(
                "Runner {} key id {} does not match its public key ({})",
                runner_id,
                registered,
                recipient.key_id
            ));
        }
    }

    Ok(recipient)
}

pub fn read_payload(path: &Path) -> Result<serde_json::Value> {
    let raw = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("{} is not valid JSON", path.display()))
}

/// Seals `payload` for the job identified by `job_id` on `target`.
pub fn seal_for(
    recipient: &RecipientKey,
    project_id: &str,
    job_id: Uuid,
    kind: JobKind,
    target: &str,
    payload: &serde_json::Value,
) -> Result<SealedInput> {
    let aad = Aad::job(project_id, job_id, kind, target).context("Invalid sealing context")?;
    let sealed_input_b64 = seal_json(payload, recipient, &aad).context("Failed to seal input")?;

    Ok(SealedInput {
        sealed_input_b64,
        sealed_input_alg: ALGORITHM.to_string(),
        sealed_input_key_id: recipient.key_id.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tether_envelope::{Keyring, RunnerKeypair, open_json};

    #[test]
    fn test_sealed_input_opens_for_same_job_only() {
        let keypair = RunnerKeypair::generate(2048).unwrap();
        let recipient = keypair.recipient().unwrap();
        let keyring = Keyring::single(keypair);
        let job_id = Uuid::new_v4();
        let payload = json!({"token": "abc-123"});

        let sealed = seal_for(&recipient, "proj", job_id, JobKind::Custom, "runner-a", &payload).unwrap();
        assert_eq!(sealed.sealed_input_alg, ALGORITHM);
        assert_eq!(sealed.sealed_input_key_id, recipient.key_id);

        let aad = Aad::job("proj", job_id, JobKind::Custom, "runner-a").unwrap();
        let opened = open_json(&sealed.sealed_input_b64, &keyring, &aad, &sealed.sealed_input_key_id).unwrap();
        assert_eq!(opened, payload);

        let other = Aad::job("proj", Uuid::new_v4(), JobKind::Custom, "runner-a").unwrap();
        assert!(open_json(&sealed.sealed_input_b64, &keyring, &other, &sealed.sealed_input_key_id).is_err());
    }

    #[test]
    fn test_read_payload_rejects_non_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret.json");
        std::fs::write(&path, b"password=hunter2").unwrap();
        assert!(read_payload(&path).is_err());

        std::fs::write(&path, br#"{"password": "hunter2"}"#).unwrap();
        assert_eq!(read_payload(&path).unwrap()["password"], "hunter2");
    }

    #[test]
    fn test_parse_kind() {
        assert_eq!(parse_kind("probe").unwrap(), JobKind::Probe);
        assert!(parse_kind("deploy").is_err());
    }
}

//! Command templates per job kind

use tether_core::domain::job::Job;
use tether_core::domain::kind::JobKind;

use super::executor::CommandSpec;
use super::sealed_input::MaterializedInput;
use crate::config::Config;

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("job has no command")]
    Empty,

    #[error("ssh job is missing payload_meta.host")]
    MissingHost,

    #[error("ssh host cannot start with '-': {0}")]
    InvalidHost(String),
}

/// Builds the process to spawn for `job` from its resolved arguments.
pub fn build_command(
    job: &Job,
    input: &MaterializedInput,
    config: &Config,
) -> Result<CommandSpec, CommandError> {
    let mut spec = match job.kind {
        JobKind::Custom | JobKind::Probe | JobKind::Export => {
            let (program, rest) = input.args.split_first().ok_or(CommandError::Empty)?;
            if program.is_empty() {
                return Err(CommandError::Empty);
            }
            CommandSpec::new(program.as_str()).args(rest.iter().cloned())
        }
        JobKind::Ssh => {
            let host = job.host().ok_or(CommandError::MissingHost)?;
            if host.trim_start().starts_with('-') {
                return Err(CommandError::InvalidHost(host.to_string()));
            }
            if input.args.is_empty() {
                return Err(CommandError::Empty);
            }
            CommandSpec::new(config.ssh_binary.as_str())
                .args(["-o", "BatchMode=yes", host, "--"])
                .args(input.args.iter().cloned())
        }
    };

    for (key, value) in &input.env {
        spec = spec.env(key.as_str(), value.as_str());
    }
    if let Some(stdin) = &input.stdin {
        spec = spec.stdin(stdin.clone());
    }
    if let Some(limit) = job.kind.result_policy().ceiling_bytes() {
        spec = spec.capture_stdout(limit);
    }
    spec.current_dir = Some(config.work_dir.clone());

    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::redact::Redactor;
    use crate::service::sealed_input::materialize;
    use chrono::Utc;
    use serde_json::json;
    use tether_core::domain::job::JobStatus;
    use tether_core::domain::kind::JSON_SMALL_MAX_BYTES;
    use tether_envelope::Keyring;
    use uuid::Uuid;

    fn job(kind: JobKind, args: &[&str], meta: serde_json::Value) -> Job {
        Job {
            id: Uuid::new_v4(),
            run_id: Uuid::new_v4(),
            project_id: "proj".to_string(),
            kind,
            title: "t".to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            target_runner_id: None,
            payload_meta: meta,
            sealed_input: None,
            awaiting_sealed_input: false,
            status: JobStatus::Leased,
            lease: None,
            attempt: 1,
            cancel_requested: false,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
        }
    }

    fn build(job: &Job) -> Result<CommandSpec, CommandError> {
        let dir = std::env::temp_dir();
        let input = materialize(job, &Keyring::new(), &dir, &mut Redactor::new()).unwrap();
        build_command(job, &input, &Config::default())
    }

    #[test]
    fn test_custom_uses_first_arg_as_program() {
        let spec = build(&job(JobKind::Custom, &["echo", "a", "b"], json!({}))).unwrap();
        assert_eq!(spec.program, "echo");
        assert_eq!(spec.args, vec!["a", "b"]);
        assert_eq!(spec.capture_stdout, None);
    }

    #[test]
    fn test_probe_captures_stdout() {
        let spec = build(&job(JobKind::Probe, &["uptime"], json!({}))).unwrap();
        assert_eq!(spec.capture_stdout, Some(JSON_SMALL_MAX_BYTES));
    }

    #[test]
    fn test_ssh_wraps_remote_command() {
        let spec = build(&job(
            JobKind::Ssh,
            &["systemctl", "restart", "web"],
            json!({"host": "web-1.internal"}),
        ))
        .unwrap();
        assert_eq!(spec.program, "ssh");
        assert_eq!(
            spec.args,
            vec!["-o", "BatchMode=yes", "web-1.internal", "--", "systemctl", "restart", "web"]
        );
    }

    #[test]
    fn test_ssh_requires_host() {
        let err = build(&job(JobKind::Ssh, &["true"], json!({}))).unwrap_err();
        assert!(matches!(err, CommandError::MissingHost));
    }

    #[test]
    fn test_ssh_host_option_rejected() {
        let err = build(&job(
            JobKind::Ssh,
            &["true"],
            json!({"host": "-oProxyCommand=id"}),
        ))
        .unwrap_err();
        assert!(matches!(err, CommandError::InvalidHost(_)));
    }

    #[test]
    fn test_empty_command_rejected() {
        assert!(matches!(
            build(&job(JobKind::Custom, &[], json!({}))),
            Err(CommandError::Empty)
        ));
        assert!(matches!(
            build(&job(JobKind::Custom, &[""], json!({}))),
            Err(CommandError::Empty)
        ));
    }
}

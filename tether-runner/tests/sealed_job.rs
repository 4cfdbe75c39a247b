//! A sealed job driven through the poller: the secret reaches the process,
//! never the event stream, and the plaintext file is gone afterwards.
#![cfg(unix)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tether_client::Result as ClientResult;
use tether_core::domain::job::{Job, JobStatus, Lease, SealedInput};
use tether_core::domain::kind::JobKind;
use tether_core::domain::runner::Runner;
use tether_core::dto::event::AppendEvents;
use tether_core::dto::job::{CompleteJob, LeaseRenewal};
use tether_core::dto::runner::RegisterRunner;
use tether_envelope::{ALGORITHM, Aad, Keyring, RunnerKeypair, seal_json};
use tether_runner::config::Config;
use tether_runner::repository::{EventRepository, JobRepository, RunnerRepository};
use tether_runner::scheduler::JobPoller;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const RUNNER: &str = "runner-sealed";
const SECRET: &str = "correct-horse-battery";

#[derive(Default)]
struct Jobs {
    queue: Mutex<VecDeque<Job>>,
    completed: Mutex<Vec<CompleteJob>>,
}

#[async_trait]
impl JobRepository for Jobs {
    async fn claim_next(&self) -> ClientResult<Option<Job>> {
        Ok(self.queue.lock().unwrap().pop_front())
    }

    async fn renew_lease(&self, _job_id: Uuid, _lease_id: Uuid) -> ClientResult<LeaseRenewal> {
        Ok(LeaseRenewal {
            lease_expires_at: Utc::now(),
            cancel_requested: false,
        })
    }

    async fn put_large_result(
        &self,
        _run_id: Uuid,
        _lease_id: Uuid,
        _result: serde_json::Value,
    ) -> ClientResult<()> {
        Ok(())
    }

    async fn complete(&self, _job_id: Uuid, completion: &CompleteJob) -> ClientResult<()> {
        self.completed.lock().unwrap().push(completion.clone());
        Ok(())
    }
}

#[derive(Default)]
struct Events {
    messages: Mutex<Vec<(String, bool)>>,
}

#[async_trait]
impl EventRepository for Events {
    async fn append_events(&self, _run_id: Uuid, batch: &AppendEvents) -> ClientResult<()> {
        self.messages
            .lock()
            .unwrap()
            .extend(batch.events.iter().map(|e| (e.message.clone(), e.redacted)));
        Ok(())
    }
}

struct Runners;

#[async_trait]
impl RunnerRepository for Runners {
    async fn register(&self, _request: &RegisterRunner) -> ClientResult<Runner> {
        unimplemented!()
    }

    async fn send_heartbeat(&self) -> ClientResult<()> {
        Ok(())
    }
}

fn sealed_job(keypair: &RunnerKeypair, args: &[&str]) -> Job {
    let id = Uuid::new_v4();
    let recipient = keypair.recipient().unwrap();
    let aad = Aad::job("proj", id, JobKind::Custom, RUNNER).unwrap();
    let sealed = seal_json(&json!({"db": {"password": SECRET}}), &recipient, &aad).unwrap();

    Job {
        id,
        run_id: Uuid::new_v4(),
        project_id: "proj".to_string(),
        kind: JobKind::Custom,
        title: "sealed".to_string(),
        args: args.iter().map(|s| s.to_string()).collect(),
        target_runner_id: Some(RUNNER.to_string()),
        payload_meta: json!({}),
        sealed_input: Some(SealedInput {
            sealed_input_b64: sealed,
            sealed_input_alg: ALGORITHM.to_string(),
            sealed_input_key_id: recipient.key_id.clone(),
        }),
        awaiting_sealed_input: false,
        status: JobStatus::Leased,
        lease: Some(Lease {
            lease_id: Uuid::new_v4(),
            owner: RUNNER.to_string(),
            expires_at: Utc::now() + chrono::Duration::seconds(60),
        }),
        attempt: 1,
        cancel_requested: false,
        created_at: Utc::now(),
        started_at: Some(Utc::now()),
        completed_at: None,
        result: None,
    }
}

async fn run_sealed(script: &str) -> (Vec<CompleteJob>, Vec<(String, bool)>, tempfile::TempDir) {
    let work_dir = tempfile::tempdir().unwrap();
    let keypair = RunnerKeypair::generate(2048).unwrap();
    let job = sealed_job(&keypair, &["/bin/sh", "-c", script]);

    let jobs = Arc::new(Jobs::default());
    let events = Arc::new(Events::default());
    jobs.queue.lock().unwrap().push_back(job);

    let mut config = Config::new(RUNNER.to_string(), "http://localhost:1".to_string());
    config.work_dir = work_dir.path().to_path_buf();
    config.job_timeout = Duration::from_secs(20);
    config.stream.flush_interval = Duration::from_millis(20);

    let poller = JobPoller::new(
        config,
        Arc::clone(&jobs) as Arc<dyn JobRepository>,
        Arc::clone(&events) as Arc<dyn EventRepository>,
        Arc::new(Runners),
        Arc::new(Keyring::single(keypair)),
    );
    let handle = poller
        .poll_once(&CancellationToken::new())
        .await
        .unwrap()
        .expect("job claimed");
    handle.await.unwrap();

    let completed = jobs.completed.lock().unwrap().clone();
    let messages = events.messages.lock().unwrap().clone();
    (completed, messages, work_dir)
}

#[tokio::test]
async fn test_secret_file_is_readable_but_never_logged() {
    let (completed, messages, work_dir) = run_sealed(
        r#"cat "$TETHER_SEALED_INPUT_FILE"; echo; echo "checking password $(grep -o 'correct-[a-z-]*' "$TETHER_SEALED_INPUT_FILE")""#,
    )
    .await;

    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].status, JobStatus::Succeeded);

    assert!(!messages.is_empty());
    assert!(messages.iter().all(|(m, _)| !m.contains(SECRET)));
    assert!(
        messages
            .iter()
            .any(|(m, redacted)| *redacted && m == "checking password [REDACTED]")
    );

    // The plaintext file was removed once the process finished
    assert_eq!(std::fs::read_dir(work_dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_failure_message_is_redacted_too() {
    let (completed, messages, _work_dir) =
        run_sealed(&format!("echo \"auth failed for {}\" >&2; exit 2", SECRET)).await;

    assert_eq!(completed[0].status, JobStatus::Failed);
    assert_eq!(completed[0].result.as_ref().unwrap().exit_code, 2);
    assert!(
        messages
            .iter()
            .any(|(m, _)| m == "auth failed for [REDACTED]")
    );
    assert!(messages.iter().all(|(m, _)| !m.contains(SECRET)));
}

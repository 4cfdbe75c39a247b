//! Job poller
//!
//! Claims jobs from the orchestrator and executes them, at most
//! `max_parallel_jobs` at a time. Each job runs in its own task with its own
//! event stream, redactor and lease renewal loop.
//!
//! A renewal that reports `cancel_requested` stops the process and the job
//! completes as canceled. A renewal that finds the lease gone also stops it,
//! but the job is then abandoned without completing: whoever holds the lease
//! now owns the outcome. Runner shutdown stops running commands the same way
//! and leaves their leases to lapse so another runner picks them up.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use chrono::{DateTime, Utc};
use tether_client::ClientError;
use tether_core::domain::job::{Job, JobStatus};
use tether_core::dto::job::CompleteJob;
use tether_envelope::Keyring;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::repository::{EventRepository, JobRepository, RunnerRepository};
use crate::service::command::build_command;
use crate::service::event_stream::{EventEmitter, EventStream};
use crate::service::executor::CommandExecutor;
use crate::service::redact::Redactor;
use crate::service::result::{Completion, conclude};
use crate::service::sealed_input;

const COMPLETE_ATTEMPTS: u32 = 5;
const COMPLETE_BACKOFF: Duration = Duration::from_millis(500);

/// Shortest pause between renewals, even when the lease is nearly gone
const MIN_RENEW_DELAY: Duration = Duration::from_millis(250);

/// Everything a job task needs, cheap to clone into it
#[derive(Clone)]
struct Worker {
    config: Arc<Config>,
    jobs: Arc<dyn JobRepository>,
    events: Arc<dyn EventRepository>,
    executor: CommandExecutor,
    keyring: Arc<Keyring>,
}

/// Job poller that continuously claims and executes jobs
pub struct JobPoller {
    worker: Worker,
    runners: Arc<dyn RunnerRepository>,
    semaphore: Arc<Semaphore>,
}

impl JobPoller {
    pub fn new(
        config: Config,
        jobs: Arc<dyn JobRepository>,
        events: Arc<dyn EventRepository>,
        runners: Arc<dyn RunnerRepository>,
        keyring: Arc<Keyring>,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_parallel_jobs));
        let executor = CommandExecutor::new(config.term_grace);
        Self {
            worker: Worker {
                config: Arc::new(config),
                jobs,
                events,
                executor,
                keyring,
            },
            runners,
            semaphore,
        }
    }

    pub fn executor(&self) -> &CommandExecutor {
        &self.worker.executor
    }

    /// Polls until `shutdown` fires, then waits for running jobs to stop.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let config = &self.worker.config;
        info!(
            "Starting job poller (interval: {:?}, parallel: {})",
            config.poll_interval, config.max_parallel_jobs
        );

        let heartbeat = self.start_heartbeat_loop(shutdown.clone());
        let mut interval = time::interval(config.poll_interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            // Keep claiming while there is capacity and work
            loop {
                match self.poll_once(&shutdown).await {
                    Ok(Some(_)) => continue,
                    Ok(None) => break,
                    Err(e) => {
                        if e.is_transient() {
                            warn!("Failed to claim job: {}", e);
                        } else {
                            error!("Failed to claim job: {}", e);
                        }
                        break;
                    }
                }
            }
        }

        info!("Shutting down, waiting for running jobs");
        let permits = u32::try_from(config.max_parallel_jobs).unwrap_or(u32::MAX);
        let _all = self.semaphore.acquire_many(permits).await;
        heartbeat.abort();

        Ok(())
    }

    /// Claims and spawns at most one job. Returns `None` when the runner is
    /// at capacity or the queue is empty.
    pub async fn poll_once(
        &self,
        shutdown: &CancellationToken,
    ) -> tether_client::Result<Option<JoinHandle<()>>> {
        let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() else {
            debug!("Max parallel jobs reached, not claiming");
            return Ok(None);
        };

        let Some(job) = self.worker.jobs.claim_next().await? else {
            debug!("No jobs available");
            return Ok(None);
        };

        info!(
            "Claimed job {} (run {}, kind {}, attempt {})",
            job.id, job.run_id, job.kind, job.attempt
        );

        let worker = self.worker.clone();
        let cancel = shutdown.child_token();
        Ok(Some(tokio::spawn(worker.execute(job, cancel, permit))))
    }

    fn start_heartbeat_loop(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let runners = Arc::clone(&self.runners);
        let heartbeat_interval = self.worker.config.heartbeat_interval;

        tokio::spawn(async move {
            let mut ticker = time::interval(heartbeat_interval);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = ticker.tick() => {}
                }

                debug!("Sending heartbeat");

                if let Err(e) = runners.send_heartbeat().await {
                    warn!("Failed to send heartbeat: {}", e);
                }
            }
        })
    }
}

impl Worker {
    async fn execute(self, job: Job, cancel: CancellationToken, _permit: OwnedSemaphorePermit) {
        let job_id = job.id;
        if let Err(e) = self.execute_job(job, cancel).await {
            error!("Job {} failed to report: {:#}", job_id, e);
        }
    }

    async fn execute_job(&self, job: Job, cancel: CancellationToken) -> Result<()> {
        let Some(lease) = job.lease.clone() else {
            anyhow::bail!("claimed job {} carries no lease", job.id);
        };

        // Literals from the sealed input must be known before any output
        let mut redactor = Redactor::new();
        let input = sealed_input::materialize(
            &job,
            &self.keyring,
            &self.config.work_dir,
            &mut redactor,
        );
        if redactor.literal_count() > 0 {
            debug!(
                "Registered {} secret literal(s) for run {}",
                redactor.literal_count(),
                job.run_id
            );
        }

        let stream = EventStream::start(
            job.run_id,
            self.config.stream.clone(),
            redactor,
            Arc::clone(&self.events),
        );
        let emitter = stream.emitter();

        let state = Arc::new(LeaseState::default());
        let renewer = tokio::spawn(renew_loop(
            Arc::clone(&self.jobs),
            job.id,
            lease.lease_id,
            lease.expires_at,
            self.config.renew_interval(),
            cancel.clone(),
            Arc::clone(&state),
            emitter.clone(),
        ));

        let mut completion = match input {
            Err(e) => {
                warn!("Rejecting job {}: {}", job.id, e);
                emitter.error(format!("sealed input rejected: {}", e));
                Completion::failed(e.to_string())
            }
            Ok(input) => match build_command(&job, &input, &self.config) {
                Err(e) => {
                    emitter.error(e.to_string());
                    Completion::failed(e.to_string())
                }
                Ok(spec) => {
                    emitter.info(format!(
                        "Starting {} (attempt {}): {}",
                        job.title, job.attempt, spec.program
                    ));
                    let outcome = self
                        .executor
                        .run(job.run_id, spec, self.config.job_timeout, &emitter, cancel.clone())
                        .await;
                    drop(input);

                    match outcome {
                        Ok(report) => {
                            debug!(
                                "Job {} process finished in {:?}: {:?}",
                                job.id, report.duration, report.outcome
                            );
                            conclude(job.kind.result_policy(), &report, self.config.job_timeout)
                        }
                        Err(e) => {
                            emitter.error(e.to_string());
                            Completion::failed(e.to_string())
                        }
                    }
                }
            },
        };

        renewer.abort();

        let abandon = state.lost() || (cancel.is_cancelled() && !state.cancel_requested());
        if state.lost() {
            emitter.warning("lease lost, abandoning result");
        } else if abandon {
            emitter.warning("runner shutting down, leaving job for another runner");
        } else {
            report_status(&emitter, &completion);
        }
        drop(emitter);

        match stream.close().await {
            Ok(summary) => debug!(
                "Run {} recorded {} events in {} batch(es)",
                job.run_id, summary.stats.recorded_events, summary.batches
            ),
            Err(e) => warn!("Lost events for run {}: {}", job.run_id, e),
        }

        if abandon {
            warn!("Not completing job {}; its lease will lapse", job.id);
            return Ok(());
        }

        if let Some(value) = completion.large.take() {
            if let Err(e) = self
                .jobs
                .put_large_result(job.run_id, lease.lease_id, value)
                .await
            {
                warn!("Failed to upload result for run {}: {}", job.run_id, e);
                completion = Completion::failed(format!("failed to upload result: {}", e));
            }
        }

        let request = CompleteJob {
            lease_id: lease.lease_id,
            status: completion.status,
            result: Some(completion.result),
        };
        self.complete_with_retry(job.id, &request).await?;

        info!("Job {} completed with status {}", job.id, request.status);
        Ok(())
    }

    async fn complete_with_retry(&self, job_id: Uuid, request: &CompleteJob) -> Result<()> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.jobs.complete(job_id, request).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < COMPLETE_ATTEMPTS => {
                    warn!(
                        "Failed to complete job {} (attempt {}/{}): {}",
                        job_id, attempt, COMPLETE_ATTEMPTS, e
                    );
                    time::sleep(COMPLETE_BACKOFF * attempt).await;
                }
                Err(e) => return Err(anyhow::Error::new(e).context("failed to complete job")),
            }
        }
    }
}

/// What the renewal loop learned about the lease
#[derive(Default)]
struct LeaseState {
    lost: AtomicBool,
    cancel_requested: AtomicBool,
}

impl LeaseState {
    fn lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    fn cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::Acquire)
    }
}

fn report_status(emitter: &EventEmitter, completion: &Completion) {
    match (completion.status, &completion.result.error_message) {
        (JobStatus::Succeeded, _) => emitter.info("job succeeded"),
        (status, Some(message)) => emitter.error(format!("job {}: {}", status, message)),
        (status, None) => emitter.error(format!("job {}", status)),
    };
}

/// Pause before the next renewal: a third of what is left of the lease
/// the orchestrator granted, capped at `max`.
fn renewal_delay(expires_at: DateTime<Utc>, now: DateTime<Utc>, max: Duration) -> Duration {
    let remaining = (expires_at - now).to_std().unwrap_or(Duration::ZERO);
    (remaining / 3).clamp(MIN_RENEW_DELAY, max.max(MIN_RENEW_DELAY))
}

/// Keeps the lease alive until aborted.
///
/// Each renewal is scheduled from the latest server-reported expiry, so a
/// failed attempt is retried sooner rather than waiting a full interval.
#[allow(clippy::too_many_arguments)]
async fn renew_loop(
    jobs: Arc<dyn JobRepository>,
    job_id: Uuid,
    lease_id: Uuid,
    mut expires_at: DateTime<Utc>,
    max_delay: Duration,
    cancel: CancellationToken,
    state: Arc<LeaseState>,
    emitter: EventEmitter,
) {
    loop {
        time::sleep(renewal_delay(expires_at, Utc::now(), max_delay)).await;

        match jobs.renew_lease(job_id, lease_id).await {
            Ok(renewal) => {
                debug!(
                    "Renewed lease on job {} until {}",
                    job_id, renewal.lease_expires_at
                );
                expires_at = renewal.lease_expires_at;
                if renewal.cancel_requested && !state.cancel_requested() {
                    info!("Cancel requested for job {}", job_id);
                    state.cancel_requested.store(true, Ordering::Release);
                    emitter.warning("cancel requested, stopping command");
                    cancel.cancel();
                }
            }
            Err(e) if e.is_transient() => {
                warn!("Failed to renew lease on job {}: {}", job_id, e);
            }
            Err(e) => {
                lost_lease(job_id, &e);
                state.lost.store(true, Ordering::Release);
                cancel.cancel();
                return;
            }
        }
    }
}

fn lost_lease(job_id: Uuid, error: &ClientError) {
    if error.is_conflict() || error.is_not_found() {
        warn!("Lease on job {} is gone: {}", job_id, error);
    } else {
        error!("Lease renewal for job {} rejected: {}", job_id, error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use tether_client::Result as ClientResult;
    use tether_core::domain::job::Lease;
    use tether_core::domain::kind::JobKind;
    use tether_core::domain::runner::Runner;
    use tether_core::dto::event::AppendEvents;
    use tether_core::dto::job::LeaseRenewal;
    use tether_core::dto::runner::RegisterRunner;

    #[derive(Default)]
    struct FakeJobs {
        queue: Mutex<VecDeque<Job>>,
        completed: Mutex<Vec<(Uuid, CompleteJob)>>,
        large: Mutex<Vec<(Uuid, Value)>>,
        cancel_on_renew: AtomicBool,
        conflict_on_renew: AtomicBool,
        /// Lease length granted on renewal, 60s when unset
        server_ttl: Mutex<Option<chrono::Duration>>,
        renewals: AtomicUsize,
    }

    #[async_trait]
    impl JobRepository for FakeJobs {
        async fn claim_next(&self) -> ClientResult<Option<Job>> {
            Ok(self.queue.lock().unwrap().pop_front())
        }

        async fn renew_lease(&self, _job_id: Uuid, _lease_id: Uuid) -> ClientResult<LeaseRenewal> {
            if self.conflict_on_renew.load(Ordering::SeqCst) {
                return Err(ClientError::api_error(409, "lease lost"));
            }
            self.renewals.fetch_add(1, Ordering::SeqCst);
            let ttl = self
                .server_ttl
                .lock()
                .unwrap()
                .unwrap_or(chrono::Duration::seconds(60));
            Ok(LeaseRenewal {
                lease_expires_at: Utc::now() + ttl,
                cancel_requested: self.cancel_on_renew.load(Ordering::SeqCst),
            })
        }

        async fn put_large_result(
            &self,
            run_id: Uuid,
            _lease_id: Uuid,
            result: Value,
        ) -> ClientResult<()> {
            self.large.lock().unwrap().push((run_id, result));
            Ok(())
        }

        async fn complete(&self, job_id: Uuid, completion: &CompleteJob) -> ClientResult<()> {
            self.completed
                .lock()
                .unwrap()
                .push((job_id, completion.clone()));
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeEvents {
        messages: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EventRepository for FakeEvents {
        async fn append_events(&self, _run_id: Uuid, batch: &AppendEvents) -> ClientResult<()> {
            let mut messages = self.messages.lock().unwrap();
            messages.extend(batch.events.iter().map(|e| e.message.clone()));
            Ok(())
        }
    }

    struct FakeRunners;

    #[async_trait]
    impl RunnerRepository for FakeRunners {
        async fn register(&self, _request: &RegisterRunner) -> ClientResult<Runner> {
            unimplemented!()
        }

        async fn send_heartbeat(&self) -> ClientResult<()> {
            Ok(())
        }
    }

    fn leased_job(kind: JobKind, args: &[&str]) -> Job {
        Job {
            id: Uuid::new_v4(),
            run_id: Uuid::new_v4(),
            project_id: "proj".to_string(),
            kind,
            title: "test".to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            target_runner_id: None,
            payload_meta: json!({}),
            sealed_input: None,
            awaiting_sealed_input: false,
            status: JobStatus::Leased,
            lease: Some(Lease {
                lease_id: Uuid::new_v4(),
                owner: "runner-1".to_string(),
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

    fn poller(jobs: Arc<FakeJobs>, events: Arc<FakeEvents>, lease_ttl: Duration) -> JobPoller {
        let mut config = Config::new("runner-1".to_string(), "http://localhost:1".to_string());
        config.lease_ttl = lease_ttl;
        config.job_timeout = Duration::from_secs(20);
        config.term_grace = Duration::from_secs(2);
        config.stream.flush_interval = Duration::from_millis(50);
        JobPoller::new(
            config,
            jobs,
            events,
            Arc::new(FakeRunners),
            Arc::new(Keyring::new()),
        )
    }

    async fn run_one(poller: &JobPoller) {
        let handle = poller
            .poll_once(&CancellationToken::new())
            .await
            .unwrap()
            .expect("a job to be claimed");
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_queue_claims_nothing() {
        let poller = poller(Arc::default(), Arc::default(), Duration::from_secs(60));
        assert!(poller.poll_once(&CancellationToken::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_successful_job_completes_with_lease() {
        let jobs = Arc::new(FakeJobs::default());
        let events = Arc::new(FakeEvents::default());
        let job = leased_job(JobKind::Custom, &["sh", "-c", "echo hello"]);
        let lease_id = job.lease.as_ref().unwrap().lease_id;
        jobs.queue.lock().unwrap().push_back(job.clone());

        run_one(&poller(Arc::clone(&jobs), Arc::clone(&events), Duration::from_secs(60))).await;

        let completed = jobs.completed.lock().unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].0, job.id);
        assert_eq!(completed[0].1.lease_id, lease_id);
        assert_eq!(completed[0].1.status, JobStatus::Succeeded);

        let messages = events.messages.lock().unwrap();
        assert!(messages.contains(&"hello".to_string()));
        assert_eq!(messages.last().map(String::as_str), Some("job succeeded"));
    }

    #[tokio::test]
    async fn test_failed_exit_reported() {
        let jobs = Arc::new(FakeJobs::default());
        jobs.queue
            .lock()
            .unwrap()
            .push_back(leased_job(JobKind::Custom, &["sh", "-c", "exit 7"]));

        run_one(&poller(Arc::clone(&jobs), Arc::default(), Duration::from_secs(60))).await;

        let completed = jobs.completed.lock().unwrap();
        assert_eq!(completed[0].1.status, JobStatus::Failed);
        assert_eq!(completed[0].1.result.as_ref().unwrap().exit_code, 7);
    }

    #[tokio::test]
    async fn test_export_uploads_large_result_first() {
        let jobs = Arc::new(FakeJobs::default());
        let job = leased_job(JobKind::Export, &["sh", "-c", r#"echo '{"rows": [1, 2]}'"#]);
        jobs.queue.lock().unwrap().push_back(job.clone());

        run_one(&poller(Arc::clone(&jobs), Arc::default(), Duration::from_secs(60))).await;

        let large = jobs.large.lock().unwrap();
        assert_eq!(large.len(), 1);
        assert_eq!(large[0], (job.run_id, json!({"rows": [1, 2]})));
        let completed = jobs.completed.lock().unwrap();
        assert_eq!(completed[0].1.status, JobStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_placeholder_without_input_fails_before_spawn() {
        let jobs = Arc::new(FakeJobs::default());
        let events = Arc::new(FakeEvents::default());
        jobs.queue
            .lock()
            .unwrap()
            .push_back(leased_job(JobKind::Custom, &["cat", "{{sealed_input_file}}"]));

        run_one(&poller(Arc::clone(&jobs), Arc::clone(&events), Duration::from_secs(60))).await;

        let completed = jobs.completed.lock().unwrap();
        assert_eq!(completed[0].1.status, JobStatus::Failed);
        let messages = events.messages.lock().unwrap();
        assert!(messages.iter().any(|m| m.starts_with("sealed input rejected")));
    }

    #[tokio::test]
    async fn test_cancel_requested_on_renewal_stops_command() {
        let jobs = Arc::new(FakeJobs::default());
        jobs.cancel_on_renew.store(true, Ordering::SeqCst);
        jobs.queue
            .lock()
            .unwrap()
            .push_back(leased_job(JobKind::Custom, &["sleep", "30"]));

        // Renewal every second
        run_one(&poller(Arc::clone(&jobs), Arc::default(), Duration::from_secs(3))).await;

        let completed = jobs.completed.lock().unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].1.status, JobStatus::Canceled);
    }

    #[tokio::test]
    async fn test_lost_lease_abandons_job() {
        let jobs = Arc::new(FakeJobs::default());
        jobs.conflict_on_renew.store(true, Ordering::SeqCst);
        jobs.queue
            .lock()
            .unwrap()
            .push_back(leased_job(JobKind::Custom, &["sleep", "30"]));

        run_one(&poller(Arc::clone(&jobs), Arc::default(), Duration::from_secs(3))).await;

        assert!(jobs.completed.lock().unwrap().is_empty());
    }

    #[test]
    fn test_renewal_delay_follows_server_expiry() {
        let now = Utc::now();
        let max = Duration::from_secs(20);

        let short = renewal_delay(now + chrono::Duration::seconds(9), now, max);
        assert_eq!(short, Duration::from_secs(3));

        let long = renewal_delay(now + chrono::Duration::seconds(600), now, max);
        assert_eq!(long, max);

        let gone = renewal_delay(now - chrono::Duration::seconds(5), now, max);
        assert_eq!(gone, MIN_RENEW_DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_server_ttl_renews_before_expiry() {
        let jobs = Arc::new(FakeJobs::default());
        *jobs.server_ttl.lock().unwrap() = Some(chrono::Duration::seconds(3));

        let stream = EventStream::start(
            Uuid::new_v4(),
            Default::default(),
            Redactor::new(),
            Arc::new(FakeEvents::default()),
        );
        let state = Arc::new(LeaseState::default());
        let cancel = CancellationToken::new();

        // Runner default allows 20s between renewals; the server grants 3s
        let renewer = tokio::spawn(renew_loop(
            jobs.clone(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            Utc::now() + chrono::Duration::seconds(3),
            Duration::from_secs(20),
            cancel.clone(),
            Arc::clone(&state),
            stream.emitter(),
        ));

        time::sleep(Duration::from_secs(5)).await;
        renewer.abort();

        assert!(jobs.renewals.load(Ordering::SeqCst) >= 4);
        assert!(!state.lost());
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_shutdown_stops_run_loop() {
        let poller = poller(Arc::default(), Arc::default(), Duration::from_secs(60));
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        poller.run(shutdown).await.unwrap();
        assert_eq!(poller.executor().active_runs(), 0);
    }
}

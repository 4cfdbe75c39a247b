//! In-memory store
//!
//! Same semantics as the PostgreSQL store, held in a single mutex. Used by
//! tests and by `STORE=memory` for local development. The mutex is never
//! held across an await point, so every trait method is one atomic step,
//! which is what gives lease acquisition its compare-and-set behaviour here.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tether_core::domain::event::{RunEvent, StoredEvent};
use tether_core::domain::job::{Job, JobResult, JobStatus, Lease, SealedInput};
use tether_core::domain::kind::JobKind;
use tether_core::domain::runner::Runner;
use tether_core::dto::status::StoreStatus;
use uuid::Uuid;

use super::{CancelOutcome, Store, StoreError, StoreResult};

#[derive(Default)]
struct State {
    jobs: HashMap<Uuid, Job>,
    runs: HashMap<Uuid, Uuid>,
    events: HashMap<Uuid, Vec<StoredEvent>>,
    batches: HashSet<(Uuid, Uuid)>,
    next_seq: i64,
    large_results: HashMap<Uuid, serde_json::Value>,
    runners: HashMap<String, Runner>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn window<F>(&self, now: DateTime<Utc>, limit: usize, pick: F) -> Vec<Job>
    where
        F: Fn(&Job) -> bool,
    {
        let state = self.lock();
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|job| job.is_leasable(now) && pick(job))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        jobs.truncate(limit);
        jobs
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn insert_job(&self, job: &Job) -> StoreResult<()> {
        let mut state = self.lock();
        if state.jobs.contains_key(&job.id) {
            return Err(StoreError::Conflict(format!("job {}", job.id)));
        }
        state.runs.insert(job.run_id, job.id);
        state.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn find_job(&self, id: Uuid) -> StoreResult<Option<Job>> {
        Ok(self.lock().jobs.get(&id).cloned())
    }

    async fn find_job_by_run(&self, run_id: Uuid) -> StoreResult<Option<Job>> {
        let state = self.lock();
        Ok(state
            .runs
            .get(&run_id)
            .and_then(|id| state.jobs.get(id))
            .cloned())
    }

    async fn attach_sealed_input(
        &self,
        job_id: Uuid,
        sealed: &SealedInput,
    ) -> StoreResult<bool> {
        let mut state = self.lock();
        match state.jobs.get_mut(&job_id) {
            Some(job) if job.awaiting_sealed_input && job.status == JobStatus::Queued => {
                job.sealed_input = Some(sealed.clone());
                job.awaiting_sealed_input = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn targeted_window(
        &self,
        runner_id: &str,
        kinds: &[JobKind],
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<Job>> {
        Ok(self.window(now, limit, |job| {
            job.target_runner_id.as_deref() == Some(runner_id) && kinds.contains(&job.kind)
        }))
    }

    async fn untargeted_window(
        &self,
        kinds: &[JobKind],
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<Job>> {
        Ok(self.window(now, limit, |job| {
            job.target_runner_id.is_none() && kinds.contains(&job.kind)
        }))
    }

    async fn try_acquire_lease(
        &self,
        job_id: Uuid,
        lease: &Lease,
        kinds: &[JobKind],
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Job>> {
        let mut state = self.lock();
        let Some(job) = state.jobs.get_mut(&job_id) else {
            return Ok(None);
        };
        if !job.is_leasable(now) || !job.eligible_for(&lease.owner) || !kinds.contains(&job.kind) {
            return Ok(None);
        }

        job.status = JobStatus::Leased;
        job.lease = Some(lease.clone());
        job.attempt += 1;
        job.started_at.get_or_insert(now);
        Ok(Some(job.clone()))
    }

    async fn renew_lease(
        &self,
        job_id: Uuid,
        lease_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<Option<Job>> {
        let mut state = self.lock();
        let Some(job) = state.jobs.get_mut(&job_id) else {
            return Ok(None);
        };
        if job.status != JobStatus::Leased {
            return Ok(None);
        }
        match job.lease.as_mut() {
            Some(lease) if lease.lease_id == lease_id => {
                lease.expires_at = expires_at;
                Ok(Some(job.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn complete_job(
        &self,
        job_id: Uuid,
        lease_id: Uuid,
        status: JobStatus,
        result: Option<&JobResult>,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut state = self.lock();
        let Some(job) = state.jobs.get_mut(&job_id) else {
            return Ok(false);
        };
        let holds_lease = job.status == JobStatus::Leased
            && job.lease.as_ref().is_some_and(|l| l.lease_id == lease_id);
        if !holds_lease {
            return Ok(false);
        }

        job.status = status;
        job.result = result.cloned();
        job.completed_at = Some(now);
        Ok(true)
    }

    async fn request_cancel(
        &self,
        job_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<CancelOutcome>> {
        let mut state = self.lock();
        let Some(job) = state.jobs.get_mut(&job_id) else {
            return Ok(None);
        };

        // A leased job whose holder stopped renewing is canceled outright.
        let lease_lapsed = job.lease.as_ref().is_none_or(|l| !l.is_active(now));
        let outcome = match job.status {
            JobStatus::Queued => cancel_now(job, now),
            JobStatus::Leased if lease_lapsed => cancel_now(job, now),
            JobStatus::Leased => {
                job.cancel_requested = true;
                CancelOutcome::Requested(job.clone())
            }
            _ => CancelOutcome::AlreadyTerminal(job.clone()),
        };
        Ok(Some(outcome))
    }

    async fn append_events(
        &self,
        run_id: Uuid,
        batch_id: Uuid,
        events: &[RunEvent],
    ) -> StoreResult<bool> {
        let mut state = self.lock();
        if !state.batches.insert((run_id, batch_id)) {
            return Ok(false);
        }

        let mut stored = Vec::with_capacity(events.len());
        for event in events {
            state.next_seq += 1;
            stored.push(StoredEvent {
                seq: state.next_seq,
                event: event.clone(),
            });
        }
        state.events.entry(run_id).or_default().extend(stored);
        Ok(true)
    }

    async fn list_events(
        &self,
        run_id: Uuid,
        after_seq: Option<i64>,
        limit: usize,
    ) -> StoreResult<Vec<StoredEvent>> {
        let state = self.lock();
        let after = after_seq.unwrap_or(0);
        Ok(state
            .events
            .get(&run_id)
            .map(|events| {
                events
                    .iter()
                    .filter(|e| e.seq > after)
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn tail_events(&self, run_id: Uuid, limit: usize) -> StoreResult<Vec<StoredEvent>> {
        let state = self.lock();
        Ok(state
            .events
            .get(&run_id)
            .map(|events| {
                let start = events.len().saturating_sub(limit);
                events[start..].to_vec()
            })
            .unwrap_or_default())
    }

    async fn put_large_result(
        &self,
        run_id: Uuid,
        result: &serde_json::Value,
    ) -> StoreResult<()> {
        self.lock().large_results.insert(run_id, result.clone());
        Ok(())
    }

    async fn get_large_result(&self, run_id: Uuid) -> StoreResult<Option<serde_json::Value>> {
        Ok(self.lock().large_results.get(&run_id).cloned())
    }

    async fn upsert_runner(&self, runner: &Runner) -> StoreResult<Runner> {
        let mut state = self.lock();
        let stored = match state.runners.get(&runner.id) {
            Some(existing) => Runner {
                registered_at: existing.registered_at,
                ..runner.clone()
            },
            None => runner.clone(),
        };
        state.runners.insert(stored.id.clone(), stored.clone());
        Ok(stored)
    }

    async fn find_runner(&self, id: &str) -> StoreResult<Option<Runner>> {
        Ok(self.lock().runners.get(id).cloned())
    }

    async fn list_runners(&self) -> StoreResult<Vec<Runner>> {
        let mut runners: Vec<Runner> = self.lock().runners.values().cloned().collect();
        runners.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(runners)
    }

    async fn touch_runner(&self, id: &str, now: DateTime<Utc>) -> StoreResult<bool> {
        match self.lock().runners.get_mut(id) {
            Some(runner) => {
                runner.last_heartbeat_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn schema_status(&self) -> StoreResult<StoreStatus> {
        Ok(StoreStatus {
            backend: self.backend().to_string(),
            ready: true,
            missing_tables: Vec::new(),
        })
    }
}

fn cancel_now(job: &mut Job, now: DateTime<Utc>) -> CancelOutcome {
    job.status = JobStatus::Canceled;
    job.cancel_requested = true;
    job.completed_at = Some(now);
    job.result = Some(JobResult::canceled());
    CancelOutcome::Canceled(job.clone())
}

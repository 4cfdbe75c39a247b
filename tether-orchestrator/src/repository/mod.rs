//! Repository Module
//!
//! Durable store behind the orchestrator. Every mutation that decides
//! ownership of a job (lease acquisition, renewal, completion, cancel) is a
//! single conditional write against the store, never an in-process lock,
//! because runners leasing the same queue live in different processes.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tether_core::domain::event::{RunEvent, StoredEvent};
use tether_core::domain::job::{Job, JobResult, JobStatus, Lease, SealedInput};
use tether_core::domain::kind::JobKind;
use tether_core::domain::runner::Runner;
use tether_core::dto::status::StoreStatus;
use uuid::Uuid;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Tables the orchestrator needs before it can serve requests.
pub const REQUIRED_TABLES: [&str; 5] = [
    "jobs",
    "run_events",
    "run_event_batches",
    "run_large_results",
    "runners",
];

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record already exists: {0}")]
    Conflict(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Outcome of a cancel request against a single job.
#[derive(Debug, Clone)]
pub enum CancelOutcome {
    /// Job was still queued and is now terminal.
    Canceled(Job),
    /// Job is leased; the holder observes the flag on its next renewal.
    Requested(Job),
    /// Job had already reached a terminal state.
    AlreadyTerminal(Job),
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Short backend name reported by the store status probe.
    fn backend(&self) -> &'static str;

    // =========================================================================
    // Jobs
    // =========================================================================

    /// Insert a freshly enqueued job. Fails with `Conflict` on a duplicate id.
    async fn insert_job(&self, job: &Job) -> StoreResult<()>;

    async fn find_job(&self, id: Uuid) -> StoreResult<Option<Job>>;

    async fn find_job_by_run(&self, run_id: Uuid) -> StoreResult<Option<Job>>;

    /// Attach sealed input to a queued job that is still awaiting it.
    /// Returns false when the job is not in that state anymore.
    async fn attach_sealed_input(&self, job_id: Uuid, sealed: &SealedInput)
    -> StoreResult<bool>;

    /// Leasable jobs of one of `kinds` targeted at `runner_id`, oldest first.
    async fn targeted_window(
        &self,
        runner_id: &str,
        kinds: &[JobKind],
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<Job>>;

    /// Leasable jobs of one of `kinds` without a target runner, oldest first.
    async fn untargeted_window(
        &self,
        kinds: &[JobKind],
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<Job>>;

    /// Compare-and-set lease acquisition.
    ///
    /// Succeeds only if, at write time, the job is still leasable for the
    /// lease owner: queued or holding an expired lease, not awaiting sealed
    /// input, not cancel-requested, of one of `kinds`, and either untargeted
    /// or targeted at the owner. Returns the leased job with its attempt
    /// counter bumped.
    async fn try_acquire_lease(
        &self,
        job_id: Uuid,
        lease: &Lease,
        kinds: &[JobKind],
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Job>>;

    /// Extend a lease still held by `lease_id`. Returns the updated job, or
    /// `None` when the lease was lost.
    async fn renew_lease(
        &self,
        job_id: Uuid,
        lease_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<Option<Job>>;

    /// Move a leased job to a terminal status. Only the current lease holder
    /// may do this; returns false otherwise.
    async fn complete_job(
        &self,
        job_id: Uuid,
        lease_id: Uuid,
        status: JobStatus,
        result: Option<&JobResult>,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;

    async fn request_cancel(&self, job_id: Uuid, now: DateTime<Utc>)
    -> StoreResult<Option<CancelOutcome>>;

    // =========================================================================
    // Run events and results
    // =========================================================================

    /// Append a batch of events for a run. A batch id that was already
    /// applied is ignored and the call returns false.
    async fn append_events(
        &self,
        run_id: Uuid,
        batch_id: Uuid,
        events: &[RunEvent],
    ) -> StoreResult<bool>;

    async fn list_events(
        &self,
        run_id: Uuid,
        after_seq: Option<i64>,
        limit: usize,
    ) -> StoreResult<Vec<StoredEvent>>;

    /// The newest `limit` events of a run, oldest first
    async fn tail_events(&self, run_id: Uuid, limit: usize) -> StoreResult<Vec<StoredEvent>>;

    async fn put_large_result(&self, run_id: Uuid, result: &serde_json::Value)
    -> StoreResult<()>;

    async fn get_large_result(&self, run_id: Uuid) -> StoreResult<Option<serde_json::Value>>;

    // =========================================================================
    // Runners
    // =========================================================================

    async fn upsert_runner(&self, runner: &Runner) -> StoreResult<Runner>;

    async fn find_runner(&self, id: &str) -> StoreResult<Option<Runner>>;

    async fn list_runners(&self) -> StoreResult<Vec<Runner>>;

    async fn touch_runner(&self, id: &str, now: DateTime<Utc>) -> StoreResult<bool>;

    // =========================================================================
    // Schema
    // =========================================================================

    async fn schema_status(&self) -> StoreResult<StoreStatus>;
}

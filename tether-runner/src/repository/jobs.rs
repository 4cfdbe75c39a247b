//! Jobs repository
//!
//! Handles the runner's side of the lease lifecycle:
//! - Claiming the next job
//! - Renewing the lease while the command runs
//! - Uploading large results
//! - Completing the job with its terminal status

use std::sync::Arc;

use async_trait::async_trait;
use tether_client::{OrchestratorClient, Result};
use tether_core::domain::job::Job;
use tether_core::dto::job::{CompleteJob, LargeResultUpload, LeaseRenewal};
use uuid::Uuid;

/// Repository trait for job-related operations with the orchestrator
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Leases the next job this runner may run, `None` when the queue is empty
    async fn claim_next(&self) -> Result<Option<Job>>;

    /// Extends a held lease; a conflict means the lease was lost
    async fn renew_lease(&self, job_id: Uuid, lease_id: Uuid) -> Result<LeaseRenewal>;

    /// Stores the result of an `export` job
    async fn put_large_result(
        &self,
        run_id: Uuid,
        lease_id: Uuid,
        result: serde_json::Value,
    ) -> Result<()>;

    /// Reports the terminal status of a leased job
    async fn complete(&self, job_id: Uuid, completion: &CompleteJob) -> Result<()>;
}

/// HTTP implementation of JobRepository
pub struct HttpJobRepository {
    client: Arc<OrchestratorClient>,
    runner_id: String,
}

impl HttpJobRepository {
    /// # Arguments
    /// * `client` - Shared orchestrator client
    /// * `runner_id` - Unique identifier for this runner
    pub fn new(client: Arc<OrchestratorClient>, runner_id: String) -> Self {
        Self { client, runner_id }
    }
}

#[async_trait]
impl JobRepository for HttpJobRepository {
    async fn claim_next(&self) -> Result<Option<Job>> {
        self.client.claim_job(&self.runner_id).await
    }

    async fn renew_lease(&self, job_id: Uuid, lease_id: Uuid) -> Result<LeaseRenewal> {
        self.client.renew_lease(job_id, lease_id).await
    }

    async fn put_large_result(
        &self,
        run_id: Uuid,
        lease_id: Uuid,
        result: serde_json::Value,
    ) -> Result<()> {
        self.client
            .put_large_result(run_id, &LargeResultUpload { lease_id, result })
            .await
    }

    async fn complete(&self, job_id: Uuid, completion: &CompleteJob) -> Result<()> {
        self.client.complete_job(job_id, completion).await
    }
}

//! Job submission and lease lifecycle endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use tether_core::domain::job::{Job, SealedInput};
use tether_core::dto::job::{
    ClaimRequest, ClaimResponse, CompleteJob, EnqueueJob, EnqueuedJob, FinalizeSealedInput,
    LeaseRenewal, RenewLease,
};
use uuid::Uuid;

impl OrchestratorClient {
    // =============================================================================
    // Submission
    // =============================================================================

    /// Queue a new job
    ///
    /// # Arguments
    /// * `req` - The enqueue request
    ///
    /// # Returns
    /// The job id and the run id to follow
    pub async fn enqueue_job(&self, req: EnqueueJob) -> Result<EnqueuedJob> {
        let url = format!("{}/job/enqueue", self.base_url);
        let response = self.client.post(&url).json(&req).send().await?;

        self.handle_response(response).await
    }

    /// Attach sealed input to a job enqueued with `expect_sealed_input`
    ///
    /// # Arguments
    /// * `job_id` - The job awaiting sealed input
    /// * `sealed_input` - Envelope and its metadata
    pub async fn finalize_sealed_input(
        &self,
        job_id: Uuid,
        sealed_input: SealedInput,
    ) -> Result<()> {
        let url = format!("{}/job/{}/sealed-input", self.base_url, job_id);
        let response = self
            .client
            .post(&url)
            .json(&FinalizeSealedInput { sealed_input })
            .send()
            .await?;

        self.handle_empty_response(response).await
    }

    /// Get a job by ID
    pub async fn get_job(&self, job_id: Uuid) -> Result<Job> {
        let url = format!("{}/job/{}", self.base_url, job_id);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    // =============================================================================
    // Lease lifecycle (runner-specific)
    // =============================================================================

    /// Lease the next job this runner may run
    ///
    /// # Arguments
    /// * `runner_id` - The ID of the runner asking for work
    ///
    /// # Returns
    /// The leased job, or `None` when nothing is available
    pub async fn claim_job(&self, runner_id: &str) -> Result<Option<Job>> {
        let url = format!("{}/job/claim", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&ClaimRequest {
                runner_id: runner_id.to_string(),
            })
            .send()
            .await?;

        let claim: ClaimResponse = self.handle_response(response).await?;
        Ok(claim.job)
    }

    /// Extend a lease held by this runner
    ///
    /// Fails with a 409 once the lease has been lost.
    pub async fn renew_lease(&self, job_id: Uuid, lease_id: Uuid) -> Result<LeaseRenewal> {
        let url = format!("{}/job/{}/renew", self.base_url, job_id);
        let response = self
            .client
            .post(&url)
            .json(&RenewLease { lease_id })
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Report the terminal status of a leased job
    pub async fn complete_job(&self, job_id: Uuid, req: &CompleteJob) -> Result<()> {
        let url = format!("{}/job/{}/complete", self.base_url, job_id);
        let response = self.client.post(&url).json(req).send().await?;

        self.handle_empty_response(response).await
    }
}

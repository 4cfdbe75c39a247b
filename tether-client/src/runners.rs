//! Runner-related API endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use tether_core::domain::runner::Runner;
use tether_core::dto::runner::{RegisterRunner, RunnerSummary};

impl OrchestratorClient {
    // =============================================================================
    // Runner Registration & Lifecycle
    // =============================================================================

    /// Register a runner with the orchestrator
    ///
    /// # Arguments
    /// * `req` - Runner id, capabilities and optional public key
    ///
    /// # Returns
    /// The registered runner, with the key id the server derived
    pub async fn register_runner(&self, req: &RegisterRunner) -> Result<Runner> {
        let url = format!("{}/runner/register", self.base_url);
        let response = self.client.post(&url).json(req).send().await?;

        self.handle_response(response).await
    }

    /// Send a heartbeat to the orchestrator
    ///
    /// # Arguments
    /// * `runner_id` - The ID of the runner sending the heartbeat
    pub async fn send_heartbeat(&self, runner_id: &str) -> Result<()> {
        let url = format!("{}/runner/{}/heartbeat", self.base_url, runner_id);
        let response = self.client.post(&url).send().await?;

        self.handle_empty_response(response).await
    }

    /// List all registered runners
    pub async fn list_runners(&self) -> Result<Vec<RunnerSummary>> {
        let url = format!("{}/runner/list", self.base_url);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Get a runner by ID, including its public key
    pub async fn get_runner(&self, runner_id: &str) -> Result<Runner> {
        let url = format!("{}/runner/{}", self.base_url, runner_id);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }
}

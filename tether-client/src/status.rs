//! Read-side status probes

use crate::OrchestratorClient;
use crate::error::Result;
use tether_core::dto::status::{RepoStatus, StoreStatus};

impl OrchestratorClient {
    /// Git status of the orchestrator's configured repository
    pub async fn repo_status(&self) -> Result<RepoStatus> {
        let url = format!("{}/status/repo", self.base_url);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Whether the orchestrator's store has its schema in place
    pub async fn store_status(&self) -> Result<StoreStatus> {
        let url = format!("{}/status/store", self.base_url);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }
}

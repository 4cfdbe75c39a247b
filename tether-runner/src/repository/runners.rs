//! Runners repository
//!
//! Handles communication with the orchestrator for runner-related operations:
//! - Registering capabilities and the sealing public key
//! - Sending heartbeats to maintain runner status

use std::sync::Arc;

use async_trait::async_trait;
use tether_client::{OrchestratorClient, Result};
use tether_core::domain::runner::Runner;
use tether_core::dto::runner::RegisterRunner;

/// Repository trait for runner-related operations with the orchestrator
#[async_trait]
pub trait RunnerRepository: Send + Sync {
    /// Registers this runner with the orchestrator
    ///
    /// Called on startup. Re-registering replaces the capabilities and the
    /// published key.
    async fn register(&self, request: &RegisterRunner) -> Result<Runner>;

    /// Sends a heartbeat to the orchestrator
    ///
    /// This keeps the runner marked as "alive" in the orchestrator's registry.
    async fn send_heartbeat(&self) -> Result<()>;
}

/// HTTP implementation of RunnerRepository
pub struct HttpRunnerRepository {
    client: Arc<OrchestratorClient>,
    runner_id: String,
}

impl HttpRunnerRepository {
    pub fn new(client: Arc<OrchestratorClient>, runner_id: String) -> Self {
        Self { client, runner_id }
    }
}

#[async_trait]
impl RunnerRepository for HttpRunnerRepository {
    async fn register(&self, request: &RegisterRunner) -> Result<Runner> {
        self.client.register_runner(request).await
    }

    async fn send_heartbeat(&self) -> Result<()> {
        self.client.send_heartbeat(&self.runner_id).await
    }
}

//! Events repository
//!
//! Appends event batches to a run. Batching, retries and backpressure are
//! handled by the event stream service.

use std::sync::Arc;

use async_trait::async_trait;
use tether_client::{OrchestratorClient, Result};
use tether_core::dto::event::AppendEvents;
use uuid::Uuid;

/// Repository trait for run event appends
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Appends one batch; replaying the same `batch_id` is a no-op server-side
    async fn append_events(&self, run_id: Uuid, batch: &AppendEvents) -> Result<()>;
}

/// HTTP implementation of EventRepository
pub struct HttpEventRepository {
    client: Arc<OrchestratorClient>,
}

impl HttpEventRepository {
    pub fn new(client: Arc<OrchestratorClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EventRepository for HttpEventRepository {
    async fn append_events(&self, run_id: Uuid, batch: &AppendEvents) -> Result<()> {
        if batch.events.is_empty() {
            return Ok(());
        }

        self.client.append_events(run_id, batch).await
    }
}

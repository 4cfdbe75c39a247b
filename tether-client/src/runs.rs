//! Run status, cancel, event and result endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use tether_core::domain::event::StoredEvent;
use tether_core::domain::job::JobResult;
use tether_core::dto::event::{AppendEvents, EventPage};
use tether_core::dto::job::LargeResultUpload;
use tether_core::dto::status::RunStatusView;
use uuid::Uuid;

impl OrchestratorClient {
    // =============================================================================
    // Status
    // =============================================================================

    /// Get the current status of a run
    pub async fn run_status(&self, run_id: Uuid) -> Result<RunStatusView> {
        let url = format!("{}/run/{}/status", self.base_url, run_id);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Cancel a run
    ///
    /// Queued runs end immediately; a leased run is flagged and the runner
    /// stops it on its next lease renewal.
    pub async fn cancel_run(&self, run_id: Uuid) -> Result<RunStatusView> {
        let url = format!("{}/run/{}/cancel", self.base_url, run_id);
        let response = self.client.post(&url).send().await?;

        self.handle_response(response).await
    }

    // =============================================================================
    // Events
    // =============================================================================

    /// Append a batch of events to a run
    ///
    /// Retrying with the same `batch_id` is safe.
    pub async fn append_events(&self, run_id: Uuid, batch: &AppendEvents) -> Result<()> {
        let url = format!("{}/run/{}/events", self.base_url, run_id);
        let response = self.client.post(&url).json(batch).send().await?;

        self.handle_empty_response(response).await
    }

    /// Page through a run's events
    ///
    /// # Arguments
    /// * `run_id` - The run to read
    /// * `after_seq` - Only return events after this sequence number
    /// * `limit` - Page size
    pub async fn list_events(
        &self,
        run_id: Uuid,
        after_seq: Option<i64>,
        limit: Option<usize>,
    ) -> Result<EventPage> {
        let url = format!("{}/run/{}/events", self.base_url, run_id);
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(after) = after_seq {
            query.push(("after_seq", after.to_string()));
        }
        if let Some(limit) = limit {
            query.push(("limit", limit.to_string()));
        }
        let response = self.client.get(&url).query(&query).send().await?;

        self.handle_response(response).await
    }

    /// The newest `limit` events of a run, oldest first
    pub async fn tail_events(&self, run_id: Uuid, limit: usize) -> Result<Vec<StoredEvent>> {
        let url = format!("{}/run/{}/events/tail", self.base_url, run_id);
        let response = self
            .client
            .get(&url)
            .query(&[("limit", limit)])
            .send()
            .await?;

        self.handle_response(response).await
    }

    // =============================================================================
    // Results
    // =============================================================================

    /// Inline result of a finished run, if any
    pub async fn get_result(&self, run_id: Uuid) -> Result<Option<JobResult>> {
        let url = format!("{}/run/{}/result", self.base_url, run_id);
        let response = self.client.get(&url).send().await?;

        self.handle_optional_response(response).await
    }

    /// Upload the large result of a leased export job
    pub async fn put_large_result(&self, run_id: Uuid, upload: &LargeResultUpload) -> Result<()> {
        let url = format!("{}/run/{}/result/large", self.base_url, run_id);
        let response = self.client.post(&url).json(upload).send().await?;

        self.handle_empty_response(response).await
    }

    /// Large result of a run, if one was stored
    pub async fn get_large_result(&self, run_id: Uuid) -> Result<Option<serde_json::Value>> {
        let url = format!("{}/run/{}/result/large", self.base_url, run_id);
        let response = self.client.get(&url).send().await?;

        self.handle_optional_response(response).await
    }
}

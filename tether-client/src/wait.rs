//! Terminal status waiter
//!
//! Polls a run's status at a fixed interval until it reaches a terminal
//! state or a deadline passes. Waiting is read-side only: the waiter and
//! the runner executing the job share nothing but the orchestrator's store,
//! and abandoning a wait does not affect the run.

use std::time::Duration;

use async_trait::async_trait;
use tether_core::domain::event::{EventLevel, StoredEvent};
use tether_core::domain::job::JobStatus;
use tether_core::dto::status::RunStatusView;
use tokio::time::Instant;
use uuid::Uuid;

use crate::OrchestratorClient;
use crate::error::Result;

/// Number of trailing events inspected for a failure message
const RECENT_EVENTS: usize = 50;

/// Where the waiter reads run status from
#[async_trait]
pub trait RunStatusSource: Send + Sync {
    async fn run_status(&self, run_id: Uuid) -> Result<RunStatusView>;

    /// The last `limit` events of a run, oldest first
    async fn recent_events(&self, run_id: Uuid, limit: usize) -> Result<Vec<StoredEvent>>;
}

#[async_trait]
impl RunStatusSource for OrchestratorClient {
    async fn run_status(&self, run_id: Uuid) -> Result<RunStatusView> {
        OrchestratorClient::run_status(self, run_id).await
    }

    async fn recent_events(&self, run_id: Uuid, limit: usize) -> Result<Vec<StoredEvent>> {
        self.tail_events(run_id, limit).await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WaitOptions {
    /// Minimum spacing between two status reads
    pub interval: Duration,
    /// Give up after this long
    pub timeout: Duration,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            timeout: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone)]
pub enum WaitOutcome {
    /// The run reached a terminal status
    Finished {
        status: RunStatusView,
        /// Failure reason, preferring the run's most recent error event
        error_message: Option<String>,
    },
    /// The deadline passed while the run was still queued or running
    StillRunning { last: Option<RunStatusView> },
}

impl WaitOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, WaitOutcome::Finished { status, .. } if status.status == JobStatus::Succeeded)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WaitOutcome::Finished { .. })
    }
}

/// Wait for `run_id` to reach a terminal status.
///
/// Status reads start at least `interval` apart and none is issued once the
/// next one would begin after the deadline, so the call returns no later
/// than `timeout` after it started. Recovering the failure message of a
/// terminal run is bounded by the same deadline. Transient read failures
/// are logged and retried on the next tick; client errors such as an
/// unknown run end the wait immediately.
pub async fn wait_for_terminal<S>(source: &S, run_id: Uuid, options: WaitOptions) -> Result<WaitOutcome>
where
    S: RunStatusSource + ?Sized,
{
    let deadline = Instant::now() + options.timeout;
    let mut last: Option<RunStatusView> = None;

    loop {
        let polled_at = Instant::now();

        match tokio::time::timeout_at(deadline, source.run_status(run_id)).await {
            Err(_) => return Ok(WaitOutcome::StillRunning { last }),
            Ok(Ok(view)) if view.status.is_terminal() => {
                let error_message = if view.status == JobStatus::Succeeded {
                    None
                } else {
                    failure_message(source, &view, deadline).await
                };
                return Ok(WaitOutcome::Finished {
                    status: view,
                    error_message,
                });
            }
            Ok(Ok(view)) => {
                tracing::debug!("Run {} is {} (attempt {})", run_id, view.status, view.attempt);
                last = Some(view);
            }
            Ok(Err(e)) if e.is_transient() => {
                tracing::warn!("Failed to read status of run {}: {}", run_id, e);
            }
            Ok(Err(e)) => return Err(e),
        }

        let next_poll = polled_at + options.interval;
        if next_poll >= deadline {
            tokio::time::sleep_until(deadline).await;
            return Ok(WaitOutcome::StillRunning { last });
        }
        tokio::time::sleep_until(next_poll).await;
    }
}

async fn failure_message<S>(source: &S, view: &RunStatusView, deadline: Instant) -> Option<String>
where
    S: RunStatusSource + ?Sized,
{
    match tokio::time::timeout_at(deadline, source.recent_events(view.run_id, RECENT_EVENTS)).await
    {
        Ok(Ok(events)) => latest_error(&events).or_else(|| view.error_message.clone()),
        Ok(Err(e)) => {
            tracing::warn!("Failed to read events of run {}: {}", view.run_id, e);
            view.error_message.clone()
        }
        Err(_) => {
            tracing::warn!("Deadline passed reading events of run {}", view.run_id);
            view.error_message.clone()
        }
    }
}

fn latest_error(events: &[StoredEvent]) -> Option<String> {
    events
        .iter()
        .rev()
        .find(|e| e.event.level == EventLevel::Error)
        .map(|e| e.event.message.clone())
}

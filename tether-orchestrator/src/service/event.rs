//! Event Service
//!
//! Append and page through run event logs. Appends are keyed by a batch id
//! chosen by the runner, so a flush retried after a lost response is applied
//! once.

use tether_core::domain::event::{RunEvent, StoredEvent};
use tether_core::dto::event::{AppendEvents, EventPage};
use uuid::Uuid;

use crate::repository::{Store, StoreError};

pub const MAX_BATCH_SIZE: usize = 1000;
pub const MAX_MESSAGE_LENGTH: usize = 64 * 1024;
pub const MAX_PAGE_SIZE: usize = 1000;
pub const DEFAULT_PAGE_SIZE: usize = 200;

/// Service error type
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("Run {0} not found")]
    RunNotFound(Uuid),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, EventError>;

/// Append a batch of events to a run. Returns false when the batch had
/// already been applied.
pub async fn append_events(store: &dyn Store, run_id: Uuid, req: AppendEvents) -> Result<bool> {
    validate_events(&req.events)?;

    if store.find_job_by_run(run_id).await?.is_none() {
        return Err(EventError::RunNotFound(run_id));
    }

    if req.events.is_empty() {
        return Ok(true);
    }

    let applied = store
        .append_events(run_id, req.batch_id, &req.events)
        .await?;

    if applied {
        tracing::debug!(
            "Appended {} events to run {} (batch {})",
            req.events.len(),
            run_id,
            req.batch_id
        );
    } else {
        tracing::debug!("Batch {} for run {} already applied", req.batch_id, run_id);
    }

    Ok(applied)
}

/// Events of a run with `seq > after_seq`, in emission order.
pub async fn list_events(
    store: &dyn Store,
    run_id: Uuid,
    after_seq: Option<i64>,
    limit: Option<usize>,
) -> Result<EventPage> {
    if store.find_job_by_run(run_id).await?.is_none() {
        return Err(EventError::RunNotFound(run_id));
    }

    let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let events = store.list_events(run_id, after_seq, limit).await?;

    let next_seq = if events.len() == limit {
        events.last().map(|e| e.seq)
    } else {
        None
    };

    Ok(EventPage { events, next_seq })
}

/// The newest `limit` events of a run, oldest first.
pub async fn tail_events(
    store: &dyn Store,
    run_id: Uuid,
    limit: Option<usize>,
) -> Result<Vec<StoredEvent>> {
    if store.find_job_by_run(run_id).await?.is_none() {
        return Err(EventError::RunNotFound(run_id));
    }

    let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    Ok(store.tail_events(run_id, limit).await?)
}

// =============================================================================
// Validation
// =============================================================================

fn validate_events(events: &[RunEvent]) -> Result<()> {
    if events.len() > MAX_BATCH_SIZE {
        return Err(EventError::Validation(format!(
            "Too many events in batch (max: {})",
            MAX_BATCH_SIZE
        )));
    }

    for event in events {
        if event.message.len() > MAX_MESSAGE_LENGTH {
            return Err(EventError::Validation(format!(
                "Event message too long (max: {} bytes)",
                MAX_MESSAGE_LENGTH
            )));
        }
    }

    Ok(())
}

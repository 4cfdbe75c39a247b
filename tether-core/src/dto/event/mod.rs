//! Run event DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::event::{RunEvent, StoredEvent};

/// Batch of events appended by a runner
///
/// `batch_id` makes the append idempotent: a retried batch with the same id
/// is stored once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEvents {
    pub batch_id: Uuid,
    pub events: Vec<RunEvent>,
}

/// A page of stored events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventPage {
    pub events: Vec<StoredEvent>,
    /// Pass as `after_seq` to continue reading
    pub next_seq: Option<i64>,
}

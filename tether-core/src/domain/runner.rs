//! Runner domain model
//!
//! Represents a runner agent that leases and executes jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A runner that can execute jobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Runner {
    /// Unique identifier for the runner
    pub id: String,

    /// Capability strings advertised at registration
    pub capabilities: Vec<String>,

    /// PEM-encoded RSA public key used to seal inputs for this runner
    pub public_key_pem: Option<String>,

    /// Identifier of `public_key_pem`, carried in every sealed envelope
    pub key_id: Option<String>,

    /// When this runner was first registered
    pub registered_at: DateTime<Utc>,

    /// Last time this runner sent a heartbeat
    pub last_heartbeat_at: DateTime<Utc>,
}

impl Runner {
    /// Whether the runner has been heard from within `window`
    pub fn is_online(&self, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        now - self.last_heartbeat_at <= window
    }
}

//! Runner DTOs
//!
//! Data transfer objects for runner-related operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::runner::Runner;

/// Request to register a runner with the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRunner {
    /// Unique identifier for the runner
    pub runner_id: String,

    /// List of capabilities this runner supports
    pub capabilities: Vec<String>,

    /// Public half of the runner's sealing keypair
    #[serde(default)]
    pub public_key_pem: Option<String>,

    /// Identifier the runner derived for `public_key_pem`
    #[serde(default)]
    pub key_id: Option<String>,
}

/// Summary information about a runner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerSummary {
    pub id: String,
    pub capability_count: usize,
    pub key_id: Option<String>,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
}

impl From<Runner> for RunnerSummary {
    fn from(runner: Runner) -> Self {
        RunnerSummary {
            id: runner.id,
            capability_count: runner.capabilities.len(),
            key_id: runner.key_id,
            registered_at: runner.registered_at,
            last_heartbeat_at: runner.last_heartbeat_at,
        }
    }
}

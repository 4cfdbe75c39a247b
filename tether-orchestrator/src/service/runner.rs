//! Runner Service
//!
//! Registration and heartbeat for runner agents. A runner publishing a
//! public key must also publish the key id derived from it; the server
//! recomputes the id rather than trusting it.

use chrono::Utc;
use tether_core::domain::runner::Runner;
use tether_core::dto::runner::RegisterRunner;
use tether_envelope::RecipientKey;

use crate::repository::{Store, StoreError};

/// Service error type
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("Runner {0} not found")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, RunnerError>;

/// Register a runner with the orchestrator
///
/// Re-registering replaces capabilities and key material and refreshes the
/// heartbeat; the original registration time is kept.
pub async fn register_runner(store: &dyn Store, req: RegisterRunner) -> Result<Runner> {
    let key_id = validate_register_request(&req)?;

    let now = Utc::now();
    let runner = Runner {
        id: req.runner_id,
        capabilities: req.capabilities,
        public_key_pem: req.public_key_pem,
        key_id,
        registered_at: now,
        last_heartbeat_at: now,
    };

    let runner = store.upsert_runner(&runner).await?;

    tracing::info!(
        "Runner registered: {} (key {})",
        runner.id,
        runner.key_id.as_deref().unwrap_or("none")
    );

    Ok(runner)
}

/// Update heartbeat for a runner
pub async fn update_heartbeat(store: &dyn Store, runner_id: &str) -> Result<()> {
    if !store.touch_runner(runner_id, Utc::now()).await? {
        return Err(RunnerError::NotFound(runner_id.to_string()));
    }

    tracing::debug!("Heartbeat received from runner: {}", runner_id);

    Ok(())
}

pub async fn get_runner(store: &dyn Store, id: &str) -> Result<Runner> {
    store
        .find_runner(id)
        .await?
        .ok_or_else(|| RunnerError::NotFound(id.to_string()))
}

pub async fn list_runners(store: &dyn Store) -> Result<Vec<Runner>> {
    Ok(store.list_runners().await?)
}

// =============================================================================
// Validation
// =============================================================================

/// Returns the key id the runner will be stored with.
fn validate_register_request(req: &RegisterRunner) -> Result<Option<String>> {
    if req.runner_id.trim().is_empty() {
        return Err(RunnerError::Validation("runner_id cannot be empty".to_string()));
    }

    if req.runner_id.len() > 255 {
        return Err(RunnerError::Validation(
            "runner_id cannot exceed 255 characters".to_string(),
        ));
    }

    match (&req.public_key_pem, &req.key_id) {
        (None, None) => Ok(None),
        (Some(pem), claimed) => {
            let recipient = RecipientKey::from_pem(pem)
                .map_err(|e| RunnerError::Validation(format!("invalid public key: {}", e)))?;

            if let Some(claimed) = claimed {
                if claimed != &recipient.key_id {
                    return Err(RunnerError::Validation(format!(
                        "key_id {} does not match public key ({})",
                        claimed, recipient.key_id
                    )));
                }
            }

            Ok(Some(recipient.key_id))
        }
        (None, Some(_)) => Err(RunnerError::Validation(
            "key_id given without public_key_pem".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(runner_id: &str) -> RegisterRunner {
        RegisterRunner {
            runner_id: runner_id.to_string(),
            capabilities: vec!["process.run".to_string()],
            public_key_pem: None,
            key_id: None,
        }
    }

    #[test]
    fn test_validate_runner_id() {
        assert!(validate_register_request(&request("runner-1")).is_ok());
        assert!(validate_register_request(&request("")).is_err());
        assert!(validate_register_request(&request(&"a".repeat(256))).is_err());
    }

    #[test]
    fn test_key_id_without_key_rejected() {
        let mut req = request("runner-1");
        req.key_id = Some("abc".to_string());
        assert!(validate_register_request(&req).is_err());
    }

    #[test]
    fn test_garbage_pem_rejected() {
        let mut req = request("runner-1");
        req.public_key_pem = Some("not a key".to_string());
        assert!(validate_register_request(&req).is_err());
    }
}

//! Tether HTTP Client
//!
//! A type-safe HTTP client for the Tether orchestrator API, shared by the
//! CLI and the runner agent, plus a poll-based waiter for terminal run
//! status.
//!
//! # Example
//!
//! ```no_run
//! use tether_client::OrchestratorClient;
//! use tether_core::domain::kind::JobKind;
//! use tether_core::dto::job::EnqueueJob;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = OrchestratorClient::new("http://localhost:8080");
//!
//!     let queued = client.enqueue_job(EnqueueJob {
//!         job_id: None,
//!         project_id: "demo".to_string(),
//!         kind: JobKind::Custom,
//!         title: "uptime".to_string(),
//!         args: vec!["uptime".to_string()],
//!         target_runner_id: None,
//!         payload_meta: serde_json::json!({}),
//!         sealed_input: None,
//!         expect_sealed_input: false,
//!     }).await?;
//!
//!     println!("Queued run: {}", queued.run_id);
//!     Ok(())
//! }
//! ```

pub mod error;
mod jobs;
mod runners;
mod runs;
mod status;
pub mod wait;

// Re-export commonly used types
pub use error::{ClientError, Result};
pub use wait::{RunStatusSource, WaitOptions, WaitOutcome, wait_for_terminal};

use reqwest::Client;
use serde::de::DeserializeOwned;

/// HTTP client for the Tether orchestrator API
///
/// Methods are grouped by area:
/// - Job submission and the runner's lease lifecycle
/// - Run status, cancel, events and results
/// - Runner registration and heartbeats
/// - Read-side status probes
#[derive(Debug, Clone)]
pub struct OrchestratorClient {
    /// Base URL of the orchestrator (e.g., "http://localhost:8080")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl OrchestratorClient {
    /// Create a new orchestrator client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the orchestrator API (e.g., "http://localhost:8080")
    ///
    /// # Example
    /// ```
    /// use tether_client::OrchestratorClient;
    ///
    /// let client = OrchestratorClient::new("http://localhost:8080");
    /// ```
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new orchestrator client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the orchestrator API
    /// * `client` - A configured reqwest Client
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the base URL of the orchestrator
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Handle an API response and deserialize JSON
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }

    /// Like [`handle_response`](Self::handle_response), mapping 404 to `None`
    async fn handle_optional_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<Option<T>> {
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        self.handle_response(response).await.map(Some)
    }

    /// Handle an API response that returns no content
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = OrchestratorClient::new("http://localhost:8080");
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = OrchestratorClient::new("http://localhost:8080/");
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_client_with_custom_client() {
        let http_client = Client::new();
        let client = OrchestratorClient::with_client("http://localhost:8080", http_client);
        assert_eq!(client.base_url(), "http://localhost:8080");
    }
}

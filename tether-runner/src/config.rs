//! Runner configuration
//!
//! Defines all configurable parameters for the runner: orchestrator
//! connection, polling and lease timing, command timeouts, event stream caps
//! and the sealing key location.

use std::path::PathBuf;
use std::time::Duration;

use crate::service::event_stream::StreamLimits;

/// Runner configuration
///
/// All timeouts and intervals are configurable to allow tuning
/// for different deployment scenarios (dev vs prod, fast vs slow networks).
#[derive(Debug, Clone)]
pub struct Config {
    /// Unique identifier for this runner instance
    pub runner_id: String,

    /// Orchestrator base URL (e.g., "http://localhost:8080")
    pub orchestrator_url: String,

    /// How often to ask the orchestrator for work
    pub poll_interval: Duration,

    /// How often to send a heartbeat
    pub heartbeat_interval: Duration,

    /// Longest lease the runner assumes between renewals. The server's own
    /// expiry shortens the cadence, never lengthens it.
    pub lease_ttl: Duration,

    /// Hard wall-clock limit for a single command
    pub job_timeout: Duration,

    /// Time between SIGTERM and SIGKILL
    pub term_grace: Duration,

    /// PKCS#8 PEM private key, generated on first start
    pub key_path: PathBuf,

    pub key_bits: usize,

    /// Max parallel jobs the runner can handle
    pub max_parallel_jobs: usize,

    pub stream: StreamLimits,

    /// Client used for `ssh` jobs
    pub ssh_binary: String,

    /// Directory for sealed input files
    pub work_dir: PathBuf,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(runner_id: String, orchestrator_url: String) -> Self {
        Self {
            runner_id,
            orchestrator_url,
            poll_interval: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(30),
            lease_ttl: Duration::from_secs(60),
            job_timeout: Duration::from_secs(300),
            term_grace: Duration::from_secs(10),
            key_path: PathBuf::from("runner-key.pem"),
            key_bits: 2048,
            max_parallel_jobs: 2,
            stream: StreamLimits::default(),
            ssh_binary: "ssh".to_string(),
            work_dir: std::env::temp_dir(),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - RUNNER_ID (required)
    /// - ORCHESTRATOR_URL (required)
    /// - POLL_INTERVAL (optional, seconds, default: 5)
    /// - LEASE_TTL (optional, seconds, default: 60)
    /// - JOB_TIMEOUT (optional, seconds, default: 300)
    /// - TERM_GRACE (optional, seconds, default: 10)
    /// - KEY_PATH (optional, default: runner-key.pem)
    /// - MAX_PARALLEL_JOBS (optional, default: 2)
    /// - STREAM_MAX_EVENTS / STREAM_MAX_BYTES / STREAM_MAX_PENDING_BYTES (optional)
    /// - STREAM_FLUSH_INTERVAL_MS (optional, default: 1000)
    /// - SSH_BINARY (optional, default: ssh)
    /// - WORK_DIR (optional, default: system temp dir)
    pub fn from_env() -> anyhow::Result<Self> {
        let runner_id = std::env::var("RUNNER_ID")
            .map_err(|_| anyhow::anyhow!("RUNNER_ID environment variable not set"))?;

        let orchestrator_url = std::env::var("ORCHESTRATOR_URL")
            .map_err(|_| anyhow::anyhow!("ORCHESTRATOR_URL environment variable not set"))?;

        let mut config = Self::new(runner_id, orchestrator_url);

        if let Some(secs) = env_parse::<u64>("POLL_INTERVAL") {
            config.poll_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("LEASE_TTL") {
            config.lease_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("JOB_TIMEOUT") {
            config.job_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("TERM_GRACE") {
            config.term_grace = Duration::from_secs(secs);
        }
        if let Ok(path) = std::env::var("KEY_PATH") {
            config.key_path = PathBuf::from(path);
        }
        if let Some(n) = env_parse("MAX_PARALLEL_JOBS") {
            config.max_parallel_jobs = n;
        }
        if let Some(n) = env_parse("STREAM_MAX_EVENTS") {
            config.stream.max_events = n;
        }
        if let Some(n) = env_parse("STREAM_MAX_BYTES") {
            config.stream.max_bytes = n;
        }
        if let Some(n) = env_parse("STREAM_MAX_PENDING_BYTES") {
            config.stream.max_pending_bytes = n;
        }
        if let Some(ms) = env_parse::<u64>("STREAM_FLUSH_INTERVAL_MS") {
            config.stream.flush_interval = Duration::from_millis(ms);
        }
        if let Ok(ssh) = std::env::var("SSH_BINARY") {
            config.ssh_binary = ssh;
        }
        if let Ok(dir) = std::env::var("WORK_DIR") {
            config.work_dir = PathBuf::from(dir);
        }

        Ok(config)
    }

    /// Upper bound on the pause between lease renewals
    pub fn renew_interval(&self) -> Duration {
        (self.lease_ttl / 3).max(Duration::from_secs(1))
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.runner_id.is_empty() {
            anyhow::bail!("runner_id cannot be empty");
        }

        if self.orchestrator_url.is_empty() {
            anyhow::bail!("orchestrator_url cannot be empty");
        }

        if !self.orchestrator_url.starts_with("http://")
            && !self.orchestrator_url.starts_with("https://")
        {
            anyhow::bail!("orchestrator_url must start with http:// or https://");
        }

        if self.poll_interval.is_zero() {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        if self.lease_ttl < Duration::from_secs(3) {
            anyhow::bail!("lease_ttl must be at least 3 seconds");
        }

        if self.job_timeout.is_zero() {
            anyhow::bail!("job_timeout must be greater than 0");
        }

        if self.max_parallel_jobs == 0 {
            anyhow::bail!("max_parallel_jobs must be greater than 0");
        }

        if self.key_bits < 2048 {
            anyhow::bail!("key_bits must be at least 2048");
        }

        self.stream.validate()?;

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(
            uuid::Uuid::new_v4().to_string(),
            "http://localhost:8080".to_string(),
        )
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.renew_interval(), Duration::from_secs(20));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        // Valid config should pass
        assert!(config.validate().is_ok());

        // Empty runner_id should fail
        config.runner_id = String::new();
        assert!(config.validate().is_err());

        config.runner_id = "test".to_string();

        // Invalid URL should fail
        config.orchestrator_url = "not-a-url".to_string();
        assert!(config.validate().is_err());

        config.orchestrator_url = "http://localhost:8080".to_string();
        assert!(config.validate().is_ok());

        config.max_parallel_jobs = 0;
        assert!(config.validate().is_err());
        config.max_parallel_jobs = 1;

        config.stream.max_events = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_short_lease_renews_every_second() {
        let mut config = Config::default();
        config.lease_ttl = Duration::from_secs(2);
        assert_eq!(config.renew_interval(), Duration::from_secs(1));
        assert!(config.validate().is_err());
    }
}

//! Tether Runner binary
//!
//! Loads its sealing key, registers with the orchestrator and polls for
//! jobs until interrupted.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tether_client::OrchestratorClient;
use tether_core::dto::runner::RegisterRunner;
use tether_envelope::{Keyring, RunnerKeypair};
use tether_runner::config::Config;
use tether_runner::repository::{
    HttpEventRepository, HttpJobRepository, HttpRunnerRepository, RunnerRepository,
};
use tether_runner::scheduler::JobPoller;
use tether_runner::service::sealed_input::sweep_stale;
use tether_runner::service::{CapabilitiesService, StandardCapabilitiesService};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tether_runner=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Tether Runner");

    let config = load_config()?;
    info!(
        "Loaded configuration: runner_id={}, orchestrator_url={}",
        config.runner_id, config.orchestrator_url
    );

    let http = reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")?;
    let client = Arc::new(OrchestratorClient::with_client(
        config.orchestrator_url.clone(),
        http,
    ));

    let keypair = RunnerKeypair::load_or_generate(&config.key_path, config.key_bits)
        .with_context(|| format!("Failed to load sealing key {}", config.key_path.display()))?;
    let public_key_pem = keypair
        .public_key_pem()
        .context("Failed to encode public key")?;
    let key_id = keypair.key_id().to_string();
    info!("Sealing key {} loaded from {}", key_id, config.key_path.display());

    let capabilities = StandardCapabilitiesService::new(config.ssh_binary.clone())
        .discover()
        .context("Failed to discover capabilities")?;
    info!("Discovered {} capabilities", capabilities.len());
    for cap in &capabilities {
        info!("  - {}", cap);
    }

    let runners = Arc::new(HttpRunnerRepository::new(
        Arc::clone(&client),
        config.runner_id.clone(),
    ));
    let registration = RegisterRunner {
        runner_id: config.runner_id.clone(),
        capabilities,
        public_key_pem: Some(public_key_pem),
        key_id: Some(key_id),
    };
    register_with_retry(runners.as_ref(), &registration).await?;
    info!("Registered with orchestrator");

    match sweep_stale(&config.work_dir) {
        Ok(removed) if !removed.is_empty() => {
            warn!("Removed {} stale sealed input file(s)", removed.len())
        }
        Ok(_) => {}
        Err(e) => warn!(
            "Failed to sweep work dir {}: {}",
            config.work_dir.display(),
            e
        ),
    }

    let poller = JobPoller::new(
        config.clone(),
        Arc::new(HttpJobRepository::new(
            Arc::clone(&client),
            config.runner_id.clone(),
        )),
        Arc::new(HttpEventRepository::new(Arc::clone(&client))),
        runners,
        Arc::new(Keyring::single(keypair)),
    );

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received");
                shutdown.cancel();
            }
        }
    });

    info!(
        "Poll interval: {:?}, lease ttl: {:?}, job timeout: {:?}",
        config.poll_interval, config.lease_ttl, config.job_timeout
    );
    if let Err(e) = poller.run(shutdown).await {
        error!("Poller error: {:#}", e);
        return Err(e);
    }

    info!("Runner stopped");
    Ok(())
}

/// Loads configuration from environment variables with fallback to defaults
fn load_config() -> Result<Config> {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            info!("{}, using defaults", e);
            Config::default()
        }
    };
    config.validate()?;
    Ok(config)
}

/// Register with orchestrator with retry logic and exponential backoff
///
/// This handles the case where the orchestrator may not be ready yet when
/// the runner starts (common in container environments).
async fn register_with_retry(
    runners: &dyn RunnerRepository,
    request: &RegisterRunner,
) -> Result<()> {
    const MAX_RETRIES: u32 = 10;
    const INITIAL_DELAY_MS: u64 = 500;
    const MAX_DELAY_MS: u64 = 30_000;

    let mut attempt = 0;
    let mut delay_ms = INITIAL_DELAY_MS;

    loop {
        attempt += 1;

        match runners.register(request).await {
            Ok(_) => {
                if attempt > 1 {
                    info!(
                        "Successfully registered with orchestrator after {} attempt(s)",
                        attempt
                    );
                }
                return Ok(());
            }
            // A rejected registration will not succeed on retry
            Err(e) if e.is_client_error() => {
                return Err(anyhow::Error::new(e).context("Orchestrator rejected registration"));
            }
            Err(e) => {
                if attempt >= MAX_RETRIES {
                    error!(
                        "Failed to register with orchestrator after {} attempts",
                        MAX_RETRIES
                    );
                    return Err(anyhow::Error::new(e).context("Failed to register with orchestrator"));
                }

                warn!(
                    "Failed to register with orchestrator (attempt {}/{}): {}",
                    attempt, MAX_RETRIES, e
                );
                warn!("Retrying in {} ms...", delay_ms);

                tokio::time::sleep(Duration::from_millis(delay_ms)).await;

                // Exponential backoff with cap
                delay_ms = (delay_ms * 2).min(MAX_DELAY_MS);
            }
        }
    }
}

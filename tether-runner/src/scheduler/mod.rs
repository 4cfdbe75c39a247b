//! Scheduler layer for the runner
//!
//! This layer polls the orchestrator for leasable jobs and drives each one
//! from claim to completion, keeping its lease alive while it runs.

pub mod poller;

pub use poller::JobPoller;

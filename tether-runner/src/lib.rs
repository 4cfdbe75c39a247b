//! Tether Runner
//!
//! A worker that leases jobs from the orchestrator and executes them as
//! local or SSH processes.
//!
//! Architecture:
//! - Configuration: Load settings from environment or defaults
//! - Repositories: HTTP communication with the orchestrator (jobs, events, runners)
//! - Services: Execution, output redaction and queuing, event streaming,
//!   sealed input handling, capability discovery
//! - Scheduler: Job polling, lease renewal and lifecycle management

pub mod config;
pub mod repository;
pub mod scheduler;
pub mod service;

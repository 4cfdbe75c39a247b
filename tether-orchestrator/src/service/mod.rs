//! Service Module
//!
//! Business logic layer for the orchestrator.
//! Services orchestrate between the store and contain domain logic.

pub mod event;
pub mod job;
pub mod repo_status;
pub mod runner;
pub mod status_cache;
pub mod store_status;

// Re-export for convenience
pub use event as event_service;
pub use job as job_service;
pub use runner as runner_service;

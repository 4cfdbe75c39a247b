//! Data transfer objects
//!
//! Request and response bodies exchanged between the CLI, runners and the
//! orchestrator.

pub mod event;
pub mod job;
pub mod runner;
pub mod status;

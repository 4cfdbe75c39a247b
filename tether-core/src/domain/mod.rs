//! Core domain types
//!
//! This module contains the core domain structures used across Tether services.
//! These types are shared between the orchestrator (for persistence) and the
//! runner (for execution).

pub mod event;
pub mod job;
pub mod kind;
pub mod runner;

//! Tether Core
//!
//! Core types and abstractions shared by the Tether control plane and runners.
//!
//! This crate contains:
//! - Domain types: Core business entities (Job, RunEvent, Runner, etc.)
//! - DTOs: Data transfer objects for inter-service communication
//! - Scheduling: the lease ordering used when a runner asks for work

pub mod domain;
pub mod dto;
pub mod schedule;

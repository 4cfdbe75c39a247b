//! Tether orchestrator
//!
//! Control plane for the job dispatch pipeline: accepts jobs, hands out
//! time-boxed leases to runners, collects their event streams and results,
//! and serves cached read-side probes.

pub mod api;
pub mod config;
pub mod db;
pub mod repository;
pub mod service;

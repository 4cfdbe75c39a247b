//! Repository layer
//!
//! Repositories are thin, stateless adapters over the orchestrator client.
//! They provide focused interfaces for the lease lifecycle, event appends and
//! runner registration without any business logic.
//!
//! All repositories are trait-based so the services and the poller can be
//! tested against in-process fakes.

mod events;
mod jobs;
mod runners;

// Re-export traits
pub use events::EventRepository;
pub use jobs::JobRepository;
pub use runners::RunnerRepository;

// Re-export implementations
pub use events::HttpEventRepository;
pub use jobs::HttpJobRepository;
pub use runners::HttpRunnerRepository;

//! Service layer
//!
//! Services contain the runner's business logic: process execution, output
//! redaction and queuing, event streaming, sealed input handling and
//! capability discovery. They talk to the orchestrator only through the
//! repository traits.

pub mod capabilities;
pub mod command;
pub mod event_stream;
pub mod executor;
pub mod output_queue;
pub mod redact;
pub mod result;
pub mod sealed_input;

pub use capabilities::{CapabilitiesService, StandardCapabilitiesService};
pub use event_stream::{EventEmitter, EventStream, StreamLimits};
pub use executor::{CommandExecutor, CommandSpec, ExecOutcome, ExecReport};
pub use redact::Redactor;

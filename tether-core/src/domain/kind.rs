//! Job kinds and their result-size policies

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Inline ceiling for `json_small` results.
pub const JSON_SMALL_MAX_BYTES: usize = 256 * 1024;

/// Ceiling for results sent over the large-result channel.
pub const JSON_LARGE_MAX_BYTES: usize = 16 * 1024 * 1024;

/// What a job does once leased
///
/// The kind selects the command template on the runner and the
/// result-size policy on both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Local command taken verbatim from the job args
    Custom,
    /// Command run on `payload_meta.host` over SSH
    Ssh,
    /// Local command whose stdout is a small JSON document
    Probe,
    /// Local command whose stdout is a large JSON document
    Export,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Custom => "custom",
            JobKind::Ssh => "ssh",
            JobKind::Probe => "probe",
            JobKind::Export => "export",
        }
    }

    pub fn result_policy(&self) -> ResultPolicy {
        match self {
            JobKind::Custom | JobKind::Ssh => ResultPolicy::Log,
            JobKind::Probe => ResultPolicy::JsonSmall,
            JobKind::Export => ResultPolicy::JsonLarge,
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown job kind
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown job kind: {0}")]
pub struct UnknownKind(pub String);

impl FromStr for JobKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "custom" => Ok(JobKind::Custom),
            "ssh" => Ok(JobKind::Ssh),
            "probe" => Ok(JobKind::Probe),
            "export" => Ok(JobKind::Export),
            other => Err(UnknownKind(other.to_string())),
        }
    }
}

/// How the output of a job is retained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultPolicy {
    /// Output is only recorded as run events
    Log,
    /// Stdout is a JSON document returned inline with the job
    JsonSmall,
    /// Stdout is a JSON document stored through the large-result channel
    JsonLarge,
}

impl ResultPolicy {
    /// Maximum accepted result size, `None` for log-only kinds
    pub fn ceiling_bytes(&self) -> Option<usize> {
        match self {
            ResultPolicy::Log => None,
            ResultPolicy::JsonSmall => Some(JSON_SMALL_MAX_BYTES),
            ResultPolicy::JsonLarge => Some(JSON_LARGE_MAX_BYTES),
        }
    }

    /// Checks a serialized result against the ceiling
    pub fn check_size(&self, len: usize) -> Result<(), ResultTooLarge> {
        match self.ceiling_bytes() {
            Some(limit) if len > limit => Err(ResultTooLarge { len, limit }),
            _ => Ok(()),
        }
    }
}

/// A result payload exceeded its policy ceiling
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("result exceeds {limit} bytes (got {len})")]
pub struct ResultTooLarge {
    pub len: usize,
    pub limit: usize,
}

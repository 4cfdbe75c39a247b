//! Run event domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An append-only log line belonging to a run
///
/// Events are produced by the runner, redacted before they leave the
/// process, and never mutated once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    pub ts: DateTime<Utc>,
    pub level: EventLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// True if redaction changed the message or data
    #[serde(default)]
    pub redacted: bool,
}

impl RunEvent {
    pub fn new(level: EventLevel, message: impl Into<String>) -> Self {
        Self {
            ts: Utc::now(),
            level,
            message: message.into(),
            data: None,
            redacted: false,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(EventLevel::Info, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(EventLevel::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(EventLevel::Error, message)
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Bytes this event counts against stream caps
    pub fn size_bytes(&self) -> usize {
        let data_len = self
            .data
            .as_ref()
            .map(|d| d.to_string().len())
            .unwrap_or(0);
        self.message.len() + data_len
    }
}

/// A stored event with its position in the run's log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub seq: i64,
    #[serde(flatten)]
    pub event: RunEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl EventLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventLevel::Debug => "Debug",
            EventLevel::Info => "Info",
            EventLevel::Warning => "Warning",
            EventLevel::Error => "Error",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "Debug" => EventLevel::Debug,
            "Warning" => EventLevel::Warning,
            "Error" => EventLevel::Error,
            _ => EventLevel::Info,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_counts_message_and_data() {
        let plain = RunEvent::info("hello");
        assert_eq!(plain.size_bytes(), 5);

        let with_data = RunEvent::info("hello").with_data(serde_json::json!({"a": 1}));
        assert_eq!(with_data.size_bytes(), 5 + r#"{"a":1}"#.len());
    }

    #[test]
    fn test_stored_event_flattens() {
        let stored = StoredEvent {
            seq: 7,
            event: RunEvent::warning("careful"),
        };
        let json = serde_json::to_value(&stored).unwrap();
        assert_eq!(json["seq"], 7);
        assert_eq!(json["message"], "careful");
        assert_eq!(json["level"], "Warning");
    }
}

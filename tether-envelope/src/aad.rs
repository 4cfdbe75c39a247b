//! Additional authenticated data binding an envelope to its context

use std::fmt;

use uuid::Uuid;

use crate::error::{EnvelopeError, Result};

const SEPARATOR: char = ':';
const SETUP_DRAFT_TAG: &str = "setup-draft";

/// Context string authenticated (but not encrypted) by the envelope
///
/// The opener rebuilds this from the job record it is executing; it is
/// never read out of the envelope itself. Free-form fields may not contain
/// the separator, and the second field is either a job UUID or the
/// setup-draft tag, so no two bindings share a string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aad(String);

impl Aad {
    /// Binding for a queued job: `{project}:{job}:{kind}:{target_runner}`
    pub fn job(
        project_id: &str,
        job_id: Uuid,
        kind: impl fmt::Display,
        target_runner_id: &str,
    ) -> Result<Self> {
        let kind = kind.to_string();
        field("project_id", project_id)?;
        field("kind", &kind)?;
        field("target_runner_id", target_runner_id)?;

        Ok(Self(format!(
            "{}:{}:{}:{}",
            project_id, job_id, kind, target_runner_id
        )))
    }

    /// Binding for a host setup draft section
    pub fn setup_draft(project_id: &str, host_id: &str, section: &str) -> Result<Self> {
        field("project_id", project_id)?;
        field("host_id", host_id)?;
        field("section", section)?;

        Ok(Self(format!(
            "{}:{}:{}:{}",
            project_id, SETUP_DRAFT_TAG, host_id, section
        )))
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn field(name: &str, value: &str) -> Result<()> {
    if value.is_empty() || value.contains(SEPARATOR) {
        return Err(EnvelopeError::InvalidAad(format!(
            "{} must be non-empty and free of '{}'",
            name, SEPARATOR
        )));
    }
    Ok(())
}

impl fmt::Display for Aad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_id() -> Uuid {
        Uuid::from_u128(0x0b0e)
    }

    #[test]
    fn test_job_aad_layout() {
        let aad = Aad::job("proj", job_id(), "custom", "runner-a").unwrap();
        assert_eq!(
            aad.as_str(),
            format!("proj:{}:custom:runner-a", job_id()).as_str()
        );
    }

    #[test]
    fn test_setup_draft_aad_layout() {
        let draft = Aad::setup_draft("proj", "host-1", "ssh").unwrap();
        assert_eq!(draft.as_str(), "proj:setup-draft:host-1:ssh");
    }

    #[test]
    fn test_separator_in_field_rejected() {
        assert!(matches!(
            Aad::job("p:x", job_id(), "custom", "runner-a"),
            Err(EnvelopeError::InvalidAad(_))
        ));
        assert!(Aad::job("proj", job_id(), "custom", "runner:a").is_err());
        assert!(Aad::job("proj", job_id(), "a:b", "runner-a").is_err());
        assert!(Aad::job("", job_id(), "custom", "runner-a").is_err());
        assert!(Aad::setup_draft("proj", "host:1", "ssh").is_err());
        assert!(Aad::setup_draft("proj", "host-1", "s:sh").is_err());
    }

    #[test]
    fn test_draft_and_job_shapes_cannot_collide() {
        assert_ne!(
            Aad::job("p", job_id(), "h", "s").unwrap(),
            Aad::setup_draft("p", "h", "s").unwrap()
        );
        assert!(Aad::setup_draft("p", "setup-draft:h", "s").is_err());
        assert!(Aad::job("p:setup-draft", job_id(), "h", "s").is_err());
    }
}

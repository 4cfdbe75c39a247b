//! Capabilities service
//!
//! Discovers which job kinds this runner can execute. Reported to the
//! orchestrator at registration.

use std::path::{Path, PathBuf};

use anyhow::Result;
use tether_core::domain::kind::JobKind;
use tracing::info;

/// Service trait for capability discovery
pub trait CapabilitiesService: Send + Sync {
    /// Discovers the job kinds available on this runner
    fn discover(&self) -> Result<Vec<String>>;
}

/// Standard implementation of CapabilitiesService
pub struct StandardCapabilitiesService {
    ssh_binary: String,
}

impl StandardCapabilitiesService {
    /// # Arguments
    /// * `ssh_binary` - Client used for `ssh` jobs; the kind is only offered if it resolves
    pub fn new(ssh_binary: impl Into<String>) -> Self {
        Self {
            ssh_binary: ssh_binary.into(),
        }
    }
}

impl CapabilitiesService for StandardCapabilitiesService {
    fn discover(&self) -> Result<Vec<String>> {
        info!("Discovering runner capabilities");

        let mut capabilities: Vec<String> = [JobKind::Custom, JobKind::Probe, JobKind::Export]
            .iter()
            .map(|k| k.to_string())
            .collect();

        match find_executable(&self.ssh_binary) {
            Some(path) => {
                info!("Found ssh client at {}", path.display());
                capabilities.push(JobKind::Ssh.to_string());
            }
            None => info!("No ssh client found ({}), ssh jobs disabled", self.ssh_binary),
        }

        Ok(capabilities)
    }
}

/// Resolves `name` the way a shell would: as a path if it has a separator,
/// otherwise through `PATH`.
fn find_executable(name: &str) -> Option<PathBuf> {
    if name.contains(std::path::MAIN_SEPARATOR) {
        let path = PathBuf::from(name);
        return is_executable(&path).then_some(path);
    }

    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    let Ok(metadata) = std::fs::metadata(path) else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_kinds_always_present() {
        let caps = StandardCapabilitiesService::new("definitely-not-an-ssh-binary")
            .discover()
            .unwrap();
        assert_eq!(caps, vec!["custom", "probe", "export"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_ssh_offered_when_binary_resolves() {
        let caps = StandardCapabilitiesService::new("/bin/sh").discover().unwrap();
        assert!(caps.contains(&"ssh".to_string()));
    }
}

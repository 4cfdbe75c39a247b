//! Repository status probe
//!
//! Runs `git status --porcelain=v2 --branch` against the configured
//! repository root and summarises it. Results go through a [`StatusCache`]
//! so a burst of dashboard reads costs one git invocation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tether_core::dto::status::RepoStatus;
use tokio::process::Command;

use super::status_cache::{ProbeError, StatusCache};

pub struct RepoStatusService {
    root: Option<PathBuf>,
    git: String,
    cache: Arc<StatusCache<RepoStatus>>,
}

impl RepoStatusService {
    pub fn new(root: Option<PathBuf>, cache: Arc<StatusCache<RepoStatus>>) -> Self {
        Self {
            root,
            git: "git".to_string(),
            cache,
        }
    }

    /// Use a different git executable.
    pub fn with_git(mut self, git: impl Into<String>) -> Self {
        self.git = git.into();
        self
    }

    pub async fn status(&self) -> Result<RepoStatus, ProbeError> {
        let Some(root) = self.root.as_deref() else {
            return Err(ProbeError::new("no repository root configured"));
        };

        let key = root.display().to_string();
        self.cache.get(&key, || probe(&self.git, root)).await
    }
}

async fn probe(git: &str, root: &Path) -> Result<RepoStatus, ProbeError> {
    tracing::debug!("Probing repository status at {}", root.display());

    let output = Command::new(git)
        .arg("-C")
        .arg(root)
        .args(["status", "--porcelain=v2", "--branch"])
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| ProbeError::new(format!("failed to run {}: {}", git, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ProbeError::new(format!(
            "git status failed ({}): {}",
            output.status,
            stderr.trim()
        )));
    }

    Ok(parse_porcelain_v2(&String::from_utf8_lossy(&output.stdout)))
}

/// Summarise `git status --porcelain=v2 --branch` output.
pub fn parse_porcelain_v2(output: &str) -> RepoStatus {
    let mut status = RepoStatus {
        branch: None,
        head: None,
        upstream: None,
        ahead: 0,
        behind: 0,
        changed: 0,
        untracked: 0,
    };

    for line in output.lines() {
        if let Some(header) = line.strip_prefix("# ") {
            let (name, value) = header.split_once(' ').unwrap_or((header, ""));
            match name {
                "branch.oid" if value != "(initial)" => status.head = Some(value.to_string()),
                "branch.head" if value != "(detached)" => status.branch = Some(value.to_string()),
                "branch.upstream" => status.upstream = Some(value.to_string()),
                "branch.ab" => {
                    for part in value.split_whitespace() {
                        if let Some(n) = part.strip_prefix('+') {
                            status.ahead = n.parse().unwrap_or(0);
                        } else if let Some(n) = part.strip_prefix('-') {
                            status.behind = n.parse().unwrap_or(0);
                        }
                    }
                }
                _ => {}
            }
            continue;
        }

        match line.as_bytes().first() {
            Some(b'1') | Some(b'2') | Some(b'u') => status.changed += 1,
            Some(b'?') => status.untracked += 1,
            _ => {}
        }
    }

    status
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const SAMPLE: &str = "\
# branch.oid 4f2c1a9e0b7d3c5a6e8f9a0b1c2d3e4f5a6b7c8d
# branch.head main
# branch.upstream origin/main
# branch.ab +2 -1
1 .M N... 100644 100644 100644 3b18e512 3b18e512 src/lib.rs
2 R. N... 100644 100644 100644 9daeafb9 9daeafb9 R100 new.rs\told.rs
u UU N... 100644 100644 100644 100644 1 2 3 4 conflict.rs
? notes.txt
? scratch/
! target/
";

    #[test]
    fn test_parse_full_status() {
        let status = parse_porcelain_v2(SAMPLE);
        assert_eq!(status.branch.as_deref(), Some("main"));
        assert_eq!(
            status.head.as_deref(),
            Some("4f2c1a9e0b7d3c5a6e8f9a0b1c2d3e4f5a6b7c8d")
        );
        assert_eq!(status.upstream.as_deref(), Some("origin/main"));
        assert_eq!((status.ahead, status.behind), (2, 1));
        assert_eq!(status.changed, 3);
        assert_eq!(status.untracked, 2);
        assert!(status.is_dirty());
    }

    #[test]
    fn test_parse_fresh_repo() {
        let status = parse_porcelain_v2("# branch.oid (initial)\n# branch.head main\n");
        assert_eq!(status.head, None);
        assert_eq!(status.branch.as_deref(), Some("main"));
        assert_eq!(status.upstream, None);
        assert!(!status.is_dirty());
    }

    #[test]
    fn test_parse_detached_head() {
        let status = parse_porcelain_v2("# branch.oid abc123\n# branch.head (detached)\n");
        assert_eq!(status.branch, None);
        assert_eq!(status.head.as_deref(), Some("abc123"));
    }

    #[tokio::test]
    async fn test_missing_root_is_reported() {
        let cache = Arc::new(StatusCache::new(
            Duration::from_secs(5),
            Duration::from_secs(1),
            8,
        ));
        let service = RepoStatusService::new(None, cache);
        assert!(service.status().await.is_err());
    }

    #[tokio::test]
    async fn test_non_repository_failure_is_cached() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(StatusCache::new(
            Duration::from_secs(60),
            Duration::from_secs(60),
            8,
        ));
        let service =
            RepoStatusService::new(Some(dir.path().to_path_buf()), cache.clone())
                .with_git("definitely-not-a-git-binary");

        let first = service.status().await.unwrap_err();
        assert!(first.0.contains("definitely-not-a-git-binary"));
        assert_eq!(cache.len(), 1);
        assert_eq!(service.status().await.unwrap_err(), first);
    }
}

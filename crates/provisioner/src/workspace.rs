//! Local workspace resolution
//!
//! Inspection is read-only and runs before any remote call, so a workspace
//! bound to the wrong repository is rejected before anything is provisioned.

use crate::vcs::{VersionControl, DEFAULT_REMOTE};
use serde::Serialize;
use std::path::Path;
use tracing::info;
use vps_common::{Error, RepoRef, Result};

/// What was found at the service's local path
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum WorkspaceState {
    /// Path does not exist yet
    Fresh,
    /// Directory exists without version control
    Unversioned,
    /// Directory is a repository, possibly bound to a hosted remote
    Versioned { remote: Option<RepoRef> },
}

impl WorkspaceState {
    pub fn bound_remote(&self) -> Option<&RepoRef> {
        match self {
            WorkspaceState::Versioned { remote } => remote.as_ref(),
            _ => None,
        }
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self, WorkspaceState::Fresh)
    }
}

/// Determine the workspace state without modifying anything
pub async fn inspect(path: &Path, vcs: &dyn VersionControl) -> Result<WorkspaceState> {
    if !path.exists() {
        return Ok(WorkspaceState::Fresh);
    }

    if !path.is_dir() {
        return Err(Error::InvalidArgument(format!(
            "local path {} exists and is not a directory",
            path.display()
        )));
    }

    if !vcs.is_repository(path).await? {
        return Ok(WorkspaceState::Unversioned);
    }

    let remote = match vcs.remote_url(path, DEFAULT_REMOTE).await? {
        Some(url) => Some(parse_remote_url(&url)?),
        None => None,
    };

    Ok(WorkspaceState::Versioned { remote })
}

/// Reject an explicit repository that disagrees with the detected binding
pub fn check_binding(state: &WorkspaceState, requested: Option<&RepoRef>) -> Result<()> {
    match (state.bound_remote(), requested) {
        (Some(detected), Some(requested)) if !same_repository(detected, requested) => {
            Err(Error::RepositoryMismatch {
                detected: detected.to_string(),
                requested: requested.to_string(),
            })
        }
        _ => Ok(()),
    }
}

/// Create the directory for a fresh workspace
pub fn prepare(path: &Path, state: &WorkspaceState) -> Result<()> {
    if state.is_fresh() {
        info!("Creating workspace {}", path.display());
        std::fs::create_dir_all(path)?;
    } else {
        info!("Using existing workspace {}", path.display());
    }
    Ok(())
}

// Hosted repository names are case-insensitive
fn same_repository(a: &RepoRef, b: &RepoRef) -> bool {
    a.owner().eq_ignore_ascii_case(b.owner()) && a.name().eq_ignore_ascii_case(b.name())
}

/// Extract `owner/name` from an ssh, scp-style or https remote url
pub fn parse_remote_url(url: &str) -> Result<RepoRef> {
    let url = url.trim();

    let path = if let Some(rest) = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .or_else(|| url.strip_prefix("ssh://"))
        .or_else(|| url.strip_prefix("git://"))
    {
        // host[:port]/owner/name, possibly with user@ in front of the host
        rest.split_once('/').map(|(_, path)| path)
    } else if let Some((host, path)) = url.split_once(':') {
        // scp-style git@host:owner/name
        (!host.contains('/')).then_some(path)
    } else {
        None
    };

    let path = path
        .map(|p| p.trim_matches('/'))
        .map(|p| p.strip_suffix(".git").unwrap_or(p))
        .ok_or_else(|| Error::UnrecognizedRemote(url.to_string()))?;

    match path.split_once('/') {
        Some((owner, name)) if !name.contains('/') => {
            RepoRef::new(owner, name).map_err(|_| Error::UnrecognizedRemote(url.to_string()))
        }
        _ => Err(Error::UnrecognizedRemote(url.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scp_style_url() {
        let repo = parse_remote_url("git@github.com:acme/billing.git").unwrap();
        assert_eq!(repo.to_string(), "acme/billing");

        let repo = parse_remote_url("git@github.com:acme/billing").unwrap();
        assert_eq!(repo.to_string(), "acme/billing");
    }

    #[test]
    fn test_parse_https_and_ssh_urls() {
        let repo = parse_remote_url("https://github.com/acme/billing.git").unwrap();
        assert_eq!(repo.to_string(), "acme/billing");

        let repo = parse_remote_url("ssh://git@github.com:22/acme/billing.git").unwrap();
        assert_eq!(repo.to_string(), "acme/billing");

        let repo = parse_remote_url("https://github.com/acme/billing/").unwrap();
        assert_eq!(repo.to_string(), "acme/billing");
    }

    #[test]
    fn test_parse_rejects_unknown_shapes() {
        for url in ["/srv/git/billing.git", "https://github.com/billing", "billing", ""] {
            let err = parse_remote_url(url).unwrap_err();
            assert!(matches!(err, Error::UnrecognizedRemote(_)), "accepted {:?}", url);
        }
    }

    #[test]
    fn test_check_binding_mismatch() {
        let state = WorkspaceState::Versioned {
            remote: Some(RepoRef::parse("A/X").unwrap()),
        };

        let err = check_binding(&state, Some(&RepoRef::parse("B/Y").unwrap())).unwrap_err();
        assert!(matches!(err, Error::RepositoryMismatch { .. }));

        assert!(check_binding(&state, Some(&RepoRef::parse("a/x").unwrap())).is_ok());
        assert!(check_binding(&state, None).is_ok());
        assert!(check_binding(&WorkspaceState::Unversioned, Some(&RepoRef::parse("B/Y").unwrap())).is_ok());
    }

    #[test]
    fn test_prepare_creates_fresh_directory() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("billing");

        prepare(&path, &WorkspaceState::Fresh).unwrap();
        assert!(path.is_dir());
    }
}

//! Remote repository binding
//!
//! Three mutually exclusive paths, chosen from the inspected workspace:
//! an existing remote is reused, otherwise a repository named after the
//! service (or the explicitly requested one) is located or created, attached
//! as `origin` and pushed.

use crate::repo_host::RepositoryHost;
use crate::report::{Stage, Warning};
use crate::vcs::{VersionControl, DEFAULT_REMOTE};
use crate::workspace::WorkspaceState;
use std::path::Path;
use tracing::{info, warn};
use vps_common::{Error, RepoRef, Result, ServiceName};

/// Inputs of the binding stage
pub struct BindingRequest<'a> {
    pub dir: &'a Path,
    pub name: &'a ServiceName,
    pub explicit: Option<&'a RepoRef>,
    pub workspace: &'a WorkspaceState,
    pub branch: &'a str,
}

/// Bind the workspace to a hosted repository and return its coordinate.
///
/// Push failures on an already bound workspace become warnings; every other
/// failure is a `RepositoryBindingFailed`.
pub async fn bind(
    vcs: &dyn VersionControl,
    host: &dyn RepositoryHost,
    request: &BindingRequest<'_>,
    warnings: &mut Vec<Warning>,
) -> Result<RepoRef> {
    if let Some(bound) = request.workspace.bound_remote() {
        push_existing(vcs, request, bound, warnings).await;
        return Ok(bound.clone());
    }

    let repo = match request.explicit {
        Some(explicit) => locate_explicit(host, explicit).await?,
        None => locate_default(host, request.name).await?,
    };

    attach_and_push(vcs, host, request, &repo, warnings).await?;
    Ok(repo)
}

async fn push_existing(
    vcs: &dyn VersionControl,
    request: &BindingRequest<'_>,
    bound: &RepoRef,
    warnings: &mut Vec<Warning>,
) {
    info!("Using existing remote: {}", bound);

    let ahead = match vcs.commits_ahead(request.dir).await {
        Ok(ahead) => ahead,
        Err(e) => {
            record(warnings, format!("Could not compare with upstream: {}", e));
            return;
        }
    };

    match ahead {
        Some(0) => {
            info!("Branch is up to date with {}", bound);
            return;
        }
        Some(n) => info!("Pushing {} commits to {}", n, bound),
        None => info!("No upstream branch yet, pushing {}", request.branch),
    }

    match vcs.has_commits(request.dir).await {
        Ok(true) => {}
        Ok(false) => {
            record(warnings, "Nothing committed yet, skipping push".to_string());
            return;
        }
        Err(e) => {
            record(warnings, format!("Could not read HEAD: {}", e));
            return;
        }
    }

    if let Err(e) = vcs.push(request.dir, DEFAULT_REMOTE, request.branch).await {
        record(
            warnings,
            format!("Push to {} failed, reconcile history manually: {}", bound, e),
        );
    }
}

async fn locate_default(host: &dyn RepositoryHost, name: &ServiceName) -> Result<RepoRef> {
    let user = host
        .current_user()
        .await
        .map_err(|e| Error::binding("resolving caller identity", e))?;
    let repo = RepoRef::new(user, name.as_str())?;

    if exists(host, &repo).await? {
        info!("Found existing repository {}", repo);
    } else {
        info!("Creating private repository {}", repo);
        create(host, &repo).await?;
    }

    Ok(repo)
}

async fn locate_explicit(host: &dyn RepositoryHost, repo: &RepoRef) -> Result<RepoRef> {
    if exists(host, repo).await? {
        info!("Connecting to repository {}", repo);
        return Ok(repo.clone());
    }

    let user = host
        .current_user()
        .await
        .map_err(|e| Error::binding("resolving caller identity", e))?;

    if !user.eq_ignore_ascii_case(repo.owner()) {
        return Err(Error::RepositoryBindingFailed(format!(
            "{} does not exist and cannot be created by {}",
            repo, user
        )));
    }

    info!("Creating private repository {}", repo);
    create(host, repo).await?;
    Ok(repo.clone())
}

async fn exists(host: &dyn RepositoryHost, repo: &RepoRef) -> Result<bool> {
    host.repository_exists(repo)
        .await
        .map_err(|e| Error::binding(format!("checking {}", repo), e))
}

async fn create(host: &dyn RepositoryHost, repo: &RepoRef) -> Result<()> {
    host.create_repository(repo, true)
        .await
        .map_err(|e| Error::binding(format!("creating {}", repo), e))
}

async fn attach_and_push(
    vcs: &dyn VersionControl,
    host: &dyn RepositoryHost,
    request: &BindingRequest<'_>,
    repo: &RepoRef,
    warnings: &mut Vec<Warning>,
) -> Result<()> {
    let url = host.clone_url(repo);
    vcs.add_remote(request.dir, DEFAULT_REMOTE, &url)
        .await
        .map_err(|e| Error::binding(format!("adding remote {}", url), e))?;

    let has_commits = vcs
        .has_commits(request.dir)
        .await
        .map_err(|e| Error::binding("reading HEAD", e))?;

    if !has_commits {
        record(warnings, format!("Nothing committed yet, {} not pushed", repo));
        return Ok(());
    }

    vcs.push(request.dir, DEFAULT_REMOTE, request.branch)
        .await
        .map_err(|e| Error::binding(format!("pushing to {}", repo), e))?;

    info!("Pushed {} to {}", request.branch, repo);
    Ok(())
}

fn record(warnings: &mut Vec<Warning>, message: String) {
    warn!("{}", message);
    warnings.push(Warning {
        stage: Stage::RepositoryBinding,
        message,
    });
}

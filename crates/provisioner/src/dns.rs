//! DNS zone proposal for a service domain
//!
//! The zone file lives in the VPS manager repository and is applied by its
//! automation, so the provisioner only proposes it: write
//! `dns/zones/<domain>.yaml` on a `dns-setup-<domain>` branch, open a pull
//! request, wait a bounded time for the merge, then dispatch the service's
//! `dns-apply.yml` workflow. Nothing in this stage is fatal; the service is
//! already created when it runs.

use crate::repo_host::{PullRequest, PullRequestState, RepositoryHost};
use crate::report::{Stage, Warning};
use crate::vcs::{VersionControl, DEFAULT_REMOTE};
use serde::Serialize;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::Instant;
use tracing::{info, warn};
use vps_common::{Domain, Error, RepoRef, Result, ServiceName};

/// Workflow in the service repository that applies zone changes
pub const DNS_APPLY_WORKFLOW: &str = "dns-apply.yml";

/// Zone files, relative to the manager repository root
pub const ZONES_DIR: &str = "dns/zones";

const SPF_RECORD: &str = "v=spf1 a mx ~all";

/// Zone file path for `domain`, relative to the manager repository root
pub fn zone_path(domain: &Domain) -> PathBuf {
    Path::new(ZONES_DIR).join(format!("{}.yaml", domain))
}

/// Branch carrying the zone change for `domain`
pub fn branch_name(domain: &Domain) -> String {
    format!("dns-setup-{}", domain)
}

/// Records published for a service domain
#[derive(Debug, Clone)]
pub struct ZoneFile<'a> {
    pub domain: &'a Domain,
    pub service: &'a ServiceName,
    pub address: &'a str,
}

impl ZoneFile<'_> {
    /// Render the zone as YAML, one key per record name
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# DNS records for {}", self.domain);
        out.push_str("# Generated by create-service\n\n");

        out.push_str("# Root domain pointing to the VPS, plus SPF\n");
        out.push_str("'':\n");
        let _ = writeln!(out, "  - type: A\n    value: {}", self.address);
        let _ = writeln!(out, "  - type: TXT\n    values:\n      - '\"{}\"'", SPF_RECORD);
        out.push('\n');

        out.push_str("www:\n");
        let _ = writeln!(out, "  type: CNAME\n  value: {}.", self.domain);
        out.push('\n');

        let service = self.service.as_str();
        if service != "www" && service != "api" {
            out.push_str("# Service subdomain\n");
            let _ = writeln!(out, "{}:\n  type: A\n  value: {}", service, self.address);
            out.push('\n');
        }

        out.push_str("# API subdomain (remove if not needed)\n");
        let _ = writeln!(out, "api:\n  type: A\n  value: {}", self.address);

        out
    }
}

/// Bounded wait for a pull request merge
#[derive(Debug, Clone, Copy)]
pub struct MergeWait {
    pub timeout: Duration,
    pub poll: Duration,
}

/// Inputs of the DNS stage
pub struct DnsRequest<'a> {
    pub domain: &'a Domain,
    pub service: &'a ServiceName,
    /// Address the records point at
    pub address: &'a str,
    pub manager_repo: &'a RepoRef,
    /// Existing checkout of the manager repository; cloned when absent
    pub manager_path: Option<&'a Path>,
    pub service_repo: &'a RepoRef,
    pub base_branch: &'a str,
    pub wait: MergeWait,
}

/// How the zone proposal ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ZoneStatus {
    /// Pull request opened; `merged` tells whether it merged within the wait
    Proposed { pull_request: String, merged: bool },
    /// Zone file already committed with the same content
    Unchanged,
    /// A different zone file for the domain already exists and was kept
    KeptExisting,
}

/// Outcome of the DNS stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DnsReport {
    pub zone_file: PathBuf,
    pub branch: String,
    pub address: String,
    pub status: ZoneStatus,
    /// `dns-apply.yml` was dispatched on the service repository
    pub applied: bool,
}

/// Resolve the VPS host to an address, preferring IPv4.
///
/// Falls back to the host string itself, which is usually already an IP.
pub async fn resolve_address(host: &str) -> String {
    match tokio::net::lookup_host((host, 0)).await {
        Ok(addrs) => {
            let addrs: Vec<_> = addrs.map(|a| a.ip()).collect();
            addrs
                .iter()
                .find(|ip| ip.is_ipv4())
                .or_else(|| addrs.first())
                .map(|ip| ip.to_string())
                .unwrap_or_else(|| host.to_string())
        }
        Err(e) => {
            warn!("Could not resolve {}: {}", host, e);
            host.to_string()
        }
    }
}

/// Propose the zone for `request.domain` and apply it once merged
pub async fn configure(
    vcs: &dyn VersionControl,
    host: &dyn RepositoryHost,
    request: &DnsRequest<'_>,
    warnings: &mut Vec<Warning>,
) -> Result<DnsReport> {
    let checkout = ManagerCheckout::open(vcs, host, request).await?;
    let dir = checkout.path();

    let zone_file = zone_path(request.domain);
    let branch = branch_name(request.domain);
    let mut report = DnsReport {
        zone_file: zone_file.clone(),
        branch: branch.clone(),
        address: request.address.to_string(),
        status: ZoneStatus::Unchanged,
        applied: false,
    };

    vcs.switch_branch(dir, &branch).await?;

    let content = ZoneFile {
        domain: request.domain,
        service: request.service,
        address: request.address,
    }
    .render();

    let target = dir.join(&zone_file);
    match fs::read_to_string(&target) {
        Ok(existing) if existing != content => {
            record(
                warnings,
                format!(
                    "Zone file {} already exists with different records, keeping it",
                    zone_file.display()
                ),
            );
            report.status = ZoneStatus::KeptExisting;
            return Ok(report);
        }
        Ok(_) => {}
        Err(_) => {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&target, &content)?;
            info!("Created {}", target.display());
        }
    }

    if !vcs.path_changed(dir, &zone_file).await? {
        info!("No DNS changes for {}", request.domain);
        return Ok(report);
    }

    let message = format!(
        "Add DNS configuration for {}\n\n- Service: {}\n- VPS IP: {}",
        request.domain, request.service, request.address
    );
    vcs.commit_paths(dir, &[zone_file.as_path()], &message).await?;
    vcs.push(dir, DEFAULT_REMOTE, &branch).await?;

    let pull_request = host
        .create_pull_request(
            request.manager_repo,
            &PullRequest {
                head: branch.clone(),
                base: request.base_branch.to_string(),
                title: format!("Add DNS configuration for {}", request.domain),
                body: format!(
                    "This PR adds DNS configuration for {}\n\n- Service: {}\n- VPS IP: {}\n\nAuto-generated by create-service",
                    request.domain, request.service, request.address
                ),
            },
        )
        .await?;
    info!("Created pull request: {}", pull_request);

    let merged = wait_for_merge(host, request.manager_repo, &pull_request, request.wait).await;
    report.status = ZoneStatus::Proposed {
        pull_request: pull_request.clone(),
        merged,
    };

    if !merged {
        record(
            warnings,
            format!(
                "DNS pull request {} not merged; merge it, then run: gh workflow run {} --repo {}",
                pull_request, DNS_APPLY_WORKFLOW, request.service_repo
            ),
        );
        return Ok(report);
    }

    match host
        .trigger_workflow(request.service_repo, DNS_APPLY_WORKFLOW)
        .await
    {
        Ok(()) => {
            info!("DNS apply workflow triggered on {}", request.service_repo);
            report.applied = true;
        }
        Err(e) => record(
            warnings,
            format!(
                "Failed to trigger {} on {}: {}; run it manually",
                DNS_APPLY_WORKFLOW, request.service_repo, e
            ),
        ),
    }

    Ok(report)
}

/// Poll until the pull request is merged or closed, or the wait runs out
async fn wait_for_merge(
    host: &dyn RepositoryHost,
    repo: &RepoRef,
    url: &str,
    wait: MergeWait,
) -> bool {
    let deadline = Instant::now() + wait.timeout;
    info!("Waiting up to {}s for {} to be merged", wait.timeout.as_secs(), url);

    loop {
        match host.pull_request_state(repo, url).await {
            Ok(PullRequestState::Merged) => {
                info!("{} has been merged", url);
                return true;
            }
            Ok(PullRequestState::Closed) => {
                warn!("{} was closed without merging", url);
                return false;
            }
            Ok(PullRequestState::Open) => {}
            Err(e) => warn!("Failed to check {}: {}", url, e),
        }

        if Instant::now() + wait.poll > deadline {
            return false;
        }
        tokio::time::sleep(wait.poll).await;
    }
}

/// Manager repository working tree, removed on drop when cloned
struct ManagerCheckout {
    path: PathBuf,
    _scratch: Option<TempDir>,
}

impl ManagerCheckout {
    async fn open(
        vcs: &dyn VersionControl,
        host: &dyn RepositoryHost,
        request: &DnsRequest<'_>,
    ) -> Result<Self> {
        if let Some(path) = request.manager_path {
            if !vcs.is_repository(path).await? {
                return Err(Error::InvalidArgument(format!(
                    "VPS manager path {} is not a git repository",
                    path.display()
                )));
            }
            return Ok(Self {
                path: path.to_path_buf(),
                _scratch: None,
            });
        }

        let scratch = tempfile::Builder::new().prefix("vps-manager-").tempdir()?;
        let path = scratch.path().join("repo");
        let url = host.clone_url(request.manager_repo);

        info!("Cloning {} for DNS configuration", request.manager_repo);
        vcs.clone_repository(&url, &path).await?;

        Ok(Self {
            path,
            _scratch: Some(scratch),
        })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

fn record(warnings: &mut Vec<Warning>, message: String) {
    warn!("{}", message);
    warnings.push(Warning {
        stage: Stage::DnsConfiguration,
        message,
    });
}

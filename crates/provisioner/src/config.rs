//! Configuration management for the provisioner
//!
//! Loads configuration from environment variables with sensible defaults.
//! Nothing else in the crate reads the environment; the resolved `Config` is
//! handed to the workflow and its collaborators explicitly.

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use vps_common::RepoRef;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// VPS hostname or IP address
    pub vps_host: String,

    /// Administrative SSH user on the VPS
    pub ssh_user: String,

    /// SSH connect timeout in seconds
    pub ssh_connect_timeout_secs: u64,

    /// Repository (owner/name) publishing the service template
    pub vps_manager_repo: String,

    /// Git ref of the template archive
    pub template_ref: String,

    /// Directory inside the archive holding the template tree
    pub template_subdir: String,

    /// Local template directory used instead of downloading the archive
    pub template_dir: Option<PathBuf>,

    /// Hosting domain for repositories and archives
    pub git_host: String,

    /// Internal port the service listens on
    pub app_port: u16,

    /// Branch created for new repositories
    pub default_branch: String,

    /// DNS provider API token, pushed as a secret when a domain is configured
    pub dns_provider_token: Option<String>,

    /// Local checkout of the VPS manager repository used for DNS zone changes
    pub vps_manager_path: Option<PathBuf>,

    /// How long to wait for the DNS pull request to be merged (0 = check once)
    pub dns_merge_timeout_secs: u64,

    /// Interval between merge checks
    pub dns_merge_poll_secs: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists (for local development)
        dotenvy::dotenv().ok();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let config = Config {
            vps_host: get("VPS_HOST", ""),

            ssh_user: get("SSH_USER", "root"),

            ssh_connect_timeout_secs: get("SSH_CONNECT_TIMEOUT_SECS", "10")
                .parse()
                .context("Invalid SSH_CONNECT_TIMEOUT_SECS")?,

            vps_manager_repo: get("VPS_MANAGER_REPO", ""),

            template_ref: get("TEMPLATE_REF", "main"),

            template_subdir: get("TEMPLATE_SUBDIR", "template"),

            template_dir: lookup("TEMPLATE_DIR")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),

            git_host: get("GIT_HOST", "github.com"),

            app_port: get("APP_PORT", "3000")
                .parse()
                .context("Invalid APP_PORT")?,

            default_branch: get("DEFAULT_BRANCH", "main"),

            dns_provider_token: lookup("DNS_PROVIDER_TOKEN").filter(|v| !v.is_empty()),

            vps_manager_path: lookup("VPS_MANAGER_PATH")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),

            dns_merge_timeout_secs: get("DNS_MERGE_TIMEOUT_SECS", "600")
                .parse()
                .context("Invalid DNS_MERGE_TIMEOUT_SECS")?,

            dns_merge_poll_secs: get("DNS_MERGE_POLL_SECS", "5")
                .parse()
                .context("Invalid DNS_MERGE_POLL_SECS")?,
        };

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.vps_host.is_empty() {
            anyhow::bail!("VPS_HOST environment variable is required");
        }

        if self.vps_manager_repo.is_empty() && self.template_dir.is_none() {
            anyhow::bail!("VPS_MANAGER_REPO environment variable is required");
        }

        if !self.vps_manager_repo.is_empty() {
            RepoRef::parse(&self.vps_manager_repo)
                .map_err(|e| anyhow::anyhow!("Invalid VPS_MANAGER_REPO: {}", e))?;
        }

        if self.app_port == 0 {
            anyhow::bail!("APP_PORT must be greater than 0");
        }

        if self.ssh_connect_timeout_secs == 0 {
            anyhow::bail!("SSH_CONNECT_TIMEOUT_SECS must be greater than 0");
        }

        if self.default_branch.is_empty() {
            anyhow::bail!("DEFAULT_BRANCH must not be empty");
        }

        if self.dns_merge_poll_secs == 0 {
            anyhow::bail!("DNS_MERGE_POLL_SECS must be greater than 0");
        }

        Ok(())
    }

    /// SSH destination for the administrative account
    pub fn ssh_destination(&self) -> String {
        format!("{}@{}", self.ssh_user, self.vps_host)
    }

    /// URL of the template archive for the configured ref
    pub fn template_archive_url(&self) -> String {
        format!(
            "https://{}/{}/archive/{}.tar.gz",
            self.git_host, self.vps_manager_repo, self.template_ref
        )
    }
}

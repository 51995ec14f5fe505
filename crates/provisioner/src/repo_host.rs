//! Client for the repository hosting service

use crate::command::{self, describe, CommandOutput};
use async_trait::async_trait;
use serde::Serialize;
use tokio::process::Command;
use tracing::debug;
use vps_common::{Error, RepoRef, Result};

/// A pull request to open against a hosted repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    pub head: String,
    pub base: String,
    pub title: String,
    pub body: String,
}

/// Lifecycle state of a pull request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PullRequestState {
    Open,
    Merged,
    Closed,
}

impl PullRequestState {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "OPEN" => Some(Self::Open),
            "MERGED" => Some(Self::Merged),
            "CLOSED" => Some(Self::Closed),
            _ => None,
        }
    }
}

/// Operations against hosted repositories, scoped to the caller's identity
#[async_trait]
pub trait RepositoryHost: Send + Sync {
    /// Fail early when the CLI is missing or not logged in
    async fn ensure_authenticated(&self) -> Result<()>;

    /// Login of the authenticated caller
    async fn current_user(&self) -> Result<String>;

    async fn repository_exists(&self, repo: &RepoRef) -> Result<bool>;

    async fn create_repository(&self, repo: &RepoRef, private: bool) -> Result<()>;

    /// Url used as the git remote for `repo`
    fn clone_url(&self, repo: &RepoRef) -> String;

    async fn set_secret(&self, repo: &RepoRef, name: &str, value: &str) -> Result<()>;

    async fn set_variable(&self, repo: &RepoRef, name: &str, value: &str) -> Result<()>;

    /// Open a pull request and return its url
    async fn create_pull_request(&self, repo: &RepoRef, request: &PullRequest) -> Result<String>;

    async fn pull_request_state(&self, repo: &RepoRef, url: &str) -> Result<PullRequestState>;

    /// Dispatch a `workflow_dispatch` workflow on the default branch
    async fn trigger_workflow(&self, repo: &RepoRef, workflow: &str) -> Result<()>;
}

/// `RepositoryHost` backed by the GitHub CLI (`gh`)
pub struct GhCli {
    git_host: String,
}

impl GhCli {
    pub fn new(git_host: impl Into<String>) -> Self {
        Self {
            git_host: git_host.into(),
        }
    }

    async fn gh(&self, args: &[&str], stdin: Option<&[u8]>) -> Result<CommandOutput> {
        let mut cmd = Command::new("gh");
        cmd.args(args);
        if self.git_host != "github.com" {
            cmd.env("GH_HOST", &self.git_host);
        }
        command::run(cmd, &describe("gh", args), stdin).await
    }

    async fn gh_checked(&self, args: &[&str], stdin: Option<&[u8]>) -> Result<CommandOutput> {
        let output = self.gh(args, stdin).await?;
        if !output.success() {
            return Err(Error::Command {
                command: describe("gh", args),
                message: output.failure_message(),
            });
        }
        Ok(output)
    }
}

impl Default for GhCli {
    fn default() -> Self {
        Self::new("github.com")
    }
}

#[async_trait]
impl RepositoryHost for GhCli {
    async fn ensure_authenticated(&self) -> Result<()> {
        self.gh(&["--version"], None)
            .await
            .ok()
            .filter(CommandOutput::success)
            .ok_or_else(|| {
                Error::Preflight(
                    "GitHub CLI (gh) is required. Install from https://cli.github.com/".into(),
                )
            })?;

        if !self.gh(&["auth", "status"], None).await?.success() {
            return Err(Error::Preflight(
                "GitHub CLI not authenticated. Run: gh auth login".into(),
            ));
        }

        Ok(())
    }

    async fn current_user(&self) -> Result<String> {
        let output = self.gh_checked(&["api", "user", "-q", ".login"], None).await?;
        let login = output.stdout.trim();

        if login.is_empty() {
            return Err(Error::Command {
                command: "gh api user".into(),
                message: "empty login".into(),
            });
        }

        Ok(login.to_string())
    }

    async fn repository_exists(&self, repo: &RepoRef) -> Result<bool> {
        let coordinate = repo.to_string();
        let output = self
            .gh(&["repo", "view", &coordinate, "--json", "name"], None)
            .await?;

        debug!("Repository {} exists: {}", coordinate, output.success());
        Ok(output.success())
    }

    async fn create_repository(&self, repo: &RepoRef, private: bool) -> Result<()> {
        let coordinate = repo.to_string();
        let visibility = if private { "--private" } else { "--public" };

        self.gh_checked(&["repo", "create", &coordinate, visibility], None)
            .await?;
        Ok(())
    }

    fn clone_url(&self, repo: &RepoRef) -> String {
        format!("git@{}:{}.git", self.git_host, repo)
    }

    async fn set_secret(&self, repo: &RepoRef, name: &str, value: &str) -> Result<()> {
        // Value on stdin keeps it out of the process arguments
        let coordinate = repo.to_string();
        self.gh_checked(
            &["secret", "set", name, "--repo", &coordinate],
            Some(value.as_bytes()),
        )
        .await?;
        Ok(())
    }

    async fn set_variable(&self, repo: &RepoRef, name: &str, value: &str) -> Result<()> {
        let coordinate = repo.to_string();
        self.gh_checked(
            &["variable", "set", name, "--body", value, "--repo", &coordinate],
            None,
        )
        .await?;
        Ok(())
    }

    async fn create_pull_request(&self, repo: &RepoRef, request: &PullRequest) -> Result<String> {
        let coordinate = repo.to_string();
        let output = self
            .gh_checked(
                &[
                    "pr",
                    "create",
                    "--repo",
                    &coordinate,
                    "--head",
                    &request.head,
                    "--base",
                    &request.base,
                    "--title",
                    &request.title,
                    "--body-file",
                    "-",
                ],
                Some(request.body.as_bytes()),
            )
            .await?;

        // gh prints progress lines before the url
        output
            .stdout
            .lines()
            .map(str::trim)
            .rfind(|line| line.starts_with("http"))
            .map(str::to_string)
            .ok_or_else(|| Error::Command {
                command: "gh pr create".into(),
                message: format!("no pull request url in '{}'", output.stdout.trim()),
            })
    }

    async fn pull_request_state(&self, repo: &RepoRef, url: &str) -> Result<PullRequestState> {
        let coordinate = repo.to_string();
        let output = self
            .gh_checked(
                &["pr", "view", url, "--repo", &coordinate, "--json", "state", "-q", ".state"],
                None,
            )
            .await?;

        PullRequestState::parse(&output.stdout).ok_or_else(|| Error::Command {
            command: "gh pr view".into(),
            message: format!("unknown pull request state '{}'", output.stdout.trim()),
        })
    }

    async fn trigger_workflow(&self, repo: &RepoRef, workflow: &str) -> Result<()> {
        let coordinate = repo.to_string();
        self.gh_checked(&["workflow", "run", workflow, "--repo", &coordinate], None)
            .await?;
        Ok(())
    }
}

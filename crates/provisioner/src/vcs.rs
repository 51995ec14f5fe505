//! Version control capability and its `git` CLI implementation

use crate::command::{self, describe};
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tracing::{info, warn};
use vps_common::{Error, Result};

/// Remote name used for the hosted repository
pub const DEFAULT_REMOTE: &str = "origin";

/// Message of the single commit created by the workflow
pub const TEMPLATE_COMMIT_MESSAGE: &str = "Add VPS service template";

/// Operations the workflow needs from a version control system
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Fail early when the tool is not installed
    async fn ensure_available(&self) -> Result<()>;

    async fn is_repository(&self, dir: &Path) -> Result<bool>;

    async fn init(&self, dir: &Path, branch: &str) -> Result<()>;

    /// Number of paths with uncommitted changes, untracked files included
    async fn pending_changes(&self, dir: &Path) -> Result<usize>;

    /// Stage everything and create one commit
    async fn commit_all(&self, dir: &Path, message: &str) -> Result<()>;

    async fn has_commits(&self, dir: &Path) -> Result<bool>;

    async fn remote_url(&self, dir: &Path, remote: &str) -> Result<Option<String>>;

    async fn add_remote(&self, dir: &Path, remote: &str, url: &str) -> Result<()>;

    /// Commits on HEAD not yet on the upstream branch; `None` without an upstream
    async fn commits_ahead(&self, dir: &Path) -> Result<Option<usize>>;

    async fn push(&self, dir: &Path, remote: &str, branch: &str) -> Result<()>;

    /// Shallow clone of `url` into `dest`, which must not exist yet
    async fn clone_repository(&self, url: &str, dest: &Path) -> Result<()>;

    /// Check out `branch`, creating it from HEAD when it does not exist
    async fn switch_branch(&self, dir: &Path, branch: &str) -> Result<()>;

    /// Whether `path` differs from what HEAD records
    async fn path_changed(&self, dir: &Path, path: &Path) -> Result<bool>;

    /// Commit only `paths`, leaving anything else staged untouched
    async fn commit_paths(&self, dir: &Path, paths: &[&Path], message: &str) -> Result<()>;
}

/// Result of the version-control bootstrap stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitOutcome {
    /// One commit created covering this many changed paths
    Committed { changes: usize },
    /// Working tree already clean
    NothingToCommit,
}

/// Initialize a repository if needed and commit pending changes once
pub async fn bootstrap(vcs: &dyn VersionControl, dir: &Path, branch: &str) -> Result<CommitOutcome> {
    if !vcs.is_repository(dir).await? {
        info!("Initializing git repository in {}", dir.display());
        vcs.init(dir, branch).await?;
    }

    let changes = vcs.pending_changes(dir).await?;
    if changes == 0 {
        info!("Nothing to commit in {}", dir.display());
        return Ok(CommitOutcome::NothingToCommit);
    }

    info!("Committing {} changed paths", changes);
    vcs.commit_all(dir, TEMPLATE_COMMIT_MESSAGE).await?;
    Ok(CommitOutcome::Committed { changes })
}

/// `VersionControl` backed by the `git` binary
#[derive(Debug, Default, Clone)]
pub struct GitCli;

impl GitCli {
    pub fn new() -> Self {
        Self
    }

    async fn git(&self, dir: &Path, args: &[&str]) -> Result<command::CommandOutput> {
        let mut cmd = Command::new("git");
        cmd.arg("-C").arg(dir).args(args);
        command::run(cmd, &describe("git", args), None).await
    }

    async fn git_checked(&self, dir: &Path, args: &[&str]) -> Result<command::CommandOutput> {
        let output = self.git(dir, args).await?;
        if !output.success() {
            return Err(Error::Command {
                command: describe("git", args),
                message: output.failure_message(),
            });
        }
        Ok(output)
    }
}

#[async_trait]
impl VersionControl for GitCli {
    async fn ensure_available(&self) -> Result<()> {
        let mut cmd = Command::new("git");
        cmd.arg("--version");

        command::run_checked(cmd, "git --version", None)
            .await
            .map(|_| ())
            .map_err(|_| Error::Preflight("git is required but not found".into()))
    }

    async fn is_repository(&self, dir: &Path) -> Result<bool> {
        Ok(dir.join(".git").exists())
    }

    async fn init(&self, dir: &Path, branch: &str) -> Result<()> {
        // `-b` needs git >= 2.28; older versions rename the branch afterwards
        if self.git(dir, &["init", "-b", branch]).await?.success() {
            return Ok(());
        }

        warn!("git init -b unsupported, falling back to branch rename");
        self.git_checked(dir, &["init"]).await?;
        self.git_checked(dir, &["branch", "-M", branch]).await?;
        Ok(())
    }

    async fn pending_changes(&self, dir: &Path) -> Result<usize> {
        let output = self.git_checked(dir, &["status", "--porcelain"]).await?;
        Ok(output.stdout.lines().filter(|l| !l.trim().is_empty()).count())
    }

    async fn commit_all(&self, dir: &Path, message: &str) -> Result<()> {
        self.git_checked(dir, &["add", "-A"]).await?;
        self.git_checked(dir, &["commit", "-m", message]).await?;
        Ok(())
    }

    async fn has_commits(&self, dir: &Path) -> Result<bool> {
        Ok(self
            .git(dir, &["rev-parse", "--verify", "--quiet", "HEAD"])
            .await?
            .success())
    }

    async fn remote_url(&self, dir: &Path, remote: &str) -> Result<Option<String>> {
        let output = self.git(dir, &["remote", "get-url", remote]).await?;
        if !output.success() {
            return Ok(None);
        }

        let url = output.stdout.trim();
        Ok((!url.is_empty()).then(|| url.to_string()))
    }

    async fn add_remote(&self, dir: &Path, remote: &str, url: &str) -> Result<()> {
        self.git_checked(dir, &["remote", "add", remote, url]).await?;
        Ok(())
    }

    async fn commits_ahead(&self, dir: &Path) -> Result<Option<usize>> {
        let output = self.git(dir, &["rev-list", "--count", "@{upstream}..HEAD"]).await?;
        if !output.success() {
            return Ok(None);
        }

        let count = output.stdout.trim().parse().map_err(|_| Error::Command {
            command: "git rev-list --count @{upstream}..HEAD".into(),
            message: format!("unexpected output '{}'", output.stdout.trim()),
        })?;
        Ok(Some(count))
    }

    async fn push(&self, dir: &Path, remote: &str, branch: &str) -> Result<()> {
        self.git_checked(dir, &["push", "-u", remote, branch]).await?;
        Ok(())
    }

    async fn clone_repository(&self, url: &str, dest: &Path) -> Result<()> {
        let mut cmd = Command::new("git");
        cmd.args(["clone", "--depth", "1", url]).arg(dest);
        command::run_checked(cmd, &format!("git clone {}", url), None).await?;
        Ok(())
    }

    async fn switch_branch(&self, dir: &Path, branch: &str) -> Result<()> {
        let local_ref = format!("refs/heads/{}", branch);
        let exists = self
            .git(dir, &["rev-parse", "--verify", "--quiet", &local_ref])
            .await?
            .success();

        if exists {
            self.git_checked(dir, &["switch", branch]).await?;
        } else {
            self.git_checked(dir, &["switch", "-c", branch]).await?;
        }
        Ok(())
    }

    async fn path_changed(&self, dir: &Path, path: &Path) -> Result<bool> {
        let path = path.to_string_lossy();
        let output = self
            .git_checked(dir, &["status", "--porcelain", "--", &path])
            .await?;
        Ok(!output.stdout.trim().is_empty())
    }

    async fn commit_paths(&self, dir: &Path, paths: &[&Path], message: &str) -> Result<()> {
        let paths: Vec<String> = paths.iter().map(|p| p.to_string_lossy().into_owned()).collect();

        let mut add = vec!["add", "--"];
        add.extend(paths.iter().map(String::as_str));
        self.git_checked(dir, &add).await?;

        let mut commit = vec!["commit", "-m", message, "--"];
        commit.extend(paths.iter().map(String::as_str));
        self.git_checked(dir, &commit).await?;
        Ok(())
    }
}

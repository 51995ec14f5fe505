//! In-memory stand-ins for ssh, git and the repository host

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use vps_common::{Error, RepoRef, Result};
use vps_provisioner::command::CommandOutput;
use vps_provisioner::{
    Config, DirectoryTemplateSource, PullRequest, PullRequestState, RemoteExecutor,
    RemoteScript, RepositoryHost, VersionControl, Workflow,
};
use walkdir::WalkDir;

pub const VPS_HOST: &str = "203.0.113.10";
pub const CALLER: &str = "acme";

// ---------------------------------------------------------------- remote

#[derive(Default)]
pub struct RemoteState {
    pub scripts: Vec<RemoteScript>,
    pub probes: usize,
    pub exit_code: i32,
    pub key_auth: bool,
}

#[derive(Clone)]
pub struct FakeRemote(pub Arc<Mutex<RemoteState>>);

impl FakeRemote {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(RemoteState {
            key_auth: true,
            ..Default::default()
        })))
    }

    pub fn failing(exit_code: i32) -> Self {
        let remote = Self::new();
        remote.0.lock().unwrap().exit_code = exit_code;
        remote
    }

    pub fn scripts(&self) -> Vec<RemoteScript> {
        self.0.lock().unwrap().scripts.clone()
    }
}

#[async_trait]
impl RemoteExecutor for FakeRemote {
    async fn execute(&self, script: &RemoteScript) -> Result<CommandOutput> {
        let mut state = self.0.lock().unwrap();
        state.scripts.push(script.clone());
        Ok(CommandOutput {
            code: Some(state.exit_code),
            stdout: String::new(),
            stderr: if state.exit_code == 0 {
                String::new()
            } else {
                "chown: invalid user: 'svc-billing'".into()
            },
        })
    }

    async fn check_connection(&self) -> Result<bool> {
        let mut state = self.0.lock().unwrap();
        state.probes += 1;
        Ok(state.key_auth)
    }

    fn destination(&self) -> String {
        format!("root@{}", VPS_HOST)
    }
}

// ---------------------------------------------------------------- git

#[derive(Default)]
pub struct VcsState {
    /// Tree contents at the last commit, per workspace
    pub committed: HashMap<PathBuf, BTreeMap<PathBuf, Vec<u8>>>,
    pub commits: HashMap<PathBuf, usize>,
    pub pushed: HashMap<PathBuf, usize>,
    pub remotes: HashMap<PathBuf, String>,
    pub inits: usize,
    pub pushes: usize,
    pub pushed_branches: Vec<String>,
    pub fail_push: bool,
    pub clones: Vec<(String, PathBuf)>,
    pub branches: HashMap<PathBuf, String>,
    pub commit_messages: Vec<String>,
}

#[derive(Clone)]
pub struct FakeVcs(pub Arc<Mutex<VcsState>>);

impl FakeVcs {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(VcsState::default())))
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, VcsState> {
        self.0.lock().unwrap()
    }
}

/// Every file under `dir` except `.git`
pub fn tree(dir: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    WalkDir::new(dir)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git")
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let rel = e.path().strip_prefix(dir).unwrap().to_path_buf();
            (rel, fs::read(e.path()).unwrap())
        })
        .collect()
}

#[async_trait]
impl VersionControl for FakeVcs {
    async fn ensure_available(&self) -> Result<()> {
        Ok(())
    }

    async fn is_repository(&self, dir: &Path) -> Result<bool> {
        Ok(dir.join(".git").exists())
    }

    async fn init(&self, dir: &Path, _branch: &str) -> Result<()> {
        fs::create_dir_all(dir.join(".git"))?;
        self.state().inits += 1;
        Ok(())
    }

    async fn pending_changes(&self, dir: &Path) -> Result<usize> {
        let current = tree(dir);
        let state = self.state();
        let committed = state.committed.get(dir).cloned().unwrap_or_default();

        let paths: HashSet<&PathBuf> = current.keys().chain(committed.keys()).collect();
        Ok(paths
            .into_iter()
            .filter(|p| current.get(*p) != committed.get(*p))
            .count())
    }

    async fn commit_all(&self, dir: &Path, _message: &str) -> Result<()> {
        let current = tree(dir);
        let mut state = self.state();
        state.committed.insert(dir.to_path_buf(), current);
        *state.commits.entry(dir.to_path_buf()).or_default() += 1;
        Ok(())
    }

    async fn has_commits(&self, dir: &Path) -> Result<bool> {
        Ok(self.state().commits.get(dir).copied().unwrap_or(0) > 0)
    }

    async fn remote_url(&self, dir: &Path, _remote: &str) -> Result<Option<String>> {
        Ok(self.state().remotes.get(dir).cloned())
    }

    async fn add_remote(&self, dir: &Path, _remote: &str, url: &str) -> Result<()> {
        let mut state = self.state();
        if state.remotes.contains_key(dir) {
            return Err(Error::Command {
                command: "git remote add".into(),
                message: "remote origin already exists".into(),
            });
        }
        state.remotes.insert(dir.to_path_buf(), url.to_string());
        Ok(())
    }

    async fn commits_ahead(&self, dir: &Path) -> Result<Option<usize>> {
        let state = self.state();
        let commits = state.commits.get(dir).copied().unwrap_or(0);
        Ok(state.pushed.get(dir).map(|pushed| commits - pushed))
    }

    async fn push(&self, dir: &Path, _remote: &str, branch: &str) -> Result<()> {
        let mut state = self.state();
        if state.fail_push {
            return Err(Error::Command {
                command: "git push".into(),
                message: "rejected: non-fast-forward".into(),
            });
        }
        let commits = state.commits.get(dir).copied().unwrap_or(0);
        state.pushed.insert(dir.to_path_buf(), commits);
        state.pushes += 1;
        state.pushed_branches.push(branch.to_string());
        Ok(())
    }

    async fn clone_repository(&self, url: &str, dest: &Path) -> Result<()> {
        fs::create_dir_all(dest.join(".git"))?;
        self.state().clones.push((url.to_string(), dest.to_path_buf()));
        Ok(())
    }

    async fn switch_branch(&self, dir: &Path, branch: &str) -> Result<()> {
        self.state()
            .branches
            .insert(dir.to_path_buf(), branch.to_string());
        Ok(())
    }

    async fn path_changed(&self, dir: &Path, path: &Path) -> Result<bool> {
        let current = fs::read(dir.join(path)).ok();
        let state = self.state();
        let committed = state.committed.get(dir).and_then(|tree| tree.get(path));
        Ok(current.as_ref() != committed)
    }

    async fn commit_paths(&self, dir: &Path, _paths: &[&Path], message: &str) -> Result<()> {
        self.commit_all(dir, message).await?;
        self.state().commit_messages.push(message.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------- host

#[derive(Default)]
pub struct HostState {
    pub existing: HashSet<String>,
    pub created: Vec<(String, bool)>,
    pub secrets: BTreeMap<String, String>,
    pub variables: BTreeMap<String, String>,
    pub failing_values: HashSet<String>,
    pub calls: usize,
    pub pull_requests: Vec<(String, PullRequest)>,
    pub pull_request_state: Option<PullRequestState>,
    pub workflow_runs: Vec<(String, String)>,
}

#[derive(Clone)]
pub struct FakeHost(pub Arc<Mutex<HostState>>);

impl FakeHost {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(HostState {
            pull_request_state: Some(PullRequestState::Merged),
            ..Default::default()
        })))
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, HostState> {
        self.0.lock().unwrap()
    }
}

#[async_trait]
impl RepositoryHost for FakeHost {
    async fn ensure_authenticated(&self) -> Result<()> {
        self.state().calls += 1;
        Ok(())
    }

    async fn current_user(&self) -> Result<String> {
        self.state().calls += 1;
        Ok(CALLER.to_string())
    }

    async fn repository_exists(&self, repo: &RepoRef) -> Result<bool> {
        let mut state = self.state();
        state.calls += 1;
        Ok(state.existing.contains(&repo.to_string()))
    }

    async fn create_repository(&self, repo: &RepoRef, private: bool) -> Result<()> {
        let mut state = self.state();
        state.calls += 1;
        state.existing.insert(repo.to_string());
        state.created.push((repo.to_string(), private));
        Ok(())
    }

    fn clone_url(&self, repo: &RepoRef) -> String {
        format!("git@github.com:{}.git", repo)
    }

    async fn set_secret(&self, _repo: &RepoRef, name: &str, value: &str) -> Result<()> {
        let mut state = self.state();
        state.calls += 1;
        if state.failing_values.contains(name) {
            return Err(Error::Command {
                command: format!("gh secret set {}", name),
                message: "HTTP 502".into(),
            });
        }
        state.secrets.insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn set_variable(&self, _repo: &RepoRef, name: &str, value: &str) -> Result<()> {
        let mut state = self.state();
        state.calls += 1;
        if state.failing_values.contains(name) {
            return Err(Error::Command {
                command: format!("gh variable set {}", name),
                message: "HTTP 502".into(),
            });
        }
        state.variables.insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn create_pull_request(&self, repo: &RepoRef, request: &PullRequest) -> Result<String> {
        let mut state = self.state();
        state.calls += 1;
        state.pull_requests.push((repo.to_string(), request.clone()));
        Ok(format!(
            "https://github.com/{}/pull/{}",
            repo,
            state.pull_requests.len()
        ))
    }

    async fn pull_request_state(&self, _repo: &RepoRef, url: &str) -> Result<PullRequestState> {
        let mut state = self.state();
        state.calls += 1;
        state.pull_request_state.ok_or_else(|| Error::Command {
            command: format!("gh pr view {}", url),
            message: "HTTP 502".into(),
        })
    }

    async fn trigger_workflow(&self, repo: &RepoRef, workflow: &str) -> Result<()> {
        let mut state = self.state();
        state.calls += 1;
        if state.failing_values.contains(workflow) {
            return Err(Error::Command {
                command: format!("gh workflow run {}", workflow),
                message: "workflow does not have 'workflow_dispatch' trigger".into(),
            });
        }
        state.workflow_runs.push((repo.to_string(), workflow.to_string()));
        Ok(())
    }
}

// ---------------------------------------------------------------- harness

pub const TEMPLATE_FILES: &[(&str, &str)] = &[
    (
        "docker-compose.yml",
        "services:\n  myapp:\n    labels:\n      - traefik.http.routers.myapp.rule=Host(`myapp.example.com`)\n",
    ),
    ("package.json", "{\n  \"name\": \"app-template\"\n}\n"),
    ("README.md", "# myapp\n\nServed at https://myapp.example.com\n"),
    ("Dockerfile", "FROM node:20-alpine\nEXPOSE 3000\n"),
    (".github/workflows/deploy.yml", "name: Deploy myapp\n"),
];

/// Template directory, workspace parent and the fakes wired into a workflow
pub struct Harness {
    pub template: TempDir,
    pub root: TempDir,
    pub remote: FakeRemote,
    pub vcs: FakeVcs,
    pub host: FakeHost,
    /// Extra configuration keys on top of the host and template directory
    pub env: HashMap<String, String>,
}

impl Harness {
    pub fn new() -> Self {
        let template = tempfile::tempdir().unwrap();
        for (path, content) in TEMPLATE_FILES {
            let dest = template.path().join(path);
            fs::create_dir_all(dest.parent().unwrap()).unwrap();
            fs::write(dest, content).unwrap();
        }

        Self {
            template,
            root: tempfile::tempdir().unwrap(),
            remote: FakeRemote::new(),
            vcs: FakeVcs::new(),
            host: FakeHost::new(),
            env: HashMap::new(),
        }
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.env.insert(key.to_string(), value.into());
    }

    pub fn workspace(&self, name: &str) -> PathBuf {
        self.root.path().join(name)
    }

    pub fn config(&self) -> Config {
        let template_dir = self.template.path().display().to_string();
        Config::from_lookup(|key| match key {
            "VPS_HOST" => Some(VPS_HOST.to_string()),
            "TEMPLATE_DIR" => Some(template_dir.clone()),
            _ => self.env.get(key).cloned(),
        })
        .unwrap()
    }

    pub fn workflow(&self) -> Workflow {
        Workflow::new(
            self.config(),
            Box::new(self.remote.clone()),
            Box::new(self.vcs.clone()),
            Box::new(self.host.clone()),
            Box::new(DirectoryTemplateSource::new(self.template.path())),
        )
    }
}

//! Per-service Unix accounts on the VPS
//!
//! Every service owns an OS user `svc-<name>` and three directories:
//! application code under `/apps`, persistent data under `/persistent` and
//! logs under `/logs`. All operations here render a shell batch and hand it to
//! a [`RemoteExecutor`].

use crate::remote::{RemoteExecutor, RemoteScript};
use serde::Serialize;
use tracing::{info, warn};
use vps_common::{Credential, Error, Result, ServiceName};

/// Group granting access to the container runtime socket
pub const CONTAINER_GROUP: &str = "docker";

/// Mode applied to every service directory
pub const DIRECTORY_MODE: &str = "755";

/// Account provisioned on the target host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteAccount {
    pub user: String,
    pub directories: Vec<String>,
}

impl RemoteAccount {
    pub fn for_service(name: &ServiceName) -> Self {
        Self {
            user: name.service_user(),
            directories: service_directories(name),
        }
    }
}

/// The three directories owned by a service account
pub fn service_directories(name: &ServiceName) -> Vec<String> {
    vec![
        format!("/apps/{}", name),
        format!("/persistent/{}/data", name),
        format!("/logs/{}", name),
    ]
}

/// Top-level directories removed by a purge
fn service_roots(name: &ServiceName) -> Vec<String> {
    vec![
        format!("/apps/{}", name),
        format!("/persistent/{}", name),
        format!("/logs/{}", name),
    ]
}

/// Quote a value for a POSIX shell
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Batch used by the provisioning workflow: a login account with a password.
///
/// An existing user is reused; password, group and directories are applied
/// again on every run.
pub fn provisioning_script(name: &ServiceName, credential: &Credential) -> RemoteScript {
    let user = name.service_user();
    let dirs = service_directories(name).join(" ");

    RemoteScript::new(format!("Provisioning service account {}", user))
        .line(format!(
            "id -u {user} >/dev/null 2>&1 || useradd -m -s /bin/bash -d /home/{user} {user}"
        ))
        .line(format!(
            "printf '%s\\n' {} | chpasswd",
            shell_quote(&format!("{}:{}", user, credential.expose()))
        ))
        .line(format!("usermod -aG {} {}", CONTAINER_GROUP, user))
        .line(format!("mkdir -p {}", dirs))
        .line(format!("chown {user}:{user} {dirs}"))
        .line(format!("chmod {} {}", DIRECTORY_MODE, dirs))
        .secret(credential.expose())
}

/// Batch for a non-login system account, optionally authorizing an SSH key
pub fn service_account_script(name: &ServiceName, ssh_key: Option<&str>) -> RemoteScript {
    let user = name.service_user();
    let home = format!("/apps/{}", name);
    let mut dirs = service_directories(name);
    dirs.push(format!("/persistent/{}", name));
    dirs.push(format!("/persistent/{}/config", name));
    dirs.push(format!("/persistent/{}/backups", name));
    let dirs = dirs.join(" ");

    let mut script = RemoteScript::new(format!("Creating service account {}", user))
        .line(format!(
            "id -u {user} >/dev/null 2>&1 || useradd {user} --system --shell /usr/sbin/nologin \
             --home-dir {home} --no-create-home --comment {}",
            shell_quote(&format!("Service account for {}", name))
        ))
        .line(format!("usermod -aG {} {}", CONTAINER_GROUP, user))
        .line(format!("mkdir -p {}", dirs))
        .line(format!("chown {user}:{user} {dirs}"))
        .line(format!("chmod {} {}", DIRECTORY_MODE, dirs));

    if let Some(key) = ssh_key {
        let ssh_dir = format!("{}/.ssh", home);
        script = script.lines([
            format!("mkdir -p {}", ssh_dir),
            format!("touch {}/authorized_keys", ssh_dir),
            format!(
                "grep -qxF {key} {dir}/authorized_keys || printf '%s\\n' {key} >> {dir}/authorized_keys",
                key = shell_quote(key.trim()),
                dir = ssh_dir
            ),
            format!("chown -R {user}:{user} {}", ssh_dir),
            format!("chmod 700 {}", ssh_dir),
            format!("chmod 600 {}/authorized_keys", ssh_dir),
        ]);
    }

    script
}

/// Batch removing an account, and with `purge` all of its directories
pub fn removal_script(name: &ServiceName, purge: bool) -> RemoteScript {
    let user = name.service_user();
    let mut script =
        RemoteScript::new(format!("Removing service account {}", user)).line(format!("userdel {}", user));

    if purge {
        script = script.line(format!("rm -rf {}", service_roots(name).join(" ")));
    }

    script
}

pub fn list_script() -> RemoteScript {
    RemoteScript::new("Listing service accounts")
        .line("getent passwd | cut -d: -f1 | grep '^svc-' || true")
}

pub fn check_script(name: &ServiceName) -> RemoteScript {
    let user = name.service_user();
    let mut script = RemoteScript::new(format!("Checking service account {}", user))
        .line(format!(
            "if id -u {user} >/dev/null 2>&1; then echo user=present; echo uid=$(id -u {user}); else echo user=absent; fi"
        ))
        .line(format!(
            "case \" $(id -nG {user} 2>/dev/null || true) \" in *\" {group} \"*) echo group=yes ;; *) echo group=no ;; esac",
            group = CONTAINER_GROUP
        ));

    for dir in service_directories(name) {
        script = script.line(format!(
            "if [ -d {dir} ]; then echo dir={dir}:$(stat -c %U {dir}); else echo dir={dir}:; fi"
        ));
    }

    script
}

/// Service user names found in `list_script` output
pub fn parse_account_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| l.starts_with(vps_common::service::SERVICE_USER_PREFIX))
        .map(str::to_string)
        .collect()
}

/// State of one service directory on the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryStatus {
    pub path: String,
    /// Owning user, `None` when the directory does not exist
    pub owner: Option<String>,
}

/// Parsed `check_script` output
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct AccountStatus {
    pub user_exists: bool,
    pub uid: Option<u32>,
    pub in_container_group: bool,
    pub directories: Vec<DirectoryStatus>,
}

impl AccountStatus {
    pub fn parse(stdout: &str) -> Self {
        let mut status = AccountStatus::default();

        for line in stdout.lines() {
            let Some((key, value)) = line.trim().split_once('=') else {
                continue;
            };

            match key {
                "user" => status.user_exists = value == "present",
                "uid" => status.uid = value.parse().ok(),
                "group" => status.in_container_group = value == "yes",
                "dir" => {
                    if let Some((path, owner)) = value.rsplit_once(':') {
                        status.directories.push(DirectoryStatus {
                            path: path.to_string(),
                            owner: (!owner.is_empty()).then(|| owner.to_string()),
                        });
                    }
                }
                _ => {}
            }
        }

        status
    }

    /// Whether the account matches what provisioning creates
    pub fn is_complete(&self, name: &ServiceName) -> bool {
        let user = name.service_user();
        self.user_exists
            && self.in_container_group
            && self
                .directories
                .iter()
                .all(|d| d.owner.as_deref() == Some(user.as_str()))
    }
}

/// Create the workflow's login account. Any non-zero exit fails the whole batch.
pub async fn provision_account(
    executor: &dyn RemoteExecutor,
    name: &ServiceName,
    credential: &Credential,
) -> Result<RemoteAccount> {
    let script = provisioning_script(name, credential);

    let output = executor
        .execute(&script)
        .await
        .map_err(|e| Error::RemoteProvisioningFailed(e.to_string()))?;

    if !output.success() {
        return Err(Error::RemoteProvisioningFailed(format!(
            "{} on {}: {}",
            script.description,
            executor.destination(),
            output.failure_message()
        )));
    }

    let account = RemoteAccount::for_service(name);
    info!("Service user {} provisioned", account.user);
    Ok(account)
}

/// Account operations driven by the `manage-accounts` binary
pub struct AccountManager<'a> {
    executor: &'a dyn RemoteExecutor,
}

impl<'a> AccountManager<'a> {
    pub fn new(executor: &'a dyn RemoteExecutor) -> Self {
        Self { executor }
    }

    async fn run(&self, script: RemoteScript) -> Result<String> {
        let output = self.executor.execute(&script).await?;

        if !output.success() {
            return Err(Error::RemoteProvisioningFailed(format!(
                "{}: {}",
                script.description,
                output.failure_message()
            )));
        }

        Ok(output.stdout)
    }

    pub async fn create(&self, name: &ServiceName, ssh_key: Option<&str>) -> Result<RemoteAccount> {
        if let Some(key) = ssh_key {
            if key.trim().is_empty() || key.contains('\n') {
                return Err(Error::InvalidArgument(
                    "SSH public key must be a single non-empty line".into(),
                ));
            }
        }

        self.run(service_account_script(name, ssh_key)).await?;
        info!("Service account {} created", name.service_user());
        Ok(RemoteAccount::for_service(name))
    }

    pub async fn remove(&self, name: &ServiceName, purge: bool) -> Result<()> {
        if !purge {
            info!("Keeping data directories for {} (use --purge to remove)", name);
        } else {
            warn!("Removing all service directories for {}", name);
        }

        self.run(removal_script(name, purge)).await?;
        info!("Service account {} removed", name.service_user());
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<String>> {
        let stdout = self.run(list_script()).await?;
        Ok(parse_account_list(&stdout))
    }

    pub async fn check(&self, name: &ServiceName) -> Result<AccountStatus> {
        let stdout = self.run(check_script(name)).await?;
        Ok(AccountStatus::parse(&stdout))
    }
}

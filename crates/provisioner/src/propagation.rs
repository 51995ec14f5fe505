//! Secret and variable propagation into the hosted repository
//!
//! Best effort: every value is attempted, individual failures are reported
//! and the stage still completes. Only a missing repository is fatal.

use crate::repo_host::RepositoryHost;
use serde::Serialize;
use tracing::{info, warn};
use vps_common::{Credential, Domain, Error, RepoRef, Result};

/// Whether a value lands in the secret store or the plain variable store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Secret,
    Variable,
}

/// One named value to push
pub struct RepositoryValue<'a> {
    pub kind: ValueKind,
    pub name: &'static str,
    pub value: &'a str,
}

/// Inputs of the propagation stage
pub struct PropagationPlan<'a> {
    pub vps_host: &'a str,
    pub service_user: &'a str,
    pub credential: &'a Credential,
    pub domain: Option<&'a Domain>,
    pub app_port: u16,
    pub dns_provider_token: Option<&'a str>,
}

impl<'a> PropagationPlan<'a> {
    /// Values pushed for this plan: secrets first, then variables
    pub fn values(&self, port: &'a str) -> Vec<RepositoryValue<'a>> {
        let mut values = vec![
            RepositoryValue {
                kind: ValueKind::Secret,
                name: "VPS_HOST",
                value: self.vps_host,
            },
            RepositoryValue {
                kind: ValueKind::Secret,
                name: "VPS_USER",
                value: self.service_user,
            },
            RepositoryValue {
                kind: ValueKind::Secret,
                name: "VPS_PASSWORD",
                value: self.credential.expose(),
            },
        ];

        if let (Some(_), Some(token)) = (self.domain, self.dns_provider_token) {
            values.push(RepositoryValue {
                kind: ValueKind::Secret,
                name: "DNS_PROVIDER_TOKEN",
                value: token,
            });
        }

        values.push(RepositoryValue {
            kind: ValueKind::Variable,
            name: "APP_PORT",
            value: port,
        });

        if let Some(domain) = self.domain {
            values.push(RepositoryValue {
                kind: ValueKind::Variable,
                name: "APP_DOMAIN",
                value: domain.as_str(),
            });
        }

        values
    }
}

/// Names pushed successfully and names that failed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PropagationReport {
    pub secrets_set: Vec<String>,
    pub variables_set: Vec<String>,
    pub failed: Vec<FailedValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedValue {
    pub kind: ValueKind,
    pub name: String,
    pub error: String,
}

/// Push every value of `plan` into `repo`
pub async fn propagate(
    host: &dyn RepositoryHost,
    repo: Option<&RepoRef>,
    plan: &PropagationPlan<'_>,
) -> Result<PropagationReport> {
    let repo = repo.ok_or(Error::NoRemoteConfigured)?;
    let port = plan.app_port.to_string();
    let mut report = PropagationReport::default();

    info!("Setting up repository secrets for {}", repo);

    for item in plan.values(&port) {
        let result = match item.kind {
            ValueKind::Secret => host.set_secret(repo, item.name, item.value).await,
            ValueKind::Variable => host.set_variable(repo, item.name, item.value).await,
        };

        match (result, item.kind) {
            (Ok(()), ValueKind::Secret) => report.secrets_set.push(item.name.to_string()),
            (Ok(()), ValueKind::Variable) => report.variables_set.push(item.name.to_string()),
            (Err(e), kind) => {
                warn!("Failed to set {:?} {}: {}", kind, item.name, e);
                report.failed.push(FailedValue {
                    kind,
                    name: item.name.to_string(),
                    error: e.to_string(),
                });
            }
        }
    }

    Ok(report)
}

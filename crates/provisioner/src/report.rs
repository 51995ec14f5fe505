//! Stages, warnings and the final outcome of a provisioning run

use crate::accounts::RemoteAccount;
use crate::dns::DnsReport;
use crate::propagation::PropagationReport;
use crate::template::MaterializeReport;
use crate::vcs::CommitOutcome;
use crate::workspace::WorkspaceState;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use vps_common::{Credential, Error, RepoRef, ServiceDescriptor};

/// Workflow stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validation,
    WorkspaceInspection,
    Preflight,
    CredentialGeneration,
    RemoteProvisioning,
    WorkspacePreparation,
    TemplateMaterialization,
    PlaceholderSubstitution,
    VersionControl,
    RepositoryBinding,
    SecretPropagation,
    DnsConfiguration,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Validation => "validation",
            Stage::WorkspaceInspection => "workspace inspection",
            Stage::Preflight => "preflight",
            Stage::CredentialGeneration => "credential generation",
            Stage::RemoteProvisioning => "remote provisioning",
            Stage::WorkspacePreparation => "workspace preparation",
            Stage::TemplateMaterialization => "template materialization",
            Stage::PlaceholderSubstitution => "placeholder substitution",
            Stage::VersionControl => "version control",
            Stage::RepositoryBinding => "repository binding",
            Stage::SecretPropagation => "secret propagation",
            Stage::DnsConfiguration => "dns configuration",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fatal failure: the stage it happened in and the underlying cause
#[derive(Error, Debug)]
#[error("{stage} failed: {error}")]
pub struct WorkflowError {
    pub stage: Stage,
    #[source]
    pub error: Error,
}

impl WorkflowError {
    pub fn new(stage: Stage, error: Error) -> Self {
        Self { stage, error }
    }
}

/// A non-fatal problem recorded while the workflow kept going
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Warning {
    pub stage: Stage,
    pub message: String,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.stage, self.message)
    }
}

/// Everything a successful run produced
#[derive(Debug, Serialize)]
pub struct ProvisionOutcome {
    pub service: ServiceDescriptor,
    pub account: RemoteAccount,
    /// Shown to the operator once; never serialized
    #[serde(skip)]
    pub credential: Credential,
    pub repository: RepoRef,
    pub workspace: WorkspaceState,
    pub materialized: MaterializeReport,
    pub substituted: Vec<PathBuf>,
    pub commit: CommitOutcome,
    pub propagation: PropagationReport,
    /// Present when a domain and DNS provider were given
    pub dns: Option<DnsReport>,
    pub warnings: Vec<Warning>,
}

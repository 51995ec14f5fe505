//! VPS Service Provisioner
//!
//! Creates a deployable service in one run: an isolated Unix account on the
//! VPS, a local working tree seeded from the service template, a hosted
//! repository bound to it, and the repository secrets its deploy automation
//! needs.
//!
//! ## Architecture
//!
//! Every external system sits behind a narrow capability so the workflow can
//! be driven entirely by fakes in tests:
//! - `remote`: [`RemoteExecutor`] (ssh)
//! - `vcs`: [`VersionControl`] (git)
//! - `repo_host`: [`RepositoryHost`] (GitHub CLI)
//! - `template`: [`TemplateSource`] (archive download or local directory)
//!
//! The stages live in `accounts`, `workspace`, `template`, `placeholder`,
//! `vcs`, `binding`, `propagation` and `dns`; `workflow` sequences them.

pub mod accounts;
pub mod binding;
pub mod command;
pub mod config;
pub mod dns;
pub mod placeholder;
pub mod propagation;
pub mod remote;
pub mod repo_host;
pub mod report;
pub mod template;
pub mod vcs;
pub mod workflow;
pub mod workspace;

pub use accounts::{AccountManager, AccountStatus, RemoteAccount};
pub use config::Config;
pub use dns::{DnsReport, ZoneStatus};
pub use placeholder::{SubstitutionTable, Substitutions};
pub use propagation::PropagationReport;
pub use remote::{RemoteExecutor, RemoteScript, SshExecutor};
pub use repo_host::{GhCli, PullRequest, PullRequestState, RepositoryHost};
pub use report::{ProvisionOutcome, Stage, Warning, WorkflowError};
pub use template::{ArchiveTemplateSource, DirectoryTemplateSource, TemplateSource};
pub use vcs::{CommitOutcome, GitCli, VersionControl};
pub use workflow::Workflow;
pub use workspace::WorkspaceState;

/// Pick the template source configured for this run
pub fn template_source(config: &Config) -> Box<dyn TemplateSource> {
    match &config.template_dir {
        Some(dir) => Box::new(DirectoryTemplateSource::new(dir)),
        None => Box::new(ArchiveTemplateSource::from_config(config)),
    }
}

/// Initialize tracing for the binaries
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vps_provisioner=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .compact(),
        )
        .init();
}

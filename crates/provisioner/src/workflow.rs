//! The create-service workflow
//!
//! Stages run strictly in sequence; each external call is attempted exactly
//! once. Workspace inspection only reads the local disk and runs before
//! anything touches the VPS or the repository host. A fatal error aborts the
//! run with the failing stage attached, and nothing already applied is
//! rolled back. Every stage after remote provisioning is safe to repeat, so
//! re-running with the same inputs is the recovery path.

use crate::accounts;
use crate::binding::{self, BindingRequest};
use crate::config::Config;
use crate::dns::{self, DnsReport, DnsRequest, MergeWait};
use crate::placeholder::{self, SubstitutionTable, Substitutions};
use crate::propagation::{self, PropagationPlan};
use crate::remote::RemoteExecutor;
use crate::repo_host::RepositoryHost;
use crate::report::{ProvisionOutcome, Stage, Warning, WorkflowError};
use crate::template::{self, TemplateSource};
use crate::vcs::{self, VersionControl};
use crate::workspace;
use std::time::Duration;
use tracing::{info, warn};
use vps_common::credential::{generate_credential, DEFAULT_CREDENTIAL_LEN};
use vps_common::{Error, RepoRef, ServiceDescriptor, ServiceRequest};

type StageResult<T> = std::result::Result<T, WorkflowError>;

trait AtStage<T> {
    fn at(self, stage: Stage) -> StageResult<T>;
}

impl<T> AtStage<T> for vps_common::Result<T> {
    fn at(self, stage: Stage) -> StageResult<T> {
        self.map_err(|error| WorkflowError::new(stage, error))
    }
}

/// Provisioning workflow wired to its collaborators
pub struct Workflow {
    config: Config,
    remote: Box<dyn RemoteExecutor>,
    vcs: Box<dyn VersionControl>,
    host: Box<dyn RepositoryHost>,
    templates: Box<dyn TemplateSource>,
    substitutions: SubstitutionTable,
}

impl Workflow {
    pub fn new(
        config: Config,
        remote: Box<dyn RemoteExecutor>,
        vcs: Box<dyn VersionControl>,
        host: Box<dyn RepositoryHost>,
        templates: Box<dyn TemplateSource>,
    ) -> Self {
        Self {
            config,
            remote,
            vcs,
            host,
            templates,
            substitutions: SubstitutionTable::default(),
        }
    }

    /// Replace the placeholder table
    pub fn with_substitutions(mut self, table: SubstitutionTable) -> Self {
        self.substitutions = table;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run every stage for one service
    pub async fn run(
        &self,
        request: &ServiceRequest,
        dns_provider: Option<&str>,
    ) -> StageResult<ProvisionOutcome> {
        let mut warnings = Vec::new();

        let service = request.validate().at(Stage::Validation)?;
        let path = service.local_path.as_path();
        info!("Creating service {} in {}", service.name, path.display());

        let state = workspace::inspect(path, self.vcs.as_ref())
            .await
            .at(Stage::WorkspaceInspection)?;
        workspace::check_binding(&state, service.repo_ref.as_ref())
            .at(Stage::WorkspaceInspection)?;
        info!("Workspace state: {:?}", state);

        self.preflight(&mut warnings).await?;

        let credential = generate_credential(DEFAULT_CREDENTIAL_LEN);

        let account = accounts::provision_account(self.remote.as_ref(), &service.name, &credential)
            .await
            .at(Stage::RemoteProvisioning)?;

        workspace::prepare(path, &state).at(Stage::WorkspacePreparation)?;

        let snapshot = self
            .templates
            .fetch()
            .await
            .at(Stage::TemplateMaterialization)?;
        let materialized =
            template::materialize(snapshot.root(), path).at(Stage::TemplateMaterialization)?;
        drop(snapshot);

        for skipped in &materialized.skipped {
            warnings.push(Warning {
                stage: Stage::TemplateMaterialization,
                message: format!("Skipped existing file {}", skipped.display()),
            });
        }

        let values = Substitutions {
            name: service.name.clone(),
            domain: service.domain.clone(),
            dns_provider: dns_provider.map(str::to_string),
        };
        let substituted = placeholder::substitute_tree(path, &self.substitutions, &values)
            .at(Stage::PlaceholderSubstitution)?;

        let commit = vcs::bootstrap(self.vcs.as_ref(), path, &self.config.default_branch)
            .await
            .at(Stage::VersionControl)?;

        let binding_request = BindingRequest {
            dir: path,
            name: &service.name,
            explicit: service.repo_ref.as_ref(),
            workspace: &state,
            branch: &self.config.default_branch,
        };
        let repository = binding::bind(
            self.vcs.as_ref(),
            self.host.as_ref(),
            &binding_request,
            &mut warnings,
        )
        .await
        .at(Stage::RepositoryBinding)?;

        let plan = PropagationPlan {
            vps_host: &self.config.vps_host,
            service_user: &account.user,
            credential: &credential,
            domain: service.domain.as_ref(),
            app_port: self.config.app_port,
            dns_provider_token: self.config.dns_provider_token.as_deref(),
        };
        let propagation = propagation::propagate(self.host.as_ref(), Some(&repository), &plan)
            .await
            .at(Stage::SecretPropagation)?;

        warnings.extend(propagation.failed.iter().map(|failed| Warning {
            stage: Stage::SecretPropagation,
            message: format!("Failed to set {}: {}", failed.name, failed.error),
        }));

        let dns = self
            .configure_dns(&service, &repository, dns_provider, &mut warnings)
            .await;

        info!(
            "Service {} created with {} warnings",
            service.name,
            warnings.len()
        );

        Ok(ProvisionOutcome {
            service,
            account,
            credential,
            repository,
            workspace: state,
            materialized,
            substituted,
            commit,
            propagation,
            dns,
            warnings,
        })
    }

    /// Propose the zone for the service domain; every failure is a warning
    async fn configure_dns(
        &self,
        service: &ServiceDescriptor,
        repository: &RepoRef,
        dns_provider: Option<&str>,
        warnings: &mut Vec<Warning>,
    ) -> Option<DnsReport> {
        let (Some(domain), Some(provider)) = (service.domain.as_ref(), dns_provider) else {
            return None;
        };
        info!("Configuring {} DNS for {}", provider, domain);

        if self.config.dns_provider_token.is_none() {
            dns_warning(
                warnings,
                format!(
                    "DNS_PROVIDER_TOKEN not set; {} will fail until the secret exists",
                    dns::DNS_APPLY_WORKFLOW
                ),
            );
        }

        let Ok(manager_repo) = RepoRef::parse(&self.config.vps_manager_repo) else {
            dns_warning(
                warnings,
                "VPS_MANAGER_REPO not configured, skipping DNS zone setup".to_string(),
            );
            return None;
        };

        let address = dns::resolve_address(&self.config.vps_host).await;
        let request = DnsRequest {
            domain,
            service: &service.name,
            address: &address,
            manager_repo: &manager_repo,
            manager_path: self.config.vps_manager_path.as_deref(),
            service_repo: repository,
            base_branch: &self.config.default_branch,
            wait: MergeWait {
                timeout: Duration::from_secs(self.config.dns_merge_timeout_secs),
                poll: Duration::from_secs(self.config.dns_merge_poll_secs),
            },
        };

        match dns::configure(self.vcs.as_ref(), self.host.as_ref(), &request, warnings).await {
            Ok(report) => Some(report),
            Err(e) => {
                dns_warning(
                    warnings,
                    format!("DNS configuration for {} failed: {}", domain, e),
                );
                None
            }
        }
    }

    async fn preflight(&self, warnings: &mut Vec<Warning>) -> StageResult<()> {
        self.vcs.ensure_available().await.at(Stage::Preflight)?;
        self.host.ensure_authenticated().await.at(Stage::Preflight)?;

        let message = match self.remote.check_connection().await {
            Ok(true) => {
                info!("SSH key authentication to {} successful", self.remote.destination());
                return Ok(());
            }
            Ok(false) => format!(
                "SSH key authentication to {} failed; ssh may prompt for a password",
                self.remote.destination()
            ),
            Err(Error::Command { message, .. }) => format!("ssh unavailable: {}", message),
            Err(e) => format!("SSH probe failed: {}", e),
        };

        warn!("{}", message);
        warnings.push(Warning {
            stage: Stage::Preflight,
            message,
        });
        Ok(())
    }
}

fn dns_warning(warnings: &mut Vec<Warning>, message: String) {
    warn!("{}", message);
    warnings.push(Warning {
        stage: Stage::DnsConfiguration,
        message,
    });
}

//! VPS Service Creator
//!
//! Creates a service user on the VPS, sets the service up from the template,
//! configures its GitHub repository and secrets, and optionally proposes the
//! DNS zone for its domain.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::{Path, PathBuf};
use tracing::info;
use vps_common::{RepoRef, ServiceRequest};
use vps_provisioner::dns::DNS_APPLY_WORKFLOW;
use vps_provisioner::{
    init_tracing, template_source, CommitOutcome, Config, GhCli, GitCli, ProvisionOutcome,
    SshExecutor, Workflow, ZoneStatus,
};

/// Supported DNS providers
#[derive(Debug, Clone, Copy, ValueEnum)]
enum DnsProvider {
    Cloudflare,
    Netlify,
    Digitalocean,
    Dnsimple,
    Linode,
}

impl DnsProvider {
    fn as_str(&self) -> &'static str {
        match self {
            DnsProvider::Cloudflare => "cloudflare",
            DnsProvider::Netlify => "netlify",
            DnsProvider::Digitalocean => "digitalocean",
            DnsProvider::Dnsimple => "dnsimple",
            DnsProvider::Linode => "linode",
        }
    }
}

#[derive(Parser)]
#[command(name = "create-service")]
#[command(version, about = "Create a VPS service: user, template, repository and secrets")]
struct Cli {
    /// Name of the service
    service_name: String,

    /// Local directory for the service
    local_path: PathBuf,

    /// Domain name for the service
    #[arg(short, long)]
    domain: Option<String>,

    /// DNS provider used by the template's DNS workflows
    #[arg(short = 'p', long, value_enum)]
    dns_provider: Option<DnsProvider>,

    /// GitHub repository (owner/name), auto-created if not specified
    #[arg(short, long)]
    repo: Option<String>,

    /// VPS hostname or IP
    #[arg(long, env = "VPS_HOST")]
    vps_host: Option<String>,

    /// VPS manager repository (owner/name) publishing the template
    #[arg(long, env = "VPS_MANAGER_REPO")]
    vps_manager_repo: Option<String>,

    /// Local checkout of the VPS manager repository for DNS zone changes
    #[arg(long, env = "VPS_MANAGER_PATH")]
    vps_manager_path: Option<PathBuf>,

    /// DNS provider API token, stored as a repository secret
    #[arg(long = "dns-token", env = "DNS_PROVIDER_TOKEN", hide_env_values = true)]
    dns_token: Option<String>,

    /// Print the outcome as JSON instead of tables
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    run(Cli::parse()).await
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::from_env().context("Failed to load configuration")?;

    if let Some(host) = cli.vps_host {
        config.vps_host = host;
    }
    if let Some(repo) = cli.vps_manager_repo {
        config.vps_manager_repo = repo;
    }
    if let Some(path) = cli.vps_manager_path {
        config.vps_manager_path = Some(resolve_path(&path)?);
    }
    if cli.dns_token.is_some() {
        config.dns_provider_token = cli.dns_token;
    }
    config.validate().context("Invalid configuration")?;

    let local_path = resolve_path(&cli.local_path)?;

    print_summary(
        &cli.service_name,
        &local_path,
        &config,
        cli.domain.as_deref(),
        cli.dns_provider,
    );

    let workflow = Workflow::new(
        config.clone(),
        Box::new(SshExecutor::from_config(&config)),
        Box::new(GitCli::new()),
        Box::new(GhCli::new(&config.git_host)),
        template_source(&config),
    );

    let request = ServiceRequest {
        name: cli.service_name,
        local_path,
        domain: cli.domain,
        repo: cli.repo,
    };

    let outcome = workflow
        .run(&request, cli.dns_provider.map(|p| p.as_str()))
        .await?;

    if cli.json {
        print_json(&outcome)?;
    } else {
        print_outcome(&outcome, &config);
    }

    info!("Service {} created successfully", outcome.service.name);
    Ok(())
}

/// Expand `~` and make the path absolute
fn resolve_path(raw: &Path) -> Result<PathBuf> {
    let expanded = match raw.strip_prefix("~") {
        Ok(rest) => {
            let home = std::env::var("HOME").context("HOME is not set, cannot expand ~")?;
            PathBuf::from(home).join(rest)
        }
        Err(_) => raw.to_path_buf(),
    };

    if expanded.is_absolute() {
        Ok(expanded)
    } else {
        Ok(std::env::current_dir()
            .context("Failed to read current directory")?
            .join(expanded))
    }
}

fn print_summary(
    name: &str,
    local_path: &Path,
    config: &Config,
    domain: Option<&str>,
    provider: Option<DnsProvider>,
) {
    println!("=== VPS Service Creator ===\n");
    println!("Creating Service:  {}", name);
    println!("Local Path:        {}", local_path.display());
    println!("VPS Host:          {}", config.vps_host);
    println!("Domain:            {}", domain.unwrap_or("Not configured"));
    println!(
        "DNS Provider:      {}",
        provider.map(|p| p.as_str()).unwrap_or("N/A")
    );
    println!();
}

fn print_outcome(outcome: &ProvisionOutcome, config: &Config) {
    let user = &outcome.account.user;

    println!("=== Service Credentials (SAVE THESE!) ===");
    println!("  Username:     {}", user);
    println!("  Password:     {}", outcome.credential.expose());
    println!("  SSH Command:  ssh {}@{}", user, config.vps_host);
    println!();

    println!("=== Relevant Links ===");
    println!(
        "  GitHub Repo:     https://{}/{}",
        config.git_host, outcome.repository
    );
    println!(
        "  GitHub Actions:  https://{}/{}/actions",
        config.git_host, outcome.repository
    );
    if let Some(domain) = &outcome.service.domain {
        println!("  Service URL:     https://{}", domain);
    }
    println!("  Local Path:      {}", outcome.service.local_path.display());
    println!();

    println!(
        "Template: {} files copied, {} skipped, {} customized",
        outcome.materialized.copied.len(),
        outcome.materialized.skipped.len(),
        outcome.substituted.len()
    );
    match outcome.commit {
        CommitOutcome::Committed { changes } => println!("Commit: {} paths committed", changes),
        CommitOutcome::NothingToCommit => println!("Commit: nothing to commit"),
    }
    println!(
        "Secrets: {} set, variables: {} set",
        outcome.propagation.secrets_set.len(),
        outcome.propagation.variables_set.len()
    );

    if let Some(dns) = &outcome.dns {
        match &dns.status {
            ZoneStatus::Proposed {
                pull_request,
                merged,
            } => println!(
                "DNS: {} proposed in {} ({})",
                dns.zone_file.display(),
                pull_request,
                if *merged { "merged" } else { "awaiting merge" }
            ),
            ZoneStatus::Unchanged => println!("DNS: {} already up to date", dns.zone_file.display()),
            ZoneStatus::KeptExisting => {
                println!("DNS: kept existing {}", dns.zone_file.display())
            }
        }
        if dns.applied {
            println!(
                "DNS: {} triggered, monitor at https://{}/{}/actions",
                DNS_APPLY_WORKFLOW, config.git_host, outcome.repository
            );
        }
    }

    if !outcome.warnings.is_empty() {
        println!();
        println!("=== Warnings ===");
        for warning in &outcome.warnings {
            println!("  ! {}", warning);
        }
    }

    let dns_pending = outcome.dns.as_ref().is_some_and(|dns| !dns.applied);
    println!();
    println!("Next Steps:");
    for line in next_steps(
        outcome.service.domain.is_some(),
        dns_pending,
        &outcome.repository,
        &config.default_branch,
    ) {
        println!("{}", line);
    }
}

/// Numbered follow-up instructions for the operator
fn next_steps(has_domain: bool, dns_pending: bool, repo: &RepoRef, branch: &str) -> Vec<String> {
    let mut steps = vec![
        "Update your application code in src/".to_string(),
        "Make sure Dockerfile is correct for your needs".to_string(),
    ];
    if !has_domain {
        steps.push(format!(
            "Replace the {} placeholder once a domain is chosen",
            vps_provisioner::placeholder::DOMAIN_TOKEN
        ));
    }
    if dns_pending {
        steps.push(format!(
            "Once the DNS pull request is merged, run: gh workflow run {} --repo {}",
            DNS_APPLY_WORKFLOW, repo
        ));
    }
    steps.push(format!(
        "Push to the {} branch to deploy:\n   git add .\n   git commit -m 'Initial deployment'\n   git push",
        branch
    ));

    steps
        .iter()
        .enumerate()
        .map(|(i, step)| format!("{}. {}", i + 1, step))
        .collect()
}

fn print_json(outcome: &ProvisionOutcome) -> Result<()> {
    let mut value = serde_json::to_value(outcome).context("Failed to serialize outcome")?;
    value["password"] = serde_json::Value::String(outcome.credential.expose().to_string());

    println!(
        "{}",
        serde_json::to_string_pretty(&value).context("Failed to serialize outcome")?
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_steps_are_numbered_consecutively() {
        let repo = RepoRef::parse("acme/billing").unwrap();

        let steps = next_steps(false, false, &repo, "main");
        assert_eq!(steps.len(), 4);
        assert!(steps[2].starts_with("3. Replace the myapp.example.com placeholder"));
        assert!(steps[3].starts_with("4. Push to the main branch to deploy:"));

        let steps = next_steps(true, true, &repo, "trunk");
        assert_eq!(steps.len(), 4);
        assert_eq!(
            steps[2],
            "3. Once the DNS pull request is merged, run: gh workflow run dns-apply.yml --repo acme/billing"
        );
        assert!(steps[3].starts_with("4. Push to the trunk branch"));
    }

    #[test]
    fn test_resolve_path_keeps_absolute_paths() {
        let path = resolve_path(Path::new("/srv/billing")).unwrap();
        assert_eq!(path, PathBuf::from("/srv/billing"));
        assert!(resolve_path(Path::new("billing")).unwrap().is_absolute());
    }
}

//! Service Account Manager for the VPS
//!
//! Commands:
//! - create: Create an isolated service account with its directories
//! - remove: Remove a service account, optionally purging its data
//! - list: List all service accounts
//! - check: Check the status of a service account

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use vps_common::ServiceName;
use vps_provisioner::{init_tracing, AccountManager, Config, SshExecutor};

#[derive(Parser)]
#[command(name = "manage-accounts")]
#[command(about = "Manage service accounts for VPS deployments")]
struct Cli {
    /// VPS hostname or IP
    #[arg(long, env = "VPS_HOST", global = true)]
    vps_host: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create service account
    Create {
        /// Service name
        service: String,

        /// SSH public key to authorize for the account
        #[arg(long)]
        ssh_key: Option<String>,
    },

    /// Remove service account
    Remove {
        /// Service name
        service: String,

        /// Also remove all data directories
        #[arg(long)]
        purge: bool,
    },

    /// List all service accounts
    List,

    /// Check service account status
    Check {
        /// Service name
        service: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();

    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(host) = cli.vps_host {
        config.vps_host = host;
    }
    if config.vps_host.is_empty() {
        anyhow::bail!("VPS_HOST environment variable is required");
    }

    let executor = SshExecutor::from_config(&config);
    let manager = AccountManager::new(&executor);

    match cli.command {
        Commands::Create { service, ssh_key } => {
            let name = ServiceName::parse(&service)?;
            let account = manager.create(&name, ssh_key.as_deref()).await?;

            println!("Service account created successfully!");
            println!("Username: {}", account.user);
            println!("Directories created:");
            for dir in &account.directories {
                println!("  - {}", dir);
            }
        }
        Commands::Remove { service, purge } => {
            let name = ServiceName::parse(&service)?;
            manager.remove(&name, purge).await?;

            println!("Removed {}", name.service_user());
            if !purge {
                println!("Data directories kept (use --purge to remove)");
            }
        }
        Commands::List => {
            let accounts = manager.list().await?;

            println!("Service accounts:");
            if accounts.is_empty() {
                println!("  (none)");
            }
            for user in accounts {
                let service = user.trim_start_matches(vps_common::service::SERVICE_USER_PREFIX);
                println!("  • {} ({})", user, service);
            }
        }
        Commands::Check { service } => {
            let name = ServiceName::parse(&service)?;
            let status = manager.check(&name).await?;
            let user = name.service_user();

            println!("Checking service account: {}", name);
            match (status.user_exists, status.uid) {
                (true, Some(uid)) => println!("✓ User exists: {} (UID: {})", user, uid),
                (true, None) => println!("✓ User exists: {}", user),
                (false, _) => println!("✗ User does not exist: {}", user),
            }

            if status.in_container_group {
                println!("✓ User is in docker group");
            } else {
                println!("! User is NOT in docker group");
            }

            for dir in &status.directories {
                match &dir.owner {
                    Some(owner) => println!("✓ {} exists (owner: {})", dir.path, owner),
                    None => println!("! {} does not exist", dir.path),
                }
            }

            if !status.is_complete(&name) {
                anyhow::bail!("service account {} is incomplete", user);
            }
        }
    }

    Ok(())
}

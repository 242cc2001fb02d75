//! Warden CLI - administer tenant roles, policies and invites.
//!
//! Works directly against the configured policy store and journal.

mod commands;
mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use commands::{check, invite, policy, role, tenant};
use output::OutputFormat;
use warden_core::config::Config;
use warden_core::Warden;

/// Exit code for a deny decision from `warden check`.
pub const EXIT_DENIED: i32 = 3;

/// Warden - tenant-scoped access control
#[derive(Parser)]
#[command(
    name = "warden",
    version = "0.1.0",
    about = "Warden - tenant-scoped access control and invites",
    long_about = "CLI tool for managing Warden policies, role assignments, tenants and invites.",
    propagate_version = true
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    output: OutputFormat,

    /// Configuration file (TOML); environment variables override it
    #[arg(short, long, global = true, env = "WARDEN_CONFIG")]
    config: Option<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Show info-level logs
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Policy rule management
    #[command(subcommand)]
    Policy(policy::PolicyCommands),

    /// Role assignment management
    #[command(subcommand)]
    Role(role::RoleCommands),

    /// Tenant provisioning
    #[command(subcommand)]
    Tenant(tenant::TenantCommands),

    /// Check whether a subject may perform an action (exit 0 allow, 3 deny)
    Check(check::CheckArgs),

    /// Invite users into a tenant
    #[command(subcommand)]
    Invite(invite::InviteCommands),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            output::print_error(&format!("{:#}", e));
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path))?,
        None => Config::load().context("Failed to load configuration")?,
    };
    if !cli.verbose {
        config.observability.log_level = "warn".to_string();
    }
    warden_core::observability::init(&config.observability)?;

    let warden = Warden::build(&config)
        .await
        .context("Failed to start warden")?;
    let format = cli.output;

    match cli.command {
        Commands::Policy(cmd) => policy::execute(cmd, &warden, format).await.map(|_| 0),
        Commands::Role(cmd) => role::execute(cmd, &warden, &config, format).await.map(|_| 0),
        Commands::Tenant(cmd) => tenant::execute(cmd, &warden, format).await.map(|_| 0),
        Commands::Check(args) => check::execute(args, &warden, format).await,
        Commands::Invite(cmd) => invite::execute(cmd, &warden, format).await.map(|_| 0),
    }
}

//! Tenant provisioning commands.

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;
use warden_core::Warden;

use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum TenantCommands {
    /// Seed the standard rules and role hierarchy for a tenant
    Init {
        /// Tenant domain
        domain: String,

        /// Subject that becomes the tenant's admin
        #[arg(long)]
        owner: String,
    },
}

#[derive(Debug, Serialize)]
struct InitSummary {
    domain: String,
    owner: String,
    rules_added: usize,
    groupings_added: usize,
}

pub async fn execute(cmd: TenantCommands, warden: &Warden, format: OutputFormat) -> Result<()> {
    match cmd {
        TenantCommands::Init { domain, owner } => {
            let provisioned = warden.assignment.provision_tenant(&domain, &owner).await?;
            let summary = InitSummary {
                domain,
                owner,
                rules_added: provisioned.rules_added,
                groupings_added: provisioned.groupings_added,
            };

            output::render(&summary, format, |summary| {
                output::print_success(&format!("Tenant {} ready", summary.domain));
                output::print_detail("Owner", &summary.owner);
                output::print_detail("Rules added", &summary.rules_added.to_string());
                output::print_detail("Assignments added", &summary.groupings_added.to_string());
                Ok(())
            })?;
        }
    }
    Ok(())
}

//! Policy rule commands.

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;
use tabled::Tabled;
use warden_core::rbac::PolicyRule;
use warden_core::Warden;

use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum PolicyCommands {
    /// Add a policy rule
    Add {
        /// Role the rule grants to
        role: String,
        /// Domain (tenant) the rule applies in
        domain: String,
        /// Object pattern, e.g. /orgs/get/org42 or /reports/*
        object: String,
        /// Action, matched exactly (e.g. GET)
        action: String,
    },

    /// Remove a policy rule
    Remove {
        role: String,
        domain: String,
        object: String,
        action: String,
    },

    /// List policy rules
    List {
        /// Only this domain
        #[arg(short, long)]
        domain: Option<String>,
    },
}

#[derive(Debug, Serialize, Tabled)]
struct PolicyRow {
    #[tabled(rename = "Role")]
    role: String,
    #[tabled(rename = "Domain")]
    domain: String,
    #[tabled(rename = "Object")]
    object: String,
    #[tabled(rename = "Action")]
    action: String,
}

impl From<PolicyRule> for PolicyRow {
    fn from(rule: PolicyRule) -> Self {
        Self {
            role: rule.role,
            domain: rule.domain,
            object: rule.object,
            action: rule.action,
        }
    }
}

pub async fn execute(cmd: PolicyCommands, warden: &Warden, format: OutputFormat) -> Result<()> {
    match cmd {
        PolicyCommands::Add {
            role,
            domain,
            object,
            action,
        } => {
            let rule = PolicyRule::new(role, domain, object, action);
            if warden.store.add_policy(rule.clone()).await? {
                output::print_success(&format!("Added {}", rule));
            } else {
                output::print_info(&format!("Already present: {}", rule));
            }
        }

        PolicyCommands::Remove {
            role,
            domain,
            object,
            action,
        } => {
            let rule = PolicyRule::new(role, domain, object, action);
            if warden.store.remove_policy(rule.clone()).await? {
                output::print_success(&format!("Removed {}", rule));
            } else {
                output::print_warning(&format!("Not found: {}", rule));
            }
        }

        PolicyCommands::List { domain } => {
            let domains = match domain {
                Some(d) => vec![d],
                None => warden.store.domains(),
            };
            let rows: Vec<PolicyRow> = domains
                .iter()
                .flat_map(|d| warden.store.policies_in(d))
                .map(PolicyRow::from)
                .collect();
            output::print_list(&rows, format)?;
        }
    }
    Ok(())
}

//! Role assignment commands.

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;
use tabled::Tabled;
use warden_core::config::Config;
use warden_core::rbac::{Grouping, ReplaceOutcome};
use warden_core::Warden;

use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum RoleCommands {
    /// Grant a role to a subject
    Grant {
        subject: String,
        role: String,
        domain: String,
    },

    /// Revoke a role from a subject
    Revoke {
        subject: String,
        role: String,
        domain: String,
    },

    /// Replace every role a subject holds in a domain with one role
    Replace {
        subject: String,
        role: String,
        domain: String,

        /// Only replace if the current roles are exactly these (comma-separated)
        #[arg(long, value_delimiter = ',')]
        expect: Option<Vec<String>>,
    },

    /// List role assignments in a domain
    List {
        domain: String,

        /// Only this subject, including inherited roles
        #[arg(short, long)]
        subject: Option<String>,
    },

    /// Give a subject the default role if it has none
    Onboard {
        subject: String,

        /// Domain; the global domain when omitted
        #[arg(short, long)]
        domain: Option<String>,
    },
}

#[derive(Debug, Serialize, Tabled)]
struct AssignmentRow {
    #[tabled(rename = "Member")]
    member: String,
    #[tabled(rename = "Role")]
    role: String,
    #[tabled(rename = "Domain")]
    domain: String,
}

impl From<Grouping> for AssignmentRow {
    fn from(g: Grouping) -> Self {
        Self {
            member: g.member,
            role: g.role,
            domain: g.domain,
        }
    }
}

#[derive(Debug, Serialize)]
struct SubjectRoles {
    subject: String,
    domain: String,
    direct: Vec<String>,
    effective: Vec<String>,
}

pub async fn execute(
    cmd: RoleCommands,
    warden: &Warden,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    match cmd {
        RoleCommands::Grant {
            subject,
            role,
            domain,
        } => {
            if warden.assignment.add_role(&subject, &role, &domain).await? {
                output::print_success(&format!("Granted {} to {} in {}", role, subject, domain));
            } else {
                output::print_info(&format!("{} already holds {} in {}", subject, role, domain));
            }
        }

        RoleCommands::Revoke {
            subject,
            role,
            domain,
        } => {
            if warden.assignment.remove_role(&subject, &role, &domain).await? {
                output::print_success(&format!("Revoked {} from {} in {}", role, subject, domain));
            } else {
                output::print_warning(&format!("{} does not hold {} in {}", subject, role, domain));
            }
        }

        RoleCommands::Replace {
            subject,
            role,
            domain,
            expect,
        } => {
            let outcome = warden
                .assignment
                .replace_role(&subject, expect.as_deref(), &role, &domain)
                .await?;
            match outcome {
                ReplaceOutcome::Replaced { previous } => {
                    let previous: Vec<String> = previous.into_iter().collect();
                    output::print_success(&format!(
                        "{} now holds {} in {} (was: {})",
                        subject,
                        role,
                        domain,
                        if previous.is_empty() { "-".to_string() } else { previous.join(", ") }
                    ));
                }
                ReplaceOutcome::Unchanged => {
                    output::print_info(&format!("{} already holds only {}", subject, role));
                }
            }
        }

        RoleCommands::List { domain, subject } => match subject {
            Some(subject) => {
                let view = SubjectRoles {
                    direct: warden.store.direct_roles(&subject, &domain).into_iter().collect(),
                    effective: warden.store.roles_of(&subject, &domain).into_iter().collect(),
                    subject,
                    domain,
                };
                output::render(&view, format, |view| {
                    output::print_header(&format!("{} in {}", view.subject, view.domain));
                    output::print_detail("Direct", &view.direct.join(", "));
                    output::print_detail("Effective", &view.effective.join(", "));
                    Ok(())
                })?;
            }
            None => {
                let rows: Vec<AssignmentRow> = warden
                    .store
                    .groupings_in(&domain)
                    .into_iter()
                    .map(AssignmentRow::from)
                    .collect();
                output::print_list(&rows, format)?;
            }
        },

        RoleCommands::Onboard { subject, domain } => {
            let domain = domain.unwrap_or_else(|| config.enforcement.global_domain.clone());
            if warden.assignment.ensure_default_role(&subject, &domain).await? {
                output::print_success(&format!(
                    "Granted {} to {} in {}",
                    warden.assignment.default_role(),
                    subject,
                    domain
                ));
            } else {
                output::print_info(&format!("{} already has a role in {}", subject, domain));
            }
        }
    }
    Ok(())
}

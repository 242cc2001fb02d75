//! Invite commands.

use std::time::Duration;

use anyhow::{bail, Result};
use clap::Subcommand;
use serde::Serialize;
use tabled::Tabled;
use warden_core::invite::{
    AcceptRequest, InviteInput, InviteResult, InviteSaga, RunRecord, Submission,
};
use warden_core::saga::StepOutcome;
use warden_core::Warden;

use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum InviteCommands {
    /// Invite a user into a tenant by email
    Send {
        /// Subject sending the invite
        #[arg(long)]
        inviter: String,

        /// Email of the user to invite
        #[arg(long)]
        email: String,

        /// Tenant domain
        #[arg(long)]
        domain: String,

        /// Display name of the tenant
        #[arg(long)]
        domain_name: String,

        #[arg(long, default_value = "")]
        description: String,

        /// Run id; a new one is generated when omitted
        #[arg(long)]
        run_id: Option<String>,

        /// Seconds to wait for the run to finish (0 returns right away)
        #[arg(long, default_value = "30")]
        wait: u64,
    },

    /// Show an invite run and its journaled steps
    Status {
        run_id: String,
    },

    /// Drive an unfinished run to completion
    Resume {
        run_id: String,
    },

    /// Accept a pending invite
    Accept {
        subject: String,
        domain: String,

        /// Role to grant; the default role when omitted
        #[arg(long)]
        role: Option<String>,

        #[arg(long)]
        email: Option<String>,

        #[arg(long)]
        name: Option<String>,

        #[arg(long, default_value = "")]
        domain_name: String,
    },
}

#[derive(Debug, Serialize, Tabled)]
struct StepRow {
    #[tabled(rename = "Step")]
    step: String,
    #[tabled(rename = "Attempts")]
    attempts: u32,
    #[tabled(rename = "Outcome")]
    outcome: String,
}

#[derive(Debug, Serialize)]
struct SendReport {
    run_id: String,
    result: InviteResult,
}

pub async fn execute(cmd: InviteCommands, warden: &Warden, format: OutputFormat) -> Result<()> {
    match cmd {
        InviteCommands::Send {
            inviter,
            email,
            domain,
            domain_name,
            description,
            run_id,
            wait,
        } => {
            let run_id = run_id.unwrap_or_else(InviteSaga::new_run_id);
            let input = InviteInput {
                inviter,
                email,
                domain,
                domain_name,
                description,
            };

            match warden.saga.submit_invite(&run_id, input).await? {
                Submission::Rejected { code, reason } => {
                    bail!("Invite rejected ({:?}): {}", code, reason);
                }
                Submission::Accepted { run_id } => {
                    let result = if wait == 0 {
                        InviteResult::Pending
                    } else {
                        warden
                            .saga
                            .wait_for(&run_id, Duration::from_secs(wait))
                            .await?
                    };
                    let report = SendReport { run_id, result };
                    output::render(&report, format, print_result)?;
                }
            }
        }

        InviteCommands::Status { run_id } => {
            let Some(record) = warden.saga.get_run(&run_id).await? else {
                bail!("Invite run {} not found", run_id);
            };
            output::render(&record, format, print_record)?;
        }

        InviteCommands::Resume { run_id } => {
            let result = warden.saga.execute(&run_id).await?;
            let report = SendReport { run_id, result };
            output::render(&report, format, print_result)?;
        }

        InviteCommands::Accept {
            subject,
            domain,
            role,
            email,
            name,
            domain_name,
        } => {
            let mut request = AcceptRequest::new(subject, domain);
            request.role = role;
            request.email = email;
            request.name = name;
            request.domain_name = domain_name;

            let accepted = warden.acceptance.accept(&request).await?;
            output::render(&accepted, format, |accepted| {
                output::print_success(&format!(
                    "{} joined {} as {}",
                    accepted.subject, accepted.domain, accepted.role
                ));
                if !accepted.notified {
                    output::print_warning("Acceptance notification was not delivered");
                }
                Ok(())
            })?;
        }
    }
    Ok(())
}

fn print_result(report: &SendReport) -> Result<()> {
    let run_id = &report.run_id;
    match &report.result {
        InviteResult::Pending => {
            output::print_info(&format!(
                "Run {} still in progress; check with `warden invite status {}`",
                run_id, run_id
            ));
        }
        InviteResult::Succeeded { invitee } => {
            output::print_success(&format!("Invite sent (run {})", run_id));
            output::print_detail("Invitee", invitee);
        }
        InviteResult::Failed(failure) => {
            output::print_error(&format!("Invite failed (run {}): {}", run_id, failure.reason()));
        }
    }
    Ok(())
}

fn print_record(record: &RunRecord) -> Result<()> {
    output::print_header(&format!("Invite run {}", record.run_id));
    output::print_detail("Status", &format!("{:?}", record.status));
    output::print_detail("Inviter", &record.input.inviter);
    output::print_detail("Email", &record.input.email);
    output::print_detail("Domain", &record.input.domain);
    if let Some(invitee) = &record.invitee {
        output::print_detail("Invitee", invitee);
    }
    if let Some(failure) = &record.failure {
        output::print_detail("Failure", &failure.reason());
    }
    output::print_detail("Updated", &record.updated_at.to_rfc3339());
    println!();

    let rows: Vec<StepRow> = record
        .steps
        .iter()
        .map(|s| StepRow {
            step: s.step.clone(),
            attempts: s.attempts,
            outcome: match &s.outcome {
                StepOutcome::Completed { .. } => "completed".to_string(),
                StepOutcome::Failed { code, message } => format!("{:?}: {}", code, message),
            },
        })
        .collect();
    output::print_list(&rows, OutputFormat::Table)
}

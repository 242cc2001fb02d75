//! Authorization check command.

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use warden_core::rbac::{AuthzRequest, Decision};
use warden_core::Warden;

use crate::output::{self, OutputFormat};
use crate::EXIT_DENIED;

#[derive(Args)]
pub struct CheckArgs {
    subject: String,
    domain: String,
    object: String,
    action: String,

    /// Show the resolved roles; never provisions the subject
    #[arg(long)]
    explain: bool,
}

#[derive(Debug, Serialize)]
struct CheckReport {
    request: AuthzRequest,
    allowed: bool,
    decision: Decision,
    #[serde(skip_serializing_if = "Option::is_none")]
    roles: Option<Vec<String>>,
}

pub async fn execute(args: CheckArgs, warden: &Warden, format: OutputFormat) -> Result<i32> {
    let request = AuthzRequest::new(args.subject, args.domain, args.object, args.action);

    let report = if args.explain {
        let explanation = warden.enforcer.explain(&request);
        CheckReport {
            allowed: explanation.decision.is_allowed(),
            roles: Some(explanation.roles.into_iter().collect()),
            decision: explanation.decision,
            request,
        }
    } else {
        let decision = warden.enforcer.authorize(&request).await?;
        CheckReport {
            allowed: decision.is_allowed(),
            roles: None,
            decision,
            request,
        }
    };

    output::render(&report, format, |report| {
        println!(
            "{} {} {} {} in {}",
            output::decision_label(report.allowed),
            report.request.subject,
            report.request.action,
            report.request.object,
            report.request.domain
        );
        match &report.decision {
            Decision::Allow { rule } => output::print_detail("Rule", &rule.to_string()),
            Decision::Deny { reason } => output::print_detail("Reason", reason),
        }
        if let Some(roles) = &report.roles {
            output::print_detail("Roles", &roles.join(", "));
        }
        Ok(())
    })?;

    Ok(if report.allowed { 0 } else { EXIT_DENIED })
}

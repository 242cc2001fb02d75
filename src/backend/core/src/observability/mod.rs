//! Observability: structured logging, metrics, and domain events.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Initialize the logging stack.
///
/// Logs go to stderr. `RUST_LOG` wins over the configured level when set.
/// Calling this twice is an error from `tracing-subscriber`, surfaced as `Err`.
pub fn init(config: &ObservabilityConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;

    if config.json_logging {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    }

    metrics::register_metrics();
    Ok(())
}

/// Metric descriptions and recording helpers.
///
/// Only the `metrics` facade is used here; the embedding process installs
/// whichever recorder it wants.
pub mod metrics {
    use metrics::{counter, describe_counter, describe_histogram, histogram};

    /// Register all metric descriptions.
    pub fn register_metrics() {
        // Counters
        describe_counter!(
            "warden_errors_total",
            "Total number of errors constructed, by code"
        );
        describe_counter!(
            "warden_authz_decisions_total",
            "Authorization decisions, by outcome"
        );
        describe_counter!(
            "warden_default_roles_granted_total",
            "Default roles granted to newly seen subjects"
        );
        describe_counter!(
            "warden_store_mutations_total",
            "Persisted policy store mutations, by operation"
        );
        describe_counter!(
            "warden_saga_runs_total",
            "Invite saga runs reaching a terminal state, by outcome"
        );
        describe_counter!(
            "warden_saga_step_attempts_total",
            "Saga step attempts, by step"
        );

        // Histograms
        describe_histogram!(
            "warden_saga_step_duration_seconds",
            "Wall time of one saga step including retries"
        );
    }

    /// Record an enforcement decision.
    pub fn record_decision(decision: &str) {
        counter!("warden_authz_decisions_total", "decision" => decision.to_string()).increment(1);
    }

    /// Record a default role grant.
    pub fn record_default_role_granted() {
        counter!("warden_default_roles_granted_total").increment(1);
    }

    /// Record a persisted store mutation.
    pub fn record_store_mutation(op: &'static str) {
        counter!("warden_store_mutations_total", "op" => op).increment(1);
    }

    /// Record a terminal saga run.
    pub fn record_saga_run(outcome: &str) {
        counter!("warden_saga_runs_total", "outcome" => outcome.to_string()).increment(1);
    }

    /// Record one attempt of a saga step.
    pub fn record_step_attempt(step: &str) {
        counter!("warden_saga_step_attempts_total", "step" => step.to_string()).increment(1);
    }

    /// Record the total duration of a saga step.
    pub fn record_step_duration(step: &str, duration_secs: f64) {
        histogram!("warden_saga_step_duration_seconds", "step" => step.to_string())
            .record(duration_secs);
    }
}

/// Structured event types for logging.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "event_type")]
pub enum WardenEvent {
    DefaultRoleGranted {
        subject: String,
        domain: String,
        role: String,
    },
    TenantProvisioned {
        domain: String,
        owner: String,
    },
    InviteSubmitted {
        run_id: String,
        inviter: String,
        domain: String,
    },
    InviteSucceeded {
        run_id: String,
        invitee: String,
        domain: String,
    },
    InviteFailed {
        run_id: String,
        reason: String,
        business: bool,
    },
    InviteAccepted {
        subject: String,
        domain: String,
        role: String,
    },
}

impl WardenEvent {
    /// Log this event.
    pub fn log(&self) {
        match self {
            WardenEvent::DefaultRoleGranted { subject, domain, role } => {
                tracing::info!(
                    subject = %subject,
                    domain = %domain,
                    role = %role,
                    "Default role granted"
                );
            }
            WardenEvent::TenantProvisioned { domain, owner } => {
                tracing::info!(domain = %domain, owner = %owner, "Tenant provisioned");
            }
            WardenEvent::InviteSubmitted { run_id, inviter, domain } => {
                tracing::info!(
                    run_id = %run_id,
                    inviter = %inviter,
                    domain = %domain,
                    "Invite submitted"
                );
            }
            WardenEvent::InviteSucceeded { run_id, invitee, domain } => {
                tracing::info!(
                    run_id = %run_id,
                    invitee = %invitee,
                    domain = %domain,
                    "Invite succeeded"
                );
            }
            WardenEvent::InviteFailed { run_id, reason, business } => {
                if *business {
                    tracing::info!(run_id = %run_id, reason = %reason, "Invite rejected");
                } else {
                    tracing::error!(run_id = %run_id, reason = %reason, "Invite failed");
                }
            }
            WardenEvent::InviteAccepted { subject, domain, role } => {
                tracing::info!(
                    subject = %subject,
                    domain = %domain,
                    role = %role,
                    "Invite accepted"
                );
            }
        }
    }
}

//! Role assignment: default-role provisioning, explicit role changes,
//! pending invites and tenant seeding.

use std::collections::BTreeSet;
use tracing::{debug, info};

use super::models::{Grouping, INVITE_ROLE};
use super::roles::TenantRole;
use super::store::{GuardedAdd, PolicyStore, ReplaceOutcome};
use crate::error::{Result, WardenError};
use crate::observability::{metrics, WardenEvent};

/// Writes role assignments through the policy store.
#[derive(Debug, Clone)]
pub struct RoleAssignmentService {
    store: PolicyStore,
    default_role: String,
}

/// What [`RoleAssignmentService::provision_tenant`] wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TenantProvisioning {
    pub rules_added: usize,
    pub groupings_added: usize,
}

impl RoleAssignmentService {
    pub fn new(store: PolicyStore, default_role: impl Into<String>) -> Self {
        Self {
            store,
            default_role: default_role.into(),
        }
    }

    pub fn default_role(&self) -> &str {
        &self.default_role
    }

    pub fn store(&self) -> &PolicyStore {
        &self.store
    }

    /// Grant the default role if and only if `subject` has no role in `domain`.
    ///
    /// Returns `true` when a grant was recorded. Safe under concurrency: the
    /// check and the write are one store operation.
    pub async fn ensure_default_role(&self, subject: &str, domain: &str) -> Result<bool> {
        let grouping = Grouping::new(subject, &self.default_role, domain);
        match self.store.add_grouping_if_roleless(grouping).await? {
            GuardedAdd::Added => {
                metrics::record_default_role_granted();
                WardenEvent::DefaultRoleGranted {
                    subject: subject.to_string(),
                    domain: domain.to_string(),
                    role: self.default_role.clone(),
                }
                .log();
                Ok(true)
            }
            GuardedAdd::Existing(roles) => {
                debug!(subject, domain, roles = ?roles, "Subject already provisioned");
                Ok(false)
            }
        }
    }

    /// Replace every role `subject` holds in `domain` with exactly `new_role`.
    ///
    /// `old_roles`, when given, must equal the current direct role set, which
    /// turns concurrent replacements into a compare-and-swap.
    pub async fn replace_role(
        &self,
        subject: &str,
        old_roles: Option<&[String]>,
        new_role: &str,
        domain: &str,
    ) -> Result<ReplaceOutcome> {
        validate_name("role", new_role)?;
        let expected: Option<BTreeSet<String>> = old_roles.map(|r| r.iter().cloned().collect());
        let outcome = self
            .store
            .replace_groupings(subject, domain, expected.as_ref(), new_role)
            .await?;
        info!(subject, domain, role = new_role, outcome = ?outcome, "Role replaced");
        Ok(outcome)
    }

    /// Add one role. Returns `false` if it was already held directly.
    pub async fn add_role(&self, subject: &str, role: &str, domain: &str) -> Result<bool> {
        validate_name("role", role)?;
        self.store.add_grouping(Grouping::new(subject, role, domain)).await
    }

    /// Remove one role. Returns `false` if it was not held directly.
    pub async fn remove_role(&self, subject: &str, role: &str, domain: &str) -> Result<bool> {
        self.store
            .remove_grouping(Grouping::new(subject, role, domain))
            .await
    }

    /// Record a pending invite for `subject` in `domain`.
    ///
    /// Fails with `AlreadyInvited` or `AlreadyMember`, without writing, if the
    /// subject already holds any role there.
    pub async fn grant_pending_invite(&self, subject: &str, domain: &str) -> Result<()> {
        let grouping = Grouping::new(subject, INVITE_ROLE, domain);
        match self.store.add_grouping_if_roleless(grouping).await? {
            GuardedAdd::Added => {
                info!(subject, domain, "Pending invite recorded");
                Ok(())
            }
            GuardedAdd::Existing(roles) if roles.contains(INVITE_ROLE) => {
                Err(WardenError::already_invited(subject, domain))
            }
            GuardedAdd::Existing(_) => Err(WardenError::already_member(subject, domain)),
        }
    }

    /// Seed the standard tenant rules and hierarchy for `domain` and make
    /// `owner` its admin. Idempotent.
    pub async fn provision_tenant(&self, domain: &str, owner: &str) -> Result<TenantProvisioning> {
        validate_name("domain", domain)?;
        validate_name("owner", owner)?;

        let (rules, hierarchy) = TenantRole::template(domain);
        let mut provisioning = TenantProvisioning::default();

        for rule in rules {
            if self.store.add_policy(rule).await? {
                provisioning.rules_added += 1;
            }
        }
        for grouping in hierarchy {
            if self.store.add_grouping(grouping).await? {
                provisioning.groupings_added += 1;
            }
        }
        if self
            .store
            .add_grouping(Grouping::new(owner, TenantRole::Admin.id(), domain))
            .await?
        {
            provisioning.groupings_added += 1;
        }

        WardenEvent::TenantProvisioned {
            domain: domain.to_string(),
            owner: owner.to_string(),
        }
        .log();
        Ok(provisioning)
    }
}

fn validate_name(what: &'static str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(WardenError::validation(format!("{what} must not be empty")));
    }
    if value.contains(',') || value.contains('\n') {
        return Err(WardenError::validation(format!(
            "{what} `{value}` must not contain commas or newlines"
        )));
    }
    Ok(())
}

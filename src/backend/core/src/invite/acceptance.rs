//! Accepting a pending invite.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::error::{Result, WardenError};
use crate::members::{Member, MemberRegistry};
use crate::notify::{InviteNotification, Notifier};
use crate::observability::WardenEvent;
use crate::rbac::{RoleAssignmentService, INVITE_ROLE};

/// Who accepts which invite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptRequest {
    pub subject: String,
    pub domain: String,
    #[serde(default)]
    pub domain_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// Role to grant; the default role when absent
    #[serde(default)]
    pub role: Option<String>,
}

impl AcceptRequest {
    pub fn new(subject: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            domain: domain.into(),
            domain_name: String::new(),
            email: None,
            name: None,
            role: None,
        }
    }
}

/// What an acceptance did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acceptance {
    pub subject: String,
    pub domain: String,
    pub role: String,
    pub member_added: bool,
    pub notified: bool,
}

/// Turns a pending invite into a real role.
#[derive(Clone)]
pub struct InviteAcceptance {
    assignment: RoleAssignmentService,
    members: Arc<dyn MemberRegistry>,
    notifier: Arc<dyn Notifier>,
}

impl InviteAcceptance {
    pub fn new(
        assignment: RoleAssignmentService,
        members: Arc<dyn MemberRegistry>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            assignment,
            members,
            notifier,
        }
    }

    /// Accept the caller's own pending invite.
    ///
    /// The invite grouping is swapped for the target role in one store
    /// operation that expects exactly `{invite}`, so two concurrent accepts
    /// cannot both succeed with different roles.
    pub async fn accept(&self, request: &AcceptRequest) -> Result<Acceptance> {
        let subject = request.subject.as_str();
        let domain = request.domain.as_str();
        let role = request
            .role
            .clone()
            .unwrap_or_else(|| self.assignment.default_role().to_string());
        if role == INVITE_ROLE {
            return Err(WardenError::validation("cannot accept an invite into the invite role"));
        }

        self.assignment.store().refresh().await?;
        if !self
            .assignment
            .store()
            .direct_roles(subject, domain)
            .contains(INVITE_ROLE)
        {
            return Err(WardenError::no_pending_invite(subject, domain));
        }

        let expected = [INVITE_ROLE.to_string()];
        self.assignment
            .replace_role(subject, Some(&expected), &role, domain)
            .await?;

        let member_added = self
            .members
            .add_member(
                domain,
                Member {
                    id: subject.to_string(),
                    email: request.email.clone(),
                    name: request.name.clone(),
                    role: role.clone(),
                },
            )
            .await?;

        let notified = match &request.email {
            Some(email) => {
                let notification = InviteNotification {
                    email: email.clone(),
                    domain: domain.to_string(),
                    domain_name: request.domain_name.clone(),
                    description: String::new(),
                    accepted: true,
                };
                match self.notifier.send_invite_notification(&notification).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(subject, domain, error = %e, "Acceptance notification failed");
                        false
                    }
                }
            }
            None => false,
        };

        WardenEvent::InviteAccepted {
            subject: subject.to_string(),
            domain: domain.to_string(),
            role: role.clone(),
        }
        .log();

        Ok(Acceptance {
            subject: subject.to_string(),
            domain: domain.to_string(),
            role,
            member_added,
            notified,
        })
    }
}

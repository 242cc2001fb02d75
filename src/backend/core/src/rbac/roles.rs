//! Built-in tenant roles and the rules seeded for every new tenant.
//!
//! | Role    | Inherits | Grants inside tenant `D`          |
//! |---------|----------|-----------------------------------|
//! | admin   | writer   | `POST /orgs/update-role/D`        |
//! | writer  | reader   | `POST /orgs/invite/D`             |
//! | reader  |          | `GET /orgs/get/D`                 |
//! | invite  |          | `GET /orgs/accept/D`              |

use std::fmt;
use std::str::FromStr;

use super::models::{Grouping, PolicyRule};
use crate::error::WardenError;

/// Built-in tenant roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TenantRole {
    Admin,
    Writer,
    Reader,
    Invite,
}

impl TenantRole {
    /// Get the role identifier string.
    pub fn id(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Writer => "writer",
            Self::Reader => "reader",
            Self::Invite => super::models::INVITE_ROLE,
        }
    }

    /// Get the description.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Admin => "Manage member roles; everything a writer can do",
            Self::Writer => "Invite new members; everything a reader can do",
            Self::Reader => "View the organization",
            Self::Invite => "Pending invitation; may only accept it",
        }
    }

    /// The role this one inherits from, if any.
    pub fn inherits(&self) -> Option<TenantRole> {
        match self {
            Self::Admin => Some(Self::Writer),
            Self::Writer => Some(Self::Reader),
            Self::Reader | Self::Invite => None,
        }
    }

    /// The rule this role is granted in `domain`.
    pub fn rule(&self, domain: &str) -> PolicyRule {
        let (path, action) = match self {
            Self::Admin => ("update-role", "POST"),
            Self::Writer => ("invite", "POST"),
            Self::Reader => ("get", "GET"),
            Self::Invite => ("accept", "GET"),
        };
        PolicyRule::new(self.id(), domain, format!("/orgs/{path}/{domain}"), action)
    }

    /// Get all built-in roles.
    pub fn all() -> Vec<TenantRole> {
        vec![Self::Admin, Self::Writer, Self::Reader, Self::Invite]
    }

    /// Rules and hierarchy edges seeded for a new tenant.
    pub fn template(domain: &str) -> (Vec<PolicyRule>, Vec<Grouping>) {
        let roles = Self::all();
        let rules = roles.iter().map(|r| r.rule(domain)).collect();
        let hierarchy = roles
            .iter()
            .filter_map(|r| r.inherits().map(|parent| Grouping::new(r.id(), parent.id(), domain)))
            .collect();
        (rules, hierarchy)
    }
}

impl fmt::Display for TenantRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for TenantRole {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .into_iter()
            .find(|r| r.id() == s)
            .ok_or_else(|| WardenError::validation(format!("unknown tenant role `{s}`")))
    }
}

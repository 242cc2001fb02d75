#![allow(clippy::result_large_err)]
//! # Warden Core
//!
//! Tenant-scoped role-based access control and a durable invite workflow.
//!
//! ## Architecture
//!
//! - **Policy Store**: domain-scoped rules and role graph, persisted before every change
//! - **Enforcer**: allow/deny decisions with transitive role resolution
//! - **Role Assignment**: default roles, atomic role replacement, tenant seeding
//! - **Saga**: journaled, retrying step scheduler
//! - **Invites**: the four-step invite saga and invite acceptance
//! - **Adapters**: identity directory, notifications, member list
//! - **Observability**: structured logging and metrics

pub mod app;
pub mod config;
pub mod directory;
pub mod error;
pub mod invite;
pub mod members;
pub mod notify;
pub mod observability;
pub mod rbac;
pub mod saga;

pub use app::{Collaborators, Warden};
pub use error::{ErrorCode, ErrorDetails, ErrorSeverity, Result, WardenError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::app::{Collaborators, Warden};
    pub use crate::config::Config;
    pub use crate::directory::{Identity, IdentityDirectory, StaticIdentityDirectory};
    pub use crate::error::{ErrorCode, Result, WardenError};
    pub use crate::invite::{
        AcceptRequest, InviteAcceptance, InviteFailure, InviteInput, InviteResult, InviteSaga,
        Submission,
    };
    pub use crate::members::{Member, MemberRegistry};
    pub use crate::notify::{InviteNotification, Notifier};
    pub use crate::rbac::{
        AuthzRequest, Decision, Enforcer, Grouping, PolicyModel, PolicyRule, PolicyStore,
        Provisioning, RoleAssignmentService,
    };
    pub use crate::saga::{DurableScheduler, RetryPolicy, StepOptions};
}

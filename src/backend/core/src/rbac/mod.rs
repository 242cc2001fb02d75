//! Tenant-scoped role-based access control.
//!
//! This module provides:
//! - **Models**: policy rules, grouping relations, persisted rows, decisions
//! - **Model text**: the fixed `(sub, dom, obj, act)` grammar and object matchers
//! - **Adapters**: memory, CSV file and PostgreSQL persistence
//! - **Policy Store**: the single owner of rules and the per-domain role graph
//! - **Enforcer**: allow/deny decisions over the store
//! - **Role Assignment**: default roles, role replacement, invites, tenant seeding
//! - **Authorization Middleware**: Axum layer over the enforcer
//!
//! # Usage
//!
//! ```rust,ignore
//! use warden_core::rbac::{Enforcer, PolicyStore, MemoryAdapter, RoleAssignmentService};
//!
//! let store = PolicyStore::open(Arc::new(MemoryAdapter::new())).await?;
//! let assignment = RoleAssignmentService::new(store.clone(), "reader");
//! assignment.provision_tenant("org42", "owner-id").await?;
//!
//! let enforcer = Enforcer::new(store, PolicyModel::default_model(), assignment, Provisioning::Explicit);
//! let decision = enforcer.enforce("owner-id", "org42", "/orgs/get/org42", "GET").await?;
//! assert!(decision.is_allowed());
//! ```

pub mod adapter;
pub mod assignment;
pub mod enforcer;
pub mod middleware;
pub mod model;
pub mod models;
pub mod roles;
pub mod store;

pub use adapter::{FileAdapter, MemoryAdapter, PolicyAdapter, PostgresAdapter};
pub use assignment::{RoleAssignmentService, TenantProvisioning};
pub use enforcer::{AuthzRequest, Enforcer, Explanation, Provisioning};
pub use middleware::{AuthorizeLayer, AuthorizeService, AuthzContext, DomainSource, Subject};
pub use model::{MatchFunction, ObjectMatcher, PolicyModel};
pub use models::{Decision, Grouping, PolicyRule, RuleLine, DEFAULT_ROLE, GLOBAL_DOMAIN, INVITE_ROLE};
pub use roles::TenantRole;
pub use store::{GuardedAdd, PolicyStore, ReplaceOutcome};

//! The enforcement engine.
//!
//! Answers "can subject S perform action A on object O inside domain D?"
//! by resolving S's roles in D and matching them against D's rules.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

use super::assignment::RoleAssignmentService;
use super::model::PolicyModel;
use super::models::Decision;
use super::store::PolicyStore;
use crate::error::Result;
use crate::observability::metrics;

/// When a subject's default role gets granted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provisioning {
    /// `enforce` never writes; callers provision subjects during onboarding.
    #[default]
    Explicit,
    /// The first check for a role-less subject grants the default role.
    Lazy,
}

/// One authorization question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthzRequest {
    pub subject: String,
    pub domain: String,
    pub object: String,
    pub action: String,
}

impl AuthzRequest {
    pub fn new(
        subject: impl Into<String>,
        domain: impl Into<String>,
        object: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            domain: domain.into(),
            object: object.into(),
            action: action.into(),
        }
    }
}

/// A decision together with the roles it was computed from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Explanation {
    pub request: AuthzRequest,
    pub roles: BTreeSet<String>,
    pub decision: Decision,
}

/// Domain-scoped enforcement over a [`PolicyStore`].
#[derive(Debug, Clone)]
pub struct Enforcer {
    store: PolicyStore,
    model: PolicyModel,
    assignment: RoleAssignmentService,
    provisioning: Provisioning,
}

impl Enforcer {
    pub fn new(
        store: PolicyStore,
        model: PolicyModel,
        assignment: RoleAssignmentService,
        provisioning: Provisioning,
    ) -> Self {
        Self {
            store,
            model,
            assignment,
            provisioning,
        }
    }

    pub fn provisioning(&self) -> Provisioning {
        self.provisioning
    }

    pub fn store(&self) -> &PolicyStore {
        &self.store
    }

    /// Decide a request. Deny is `Ok(Decision::Deny{..})`; `Err` means the
    /// decision could not be made.
    pub async fn enforce(
        &self,
        subject: &str,
        domain: &str,
        object: &str,
        action: &str,
    ) -> Result<Decision> {
        let mut roles = self.store.roles_of(subject, domain);

        if roles.is_empty() && self.provisioning == Provisioning::Lazy {
            self.assignment.ensure_default_role(subject, domain).await?;
            roles = self.store.roles_of(subject, domain);
        }

        let decision = self.decide(subject, domain, object, action, &roles);
        metrics::record_decision(decision.as_str());
        debug!(
            subject,
            domain,
            object,
            action,
            decision = decision.as_str(),
            "Authorization decided"
        );
        Ok(decision)
    }

    /// Entry point for request-handling glue.
    pub async fn authorize(&self, request: &AuthzRequest) -> Result<Decision> {
        self.enforce(
            &request.subject,
            &request.domain,
            &request.object,
            &request.action,
        )
        .await
    }

    /// Like [`enforce`](Self::enforce) but never provisions, and reports the
    /// resolved roles alongside the decision.
    pub fn explain(&self, request: &AuthzRequest) -> Explanation {
        let roles = self.store.roles_of(&request.subject, &request.domain);
        let decision = self.decide(
            &request.subject,
            &request.domain,
            &request.object,
            &request.action,
            &roles,
        );
        Explanation {
            request: request.clone(),
            roles,
            decision,
        }
    }

    fn decide(
        &self,
        subject: &str,
        domain: &str,
        object: &str,
        action: &str,
        roles: &BTreeSet<String>,
    ) -> Decision {
        // A rule naming the subject itself applies as well.
        let mut candidates = roles.clone();
        candidates.insert(subject.to_string());

        let matcher = self.model.object_matcher();
        match self.store.find_policy(domain, &candidates, |rule| {
            rule.action == action && matcher.matches(object, &rule.object)
        }) {
            Some(rule) => Decision::Allow { rule },
            None if roles.is_empty() => {
                Decision::deny(format!("{subject} has no role in domain {domain}"))
            }
            None => Decision::deny(format!(
                "no rule in domain {domain} grants {action} {object} to {subject}"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbac::adapter::MemoryAdapter;
    use crate::rbac::models::{Grouping, PolicyRule};
    use std::sync::Arc;

    async fn enforcer(provisioning: Provisioning) -> Enforcer {
        let store = PolicyStore::open(Arc::new(MemoryAdapter::new())).await.unwrap();
        let assignment = RoleAssignmentService::new(store.clone(), "reader");
        Enforcer::new(store, PolicyModel::default_model(), assignment, provisioning)
    }

    #[tokio::test]
    async fn test_explicit_mode_never_writes() {
        let e = enforcer(Provisioning::Explicit).await;
        e.store()
            .add_policy(PolicyRule::new("reader", "org42", "/orgs/get/org42", "GET"))
            .await
            .unwrap();

        let decision = e.enforce("u1", "org42", "/orgs/get/org42", "GET").await.unwrap();
        assert!(decision.is_denied());
        assert!(e.store().direct_roles("u1", "org42").is_empty());
    }

    #[tokio::test]
    async fn test_action_is_exact_and_case_sensitive() {
        let e = enforcer(Provisioning::Explicit).await;
        e.store()
            .add_policy(PolicyRule::new("reader", "org42", "/orgs/get/:id", "GET"))
            .await
            .unwrap();
        e.store().add_grouping(Grouping::new("u1", "reader", "org42")).await.unwrap();

        assert!(e.enforce("u1", "org42", "/orgs/get/org42", "GET").await.unwrap().is_allowed());
        assert!(e.enforce("u1", "org42", "/orgs/get/org42", "get").await.unwrap().is_denied());
        assert!(e.enforce("u1", "org42", "/orgs/get/org42", "POST").await.unwrap().is_denied());
    }

    #[tokio::test]
    async fn test_rule_on_subject_itself() {
        let e = enforcer(Provisioning::Explicit).await;
        e.store()
            .add_policy(PolicyRule::new("u7", "main", "/home", "GET"))
            .await
            .unwrap();
        assert!(e.enforce("u7", "main", "/home", "GET").await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn test_explain_reports_roles() {
        let e = enforcer(Provisioning::Lazy).await;
        e.store().add_grouping(Grouping::new("u1", "writer", "org42")).await.unwrap();
        e.store().add_grouping(Grouping::new("writer", "reader", "org42")).await.unwrap();

        let explanation = e.explain(&AuthzRequest::new("u1", "org42", "/x", "GET"));
        assert!(explanation.decision.is_denied());
        assert_eq!(explanation.roles.len(), 2);

        // explain never provisions, even in lazy mode
        e.explain(&AuthzRequest::new("u9", "org42", "/x", "GET"));
        assert!(e.store().direct_roles("u9", "org42").is_empty());
    }
}

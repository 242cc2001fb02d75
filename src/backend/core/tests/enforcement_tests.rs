//! Integration tests for the policy store, enforcer and role assignment.

use std::sync::Arc;

use warden_core::error::ErrorCode;
use warden_core::rbac::{
    AuthzRequest, Decision, Enforcer, Grouping, MemoryAdapter, PolicyModel, PolicyRule,
    PolicyStore, Provisioning, ReplaceOutcome, RoleAssignmentService,
};

// ============================================================================
// Test Utilities
// ============================================================================

async fn setup(provisioning: Provisioning) -> (Enforcer, RoleAssignmentService) {
    let store = PolicyStore::open(Arc::new(MemoryAdapter::new()))
        .await
        .unwrap();
    let assignment = RoleAssignmentService::new(store.clone(), "reader");
    let enforcer = Enforcer::new(
        store,
        PolicyModel::default_model(),
        assignment.clone(),
        provisioning,
    );
    (enforcer, assignment)
}

fn reader_rule(domain: &str) -> PolicyRule {
    PolicyRule::new("reader", domain, format!("/orgs/get/{domain}"), "GET")
}

// ============================================================================
// End-to-end scenario A
// ============================================================================

#[tokio::test]
async fn test_first_check_provisions_and_allows_with_rule() {
    let (enforcer, assignment) = setup(Provisioning::Lazy).await;
    assignment.store().add_policy(reader_rule("org42")).await.unwrap();

    let decision = enforcer
        .enforce("u1", "org42", "/orgs/get/org42", "GET")
        .await
        .unwrap();

    assert!(decision.is_allowed());
    assert!(assignment.store().direct_roles("u1", "org42").contains("reader"));
}

#[tokio::test]
async fn test_first_check_provisions_and_denies_without_rule() {
    let (enforcer, assignment) = setup(Provisioning::Lazy).await;

    let decision = enforcer
        .enforce("u1", "org42", "/orgs/get/org42", "GET")
        .await
        .unwrap();

    assert!(decision.is_denied());
    assert!(assignment.store().direct_roles("u1", "org42").contains("reader"));
}

#[tokio::test]
async fn test_explicit_mode_never_writes_on_check() {
    let (enforcer, assignment) = setup(Provisioning::Explicit).await;
    assignment.store().add_policy(reader_rule("org42")).await.unwrap();

    let decision = enforcer
        .enforce("u1", "org42", "/orgs/get/org42", "GET")
        .await
        .unwrap();
    assert!(decision.is_denied());
    assert!(assignment.store().direct_roles("u1", "org42").is_empty());

    assignment.ensure_default_role("u1", "org42").await.unwrap();
    let decision = enforcer
        .enforce("u1", "org42", "/orgs/get/org42", "GET")
        .await
        .unwrap();
    assert!(decision.is_allowed());
}

// ============================================================================
// Domain isolation and hierarchy
// ============================================================================

#[tokio::test]
async fn test_role_in_one_domain_does_not_leak() {
    let (enforcer, assignment) = setup(Provisioning::Explicit).await;
    let store = assignment.store();
    store.add_policy(reader_rule("org42")).await.unwrap();
    store.add_policy(reader_rule("org7")).await.unwrap();
    store.add_policy(PolicyRule::new("admin", "org7", "/orgs/*", "POST")).await.unwrap();
    assignment.add_role("u1", "admin", "org42").await.unwrap();

    for (object, action) in [("/orgs/get/org7", "GET"), ("/orgs/update-role/org7", "POST")] {
        let decision = enforcer.enforce("u1", "org7", object, action).await.unwrap();
        assert!(decision.is_denied(), "{object} {action} leaked into org7");
    }
}

#[tokio::test]
async fn test_hierarchy_is_transitive() {
    let (enforcer, assignment) = setup(Provisioning::Explicit).await;
    let store = assignment.store();
    store.add_grouping(Grouping::new("A", "B", "org42")).await.unwrap();
    store.add_grouping(Grouping::new("B", "C", "org42")).await.unwrap();
    store
        .add_policy(PolicyRule::new("C", "org42", "/reports/*", "GET"))
        .await
        .unwrap();

    let roles = store.roles_of("A", "org42");
    assert!(roles.contains("B") && roles.contains("C"));

    let decision = enforcer
        .enforce("A", "org42", "/reports/q3", "GET")
        .await
        .unwrap();
    assert!(matches!(decision, Decision::Allow { .. }));
    assert_eq!(decision.matched_rule().unwrap().role, "C");
}

#[tokio::test]
async fn test_cyclic_groupings_terminate() {
    let (enforcer, assignment) = setup(Provisioning::Explicit).await;
    let store = assignment.store();
    store.add_grouping(Grouping::new("A", "B", "org42")).await.unwrap();
    store.add_grouping(Grouping::new("B", "A", "org42")).await.unwrap();
    store.add_grouping(Grouping::new("u1", "A", "org42")).await.unwrap();

    let roles = store.roles_of("u1", "org42");
    assert_eq!(roles.len(), 2);

    let decision = enforcer
        .enforce("u1", "org42", "/anything", "GET")
        .await
        .unwrap();
    assert!(decision.is_denied());
}

#[tokio::test]
async fn test_action_and_domain_are_exact() {
    let (enforcer, assignment) = setup(Provisioning::Explicit).await;
    assignment.store().add_policy(reader_rule("org42")).await.unwrap();
    assignment.add_role("u1", "reader", "org42").await.unwrap();

    assert!(enforcer
        .enforce("u1", "org42", "/orgs/get/org42", "get")
        .await
        .unwrap()
        .is_denied());
    assert!(enforcer
        .enforce("u1", "ORG42", "/orgs/get/org42", "GET")
        .await
        .unwrap()
        .is_denied());
}

#[tokio::test]
async fn test_tenant_template_grants_owner_everything() {
    let (enforcer, assignment) = setup(Provisioning::Explicit).await;
    assignment.provision_tenant("org42", "owner1").await.unwrap();

    for (object, action) in [
        ("/orgs/get/org42", "GET"),
        ("/orgs/invite/org42", "POST"),
        ("/orgs/update-role/org42", "POST"),
    ] {
        let request = AuthzRequest::new("owner1", "org42", object, action);
        assert!(enforcer.authorize(&request).await.unwrap().is_allowed());
    }

    let explanation = enforcer.explain(&AuthzRequest::new("owner1", "org42", "/orgs/accept/org42", "GET"));
    assert!(explanation.decision.is_denied());
    assert!(explanation.roles.contains("admin"));
}

// ============================================================================
// Idempotence and concurrency
// ============================================================================

#[tokio::test]
async fn test_duplicate_adds_are_no_ops() {
    let (_, assignment) = setup(Provisioning::Explicit).await;
    let store = assignment.store();

    assert!(store.add_policy(reader_rule("org42")).await.unwrap());
    assert!(!store.add_policy(reader_rule("org42")).await.unwrap());
    assert!(store.add_grouping(Grouping::new("u1", "reader", "org42")).await.unwrap());
    assert!(!store.add_grouping(Grouping::new("u1", "reader", "org42")).await.unwrap());

    assert_eq!(store.policies_in("org42").len(), 1);
    assert_eq!(store.groupings_in("org42").len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_default_role_granted_once() {
    let (enforcer, assignment) = setup(Provisioning::Lazy).await;
    let enforcer = Arc::new(enforcer);

    let handles: Vec<_> = (0..32)
        .map(|_| {
            let enforcer = enforcer.clone();
            tokio::spawn(async move {
                enforcer
                    .enforce("u1", "org42", "/orgs/get/org42", "GET")
                    .await
                    .unwrap()
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    let groupings = assignment.store().groupings_in("org42");
    assert_eq!(groupings.len(), 1);
    assert_eq!(groupings[0], Grouping::new("u1", "reader", "org42"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_replace_converges() {
    let (_, assignment) = setup(Provisioning::Explicit).await;
    assignment.add_role("u1", "reader", "org42").await.unwrap();

    let expected = vec!["reader".to_string()];
    let a = {
        let assignment = assignment.clone();
        let expected = expected.clone();
        tokio::spawn(async move {
            assignment
                .replace_role("u1", Some(&expected), "writer", "org42")
                .await
        })
    };
    let b = {
        let assignment = assignment.clone();
        let expected = expected.clone();
        tokio::spawn(async move {
            assignment
                .replace_role("u1", Some(&expected), "writer", "org42")
                .await
        })
    };

    let outcomes = [a.await.unwrap().unwrap(), b.await.unwrap().unwrap()];
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| matches!(o, ReplaceOutcome::Replaced { .. }))
            .count(),
        1
    );

    let roles = assignment.store().direct_roles("u1", "org42");
    assert_eq!(roles.into_iter().collect::<Vec<_>>(), vec!["writer".to_string()]);
}

#[tokio::test]
async fn test_replace_with_stale_expectation_conflicts() {
    let (_, assignment) = setup(Provisioning::Explicit).await;
    assignment.add_role("u1", "reader", "org42").await.unwrap();
    assignment
        .replace_role("u1", None, "admin", "org42")
        .await
        .unwrap();

    let stale = vec!["reader".to_string()];
    let err = assignment
        .replace_role("u1", Some(&stale), "writer", "org42")
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::RoleConflict);
    assert!(assignment.store().direct_roles("u1", "org42").contains("admin"));
}

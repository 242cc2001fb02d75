//! Persistence tests for the policy store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;
use warden_core::error::{ErrorCode, Result, WardenError};
use warden_core::rbac::{
    FileAdapter, Grouping, MemoryAdapter, PolicyAdapter, PolicyRule, PolicyStore,
    RoleAssignmentService, RuleLine,
};

// ============================================================================
// Test Utilities
// ============================================================================

/// Adapter that refuses writes while `down` is set.
#[derive(Default)]
struct SwitchableAdapter {
    inner: MemoryAdapter,
    down: AtomicBool,
}

impl SwitchableAdapter {
    fn check(&self) -> Result<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(WardenError::store_unavailable("backend is down"));
        }
        Ok(())
    }
}

#[async_trait]
impl PolicyAdapter for SwitchableAdapter {
    fn name(&self) -> &'static str {
        "switchable"
    }

    async fn load_lines(&self) -> Result<Vec<RuleLine>> {
        self.check()?;
        self.inner.load_lines().await
    }

    async fn append_line(&self, line: &RuleLine) -> Result<()> {
        self.check()?;
        self.inner.append_line(line).await
    }

    async fn remove_line(&self, line: &RuleLine) -> Result<()> {
        self.check()?;
        self.inner.remove_line(line).await
    }

    async fn replace_lines(&self, remove: &[RuleLine], add: &[RuleLine]) -> Result<()> {
        self.check()?;
        self.inner.replace_lines(remove, add).await
    }
}

// ============================================================================
// File backend
// ============================================================================

#[tokio::test]
async fn test_file_store_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("policy.csv");

    {
        let store = PolicyStore::open(Arc::new(FileAdapter::new(&path)))
            .await
            .unwrap();
        let assignment = RoleAssignmentService::new(store.clone(), "reader");
        assignment.provision_tenant("org42", "owner1").await.unwrap();
        assignment.grant_pending_invite("u2", "org42").await.unwrap();
    }

    let reopened = PolicyStore::open(Arc::new(FileAdapter::new(&path)))
        .await
        .unwrap();
    assert_eq!(reopened.policies_in("org42").len(), 4);
    assert!(reopened.roles_of("owner1", "org42").contains("reader"));
    assert!(reopened.direct_roles("u2", "org42").contains("invite"));

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("p,reader,org42,/orgs/get/org42,GET"));
    assert!(text.contains("g,u2,invite,org42"));
}

#[tokio::test]
async fn test_file_replace_is_persisted() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("policy.csv");
    let store = PolicyStore::open(Arc::new(FileAdapter::new(&path)))
        .await
        .unwrap();
    let assignment = RoleAssignmentService::new(store, "reader");

    assignment.grant_pending_invite("u2", "org42").await.unwrap();
    let invite = vec!["invite".to_string()];
    assignment
        .replace_role("u2", Some(&invite), "reader", "org42")
        .await
        .unwrap();

    let reopened = PolicyStore::open(Arc::new(FileAdapter::new(&path)))
        .await
        .unwrap();
    let roles: Vec<String> = reopened.direct_roles("u2", "org42").into_iter().collect();
    assert_eq!(roles, vec!["reader".to_string()]);
}

#[tokio::test]
async fn test_corrupted_row_fails_open() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("policy.csv");
    std::fs::write(&path, "# comment\n\np, reader, org42, /x, GET\nq, broken\n").unwrap();

    let err = PolicyStore::open(Arc::new(FileAdapter::new(&path)))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::StoreCorrupted);
}

async fn open_file(path: &std::path::Path) -> Result<PolicyStore> {
    PolicyStore::open(Arc::new(FileAdapter::new(path))).await
}

#[tokio::test]
async fn test_comma_in_object_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("policy.csv");
    let rule = PolicyRule::new("reader", "org42", "/reports/a,b", "GET");

    let store = open_file(&path).await.unwrap();
    assert!(store.add_policy(rule.clone()).await.unwrap());

    let reopened = open_file(&path).await.unwrap();
    assert_eq!(reopened.policies_in("org42"), vec![rule]);
}

#[tokio::test]
async fn test_comma_in_domain_stays_in_its_domain() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("policy.csv");

    let store = open_file(&path).await.unwrap();
    let assignment = RoleAssignmentService::new(store, "reader");
    assignment.grant_pending_invite("u2", "org,42").await.unwrap();

    let reopened = open_file(&path).await.unwrap();
    assert!(reopened.direct_roles("u2", "org,42").contains("invite"));
    assert!(reopened.direct_roles("u2", "org").is_empty());
    assert_eq!(reopened.domains(), vec!["org,42".to_string()]);
}

#[tokio::test]
async fn test_unstorable_values_are_rejected_and_store_still_opens() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("policy.csv");
    let store = open_file(&path).await.unwrap();

    let err = store
        .add_policy(PolicyRule::new("reader", "org42", "", "GET"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValidationError);

    let err = store
        .add_grouping(Grouping::new("u1", " reader", "org42"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValidationError);

    let err = store
        .replace_groupings("u1", "org42", None, "")
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValidationError);

    assert!(store.policies_in("org42").is_empty());
    let reopened = open_file(&path).await.unwrap();
    assert!(reopened.domains().is_empty());
}

#[tokio::test]
async fn test_append_after_seed_without_trailing_newline() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("policy.csv");
    std::fs::write(&path, "p, reader, org42, /x, GET").unwrap();

    let store = open_file(&path).await.unwrap();
    store
        .add_grouping(Grouping::new("u1", "reader", "org42"))
        .await
        .unwrap();

    let reopened = open_file(&path).await.unwrap();
    assert_eq!(reopened.policies_in("org42").len(), 1);
    assert!(reopened.direct_roles("u1", "org42").contains("reader"));
}

// ============================================================================
// Persist before apply
// ============================================================================

#[tokio::test]
async fn test_failed_write_leaves_view_unchanged() {
    let adapter = Arc::new(SwitchableAdapter::default());
    let store = PolicyStore::open(adapter.clone()).await.unwrap();
    store
        .add_grouping(Grouping::new("u1", "reader", "org42"))
        .await
        .unwrap();

    adapter.down.store(true, Ordering::SeqCst);

    let err = store
        .add_policy(PolicyRule::new("reader", "org42", "/x", "GET"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::StoreUnavailable);
    assert!(err.is_retryable());
    assert!(store.policies_in("org42").is_empty());

    let err = store
        .replace_groupings("u1", "org42", None, "writer")
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::StoreUnavailable);
    assert!(store.direct_roles("u1", "org42").contains("reader"));

    adapter.down.store(false, Ordering::SeqCst);
    assert!(store
        .add_policy(PolicyRule::new("reader", "org42", "/x", "GET"))
        .await
        .unwrap());
}

#[tokio::test]
async fn test_refresh_picks_up_external_writes() {
    let adapter = MemoryAdapter::new();
    let store = PolicyStore::open(Arc::new(adapter.clone())).await.unwrap();
    assert!(store.direct_roles("u9", "org42").is_empty());

    adapter
        .append_line(&RuleLine::from(Grouping::new("u9", "writer", "org42")))
        .await
        .unwrap();
    store.refresh().await.unwrap();

    assert!(store.direct_roles("u9", "org42").contains("writer"));
    assert_eq!(store.domains(), vec!["org42".to_string()]);
}

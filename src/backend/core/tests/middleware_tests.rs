//! Tests for the Axum authorization layer.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::Request,
    http::StatusCode,
    middleware::{self, Next},
    response::Response,
    routing::get,
    Router,
};
use tower::ServiceExt;

use warden_core::error::{Result, WardenError};
use warden_core::rbac::{
    AuthorizeLayer, AuthzContext, DomainSource, Enforcer, MemoryAdapter, PolicyAdapter,
    PolicyModel, PolicyStore, Provisioning, RoleAssignmentService, RuleLine, Subject,
};

// ============================================================================
// Test Utilities
// ============================================================================

/// Loads fine, refuses every write.
struct ReadOnlyAdapter;

#[async_trait]
impl PolicyAdapter for ReadOnlyAdapter {
    fn name(&self) -> &'static str {
        "read-only"
    }

    async fn load_lines(&self) -> Result<Vec<RuleLine>> {
        Ok(Vec::new())
    }

    async fn append_line(&self, _line: &RuleLine) -> Result<()> {
        Err(WardenError::store_unavailable("read-only"))
    }

    async fn remove_line(&self, _line: &RuleLine) -> Result<()> {
        Err(WardenError::store_unavailable("read-only"))
    }

    async fn replace_lines(&self, _remove: &[RuleLine], _add: &[RuleLine]) -> Result<()> {
        Err(WardenError::store_unavailable("read-only"))
    }
}

async fn inject_subject(mut request: Request, next: Next) -> Response {
    let subject = request
        .headers()
        .get("x-subject")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    if let Some(subject) = subject {
        request.extensions_mut().insert(Subject::new(subject));
    }
    next.run(request).await
}

async fn get_org(ctx: AuthzContext) -> String {
    format!("{}:{}:{}", ctx.subject, ctx.domain, ctx.rule.role)
}

async fn app(adapter: Arc<dyn PolicyAdapter>, provisioning: Provisioning) -> (Router, RoleAssignmentService) {
    let store = PolicyStore::open(adapter).await.unwrap();
    let assignment = RoleAssignmentService::new(store.clone(), "reader");
    let enforcer = Arc::new(Enforcer::new(
        store,
        PolicyModel::default_model(),
        assignment.clone(),
        provisioning,
    ));

    let router = Router::new()
        .route("/orgs/get/:org", get(get_org))
        .layer(AuthorizeLayer::new(enforcer, DomainSource::PathSegment(2)))
        .layer(middleware::from_fn(inject_subject));
    (router, assignment)
}

fn request(path: &str, subject: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(path);
    if let Some(subject) = subject {
        builder = builder.header("x-subject", subject);
    }
    builder.body(Body::empty()).unwrap()
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_allowed_request_reaches_handler_with_context() {
    let (router, assignment) = app(Arc::new(MemoryAdapter::new()), Provisioning::Explicit).await;
    assignment.provision_tenant("org42", "owner1").await.unwrap();

    let response = router
        .oneshot(request("/orgs/get/org42", Some("owner1")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], b"owner1:org42:reader");
}

#[tokio::test]
async fn test_denied_request_is_forbidden() {
    let (router, assignment) = app(Arc::new(MemoryAdapter::new()), Provisioning::Explicit).await;
    assignment.provision_tenant("org42", "owner1").await.unwrap();

    let response = router
        .clone()
        .oneshot(request("/orgs/get/org7", Some("owner1")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = router
        .oneshot(request("/orgs/get/org42", Some("stranger")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_missing_subject_is_unauthorized() {
    let (router, _) = app(Arc::new(MemoryAdapter::new()), Provisioning::Explicit).await;

    let response = router
        .oneshot(request("/orgs/get/org42", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_store_failure_is_server_error_not_deny() {
    let (router, _) = app(Arc::new(ReadOnlyAdapter), Provisioning::Lazy).await;

    let response = router
        .oneshot(request("/orgs/get/org42", Some("u1")))
        .await
        .unwrap();

    assert!(response.status().is_server_error());
    assert_ne!(response.status(), StatusCode::FORBIDDEN);
}

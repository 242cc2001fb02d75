//! Axum authorization middleware backed by the [`Enforcer`].
//!
//! An upstream layer (session validation, token auth, ...) identifies the
//! caller and inserts a [`Subject`] into the request extensions. This layer
//! resolves the request's domain, asks the enforcer about `(subject, domain,
//! path, method)`, and either forwards the request or answers it:
//!
//! - deny → 403
//! - missing subject → 401
//! - enforcement failure → the error's own 5xx status, never 403

use axum::{
    body::Body,
    extract::{FromRequestParts, Request},
    http::{request::Parts, HeaderName},
    response::{IntoResponse, Response},
};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::warn;

use super::enforcer::Enforcer;
use super::models::{Decision, PolicyRule, GLOBAL_DOMAIN};
use crate::error::WardenError;

// ═══════════════════════════════════════════════════════════════════════════════
// Request context
// ═══════════════════════════════════════════════════════════════════════════════

/// The authenticated caller, as an opaque identity string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject(pub String);

impl Subject {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Inserted for downstream handlers once a request is allowed.
#[derive(Debug, Clone)]
pub struct AuthzContext {
    pub subject: String,
    pub domain: String,
    /// The rule that allowed the request.
    pub rule: PolicyRule,
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthzContext
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<AuthzContext>().cloned().ok_or_else(|| {
            WardenError::internal("AuthzContext requested on a route without AuthorizeLayer")
                .into_response()
        })
    }
}

/// Where a request's domain comes from.
#[derive(Debug, Clone)]
pub enum DomainSource {
    /// Every request is checked against one fixed domain.
    Fixed(String),
    /// The n-th non-empty path segment (`/orgs/get/org42` → index 2 is `org42`).
    PathSegment(usize),
    /// A request header, e.g. `x-org-id`.
    Header(HeaderName),
}

impl DomainSource {
    /// The global domain.
    pub fn global() -> Self {
        Self::Fixed(GLOBAL_DOMAIN.to_string())
    }

    fn resolve<B>(&self, request: &Request<B>) -> Option<String> {
        match self {
            Self::Fixed(domain) => Some(domain.clone()),
            Self::PathSegment(index) => request
                .uri()
                .path()
                .split('/')
                .filter(|s| !s.is_empty())
                .nth(*index)
                .map(str::to_string),
            Self::Header(name) => request
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tower Layer
// ═══════════════════════════════════════════════════════════════════════════════

/// Layer that authorizes every request against the enforcer.
///
/// ```rust,ignore
/// let app = Router::new()
///     .route("/orgs/get/:org", get(get_org))
///     .layer(AuthorizeLayer::new(enforcer, DomainSource::PathSegment(2)))
///     .layer(session_layer); // inserts Subject
/// ```
#[derive(Clone)]
pub struct AuthorizeLayer {
    enforcer: Arc<Enforcer>,
    domain: DomainSource,
}

impl AuthorizeLayer {
    pub fn new(enforcer: Arc<Enforcer>, domain: DomainSource) -> Self {
        Self { enforcer, domain }
    }
}

impl<S> Layer<S> for AuthorizeLayer {
    type Service = AuthorizeService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthorizeService {
            inner,
            enforcer: self.enforcer.clone(),
            domain: self.domain.clone(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tower Service
// ═══════════════════════════════════════════════════════════════════════════════

/// Service that authorizes each request before calling `inner`.
#[derive(Clone)]
pub struct AuthorizeService<S> {
    inner: S,
    enforcer: Arc<Enforcer>,
    domain: DomainSource,
}

impl<S> Service<Request<Body>> for AuthorizeService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<Body>) -> Self::Future {
        let enforcer = self.enforcer.clone();
        let domain = self.domain.resolve(&request);
        // Take the service that was driven to readiness; leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let Some(subject) = request.extensions().get::<Subject>().cloned() else {
                return Ok(WardenError::unauthorized("Authentication required").into_response());
            };
            let Some(domain) = domain else {
                return Ok(WardenError::forbidden("Request does not name an organization")
                    .into_response());
            };

            let object = request.uri().path().to_string();
            let action = request.method().as_str().to_string();

            match enforcer.enforce(subject.as_str(), &domain, &object, &action).await {
                Ok(Decision::Allow { rule }) => {
                    request.extensions_mut().insert(AuthzContext {
                        subject: subject.0,
                        domain,
                        rule,
                    });
                    inner.call(request).await
                }
                Ok(Decision::Deny { reason }) => {
                    warn!(
                        subject = %subject.as_str(),
                        domain = %domain,
                        object = %object,
                        action = %action,
                        reason = %reason,
                        "Access denied"
                    );
                    Ok(WardenError::forbidden("Access denied").into_response())
                }
                Err(e) => Ok(e.into_response()),
            }
        })
    }
}

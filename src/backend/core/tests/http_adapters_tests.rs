//! Tests for the HTTP identity directory and notifier against a mock server.

use std::time::Duration;

use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use warden_core::directory::{HttpIdentityDirectory, IdentityDirectory};
use warden_core::error::ErrorCode;
use warden_core::notify::{HttpNotifier, InviteNotification, Notifier};

fn notification(accepted: bool) -> InviteNotification {
    InviteNotification {
        email: "a@b.com".into(),
        domain: "org42".into(),
        domain_name: "Acme".into(),
        description: "Widgets".into(),
        accepted,
    }
}

// ============================================================================
// Identity directory
// ============================================================================

#[tokio::test]
async fn test_directory_finds_identity_by_email() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/admin/identities"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {"id": "u1", "traits": {"email": "owner@b.com"}},
            {"id": "u2", "traits": {"email": "a@b.com", "name": "Ada"}},
            {"id": "u3", "traits": {"email": null}}
        ])))
        .expect(2)
        .mount(&server)
        .await;

    let directory = HttpIdentityDirectory::new(server.uri(), Duration::from_secs(2)).unwrap();

    let found = directory.find_by_email("a@b.com").await.unwrap().unwrap();
    assert_eq!(found.id, "u2");
    assert_eq!(found.traits.name.as_deref(), Some("Ada"));
    assert!(directory.find_by_email("x@b.com").await.unwrap().is_none());
}

#[tokio::test]
async fn test_directory_error_status_is_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/admin/identities"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let directory = HttpIdentityDirectory::new(server.uri(), Duration::from_secs(2)).unwrap();
    let err = directory.list_identities().await.unwrap_err();

    assert_eq!(err.code(), ErrorCode::DirectoryUnavailable);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_directory_unreachable_is_retryable() {
    let directory =
        HttpIdentityDirectory::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
    let err = directory.list_identities().await.unwrap_err();

    assert_eq!(err.code(), ErrorCode::DirectoryUnavailable);
    assert!(err.is_retryable());
}

// ============================================================================
// Notifier
// ============================================================================

#[tokio::test]
async fn test_notifier_posts_workflow_event() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/events/trigger"))
        .and(header("authorization", "ApiKey secret"))
        .and(body_partial_json(serde_json::json!({
            "name": "org-invite-notification",
            "to": {"subscriberId": "a@b.com", "email": "a@b.com"},
            "payload": {"orgId": "org42", "orgName": "Acme", "accepted": false}
        })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let notifier = HttpNotifier::new(
        format!("{}/v1/events/trigger", server.uri()),
        "secret",
        "org-invite-notification",
        Duration::from_secs(2),
    )
    .unwrap();

    notifier
        .send_invite_notification(&notification(false))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_notifier_rejects_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400))
        .mount(&server)
        .await;

    let notifier = HttpNotifier::new(
        format!("{}/v1/events/trigger", server.uri()),
        "secret",
        "org-invite-notification",
        Duration::from_secs(2),
    )
    .unwrap();

    let err = notifier
        .send_invite_notification(&notification(true))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotificationFailed);
    assert!(err.is_retryable());
}

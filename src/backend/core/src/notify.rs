//! Invite notifications.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{ErrorCode, Result, WardenError};

/// What the invitee is told about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteNotification {
    pub email: String,
    pub domain: String,
    pub domain_name: String,
    #[serde(default)]
    pub description: String,
    /// `false` for the invite itself, `true` once it has been accepted
    pub accepted: bool,
}

/// Outbound notification transport.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_invite_notification(&self, notification: &InviteNotification) -> Result<()>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// HTTP notifier
// ═══════════════════════════════════════════════════════════════════════════════

/// Triggers a workflow on a Novu-style event endpoint.
#[derive(Debug, Clone)]
pub struct HttpNotifier {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    workflow: String,
}

impl HttpNotifier {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        workflow: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                WardenError::configuration(format!("cannot build notifier HTTP client: {e}"))
            })?;
        Ok(Self::with_client(client, endpoint, api_key, workflow))
    }

    pub fn with_client(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        workflow: impl Into<String>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            workflow: workflow.into(),
        }
    }

    fn body(&self, n: &InviteNotification) -> serde_json::Value {
        serde_json::json!({
            "name": self.workflow,
            "to": {
                "subscriberId": n.email,
                "email": n.email,
            },
            "payload": {
                "orgId": n.domain,
                "orgName": n.domain_name,
                "description": n.description,
                "accepted": n.accepted,
            },
        })
    }

    fn failed(&self, detail: String) -> WardenError {
        WardenError::with_internal(
            ErrorCode::NotificationFailed,
            "Failed to send invite notification",
            format!("POST {}: {detail}", self.endpoint),
        )
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn send_invite_notification(&self, notification: &InviteNotification) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::AUTHORIZATION, format!("ApiKey {}", self.api_key))
            .json(&self.body(notification))
            .send()
            .await
            .map_err(|e| self.failed(e.to_string()).with_source(e))?;

        let status = response.status();
        if status.as_u16() >= 400 {
            return Err(self.failed(format!("returned {status}")));
        }

        debug!(
            domain = %notification.domain,
            accepted = notification.accepted,
            "Invite notification sent"
        );
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// No-op notifier
// ═══════════════════════════════════════════════════════════════════════════════

/// Used when no endpoint is configured. Drops every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn send_invite_notification(&self, notification: &InviteNotification) -> Result<()> {
        warn!(
            domain = %notification.domain,
            accepted = notification.accepted,
            "No notification endpoint configured; invite notification dropped"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_shape() {
        let notifier = HttpNotifier::with_client(
            reqwest::Client::new(),
            "http://localhost/v1/events/trigger",
            "key",
            "org-invite-notification",
        );
        let body = notifier.body(&InviteNotification {
            email: "a@b.com".into(),
            domain: "org42".into(),
            domain_name: "Acme".into(),
            description: "Widgets".into(),
            accepted: false,
        });

        assert_eq!(body["name"], "org-invite-notification");
        assert_eq!(body["to"]["subscriberId"], "a@b.com");
        assert_eq!(body["payload"]["orgId"], "org42");
        assert_eq!(body["payload"]["accepted"], false);
    }

    #[tokio::test]
    async fn test_noop_always_succeeds() {
        let n = InviteNotification {
            email: "a@b.com".into(),
            domain: "org42".into(),
            domain_name: "Acme".into(),
            description: String::new(),
            accepted: true,
        };
        assert!(NoopNotifier.send_invite_notification(&n).await.is_ok());
    }
}

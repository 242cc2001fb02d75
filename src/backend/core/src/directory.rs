//! External identity directory.
//!
//! Identities come from an external provider's admin API as a JSON array.
//! Records are decoded leniently: a missing or non-string email decodes as
//! `None` and never matches, instead of failing the whole listing.

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::error::{ErrorCode, Result, WardenError};

// ═══════════════════════════════════════════════════════════════════════════════
// Identity records
// ═══════════════════════════════════════════════════════════════════════════════

/// An identity as listed by the directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    #[serde(default)]
    pub id: String,
    #[serde(default, deserialize_with = "lenient_traits")]
    pub traits: IdentityTraits,
}

/// The profile fields we read from an identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityTraits {
    #[serde(default, deserialize_with = "lenient_string")]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: Option<String>,
}

impl Identity {
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            traits: IdentityTraits {
                email: Some(email.into()),
                name: None,
            },
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.traits.name = Some(name.into());
        self
    }

    /// Exact match after trimming surrounding whitespace on both sides.
    pub fn has_email(&self, email: &str) -> bool {
        !self.id.is_empty()
            && self
                .traits
                .email
                .as_deref()
                .map_or(false, |own| own.trim() == email.trim())
    }
}

fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<serde_json::Value>::deserialize(deserializer)? {
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        _ => Ok(None),
    }
}

fn lenient_traits<'de, D>(deserializer: D) -> std::result::Result<IdentityTraits, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default())
}

// ═══════════════════════════════════════════════════════════════════════════════
// Directory trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Read access to the external identity directory.
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    /// List every identity.
    async fn list_identities(&self) -> Result<Vec<Identity>>;

    /// Find the identity whose email matches `email`.
    async fn find_by_email(&self, email: &str) -> Result<Option<Identity>> {
        let identities = self.list_identities().await?;
        debug!(count = identities.len(), "Identities listed");
        Ok(identities.into_iter().find(|i| i.has_email(email)))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HTTP directory
// ═══════════════════════════════════════════════════════════════════════════════

/// Directory backed by an identity provider's admin API
/// (`GET {base_url}/admin/identities`).
#[derive(Debug, Clone)]
pub struct HttpIdentityDirectory {
    client: reqwest::Client,
    base_url: String,
}

impl HttpIdentityDirectory {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                WardenError::configuration(format!("cannot build directory HTTP client: {e}"))
            })?;
        Ok(Self::with_client(client, base_url))
    }

    /// Use a custom HTTP client.
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn identities_url(&self) -> String {
        format!("{}/admin/identities", self.base_url)
    }
}

#[async_trait]
impl IdentityDirectory for HttpIdentityDirectory {
    async fn list_identities(&self) -> Result<Vec<Identity>> {
        let url = self.identities_url();
        let response = self.client.get(&url).send().await.map_err(|e| {
            WardenError::with_internal(
                ErrorCode::DirectoryUnavailable,
                "The identity directory is unavailable",
                format!("GET {url}: {e}"),
            )
            .with_source(e)
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(WardenError::with_internal(
                ErrorCode::DirectoryUnavailable,
                "The identity directory is unavailable",
                format!("GET {url} returned {status}"),
            ));
        }

        Ok(response.json::<Vec<Identity>>().await?)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Static directory
// ═══════════════════════════════════════════════════════════════════════════════

/// Fixed list of identities, for tests and local development.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentityDirectory {
    identities: Vec<Identity>,
}

impl StaticIdentityDirectory {
    pub fn new(identities: Vec<Identity>) -> Self {
        Self { identities }
    }

    /// Add one identity.
    pub fn with(mut self, id: impl Into<String>, email: impl Into<String>) -> Self {
        self.identities.push(Identity::new(id, email));
        self
    }
}

#[async_trait]
impl IdentityDirectory for StaticIdentityDirectory {
    async fn list_identities(&self) -> Result<Vec<Identity>> {
        Ok(self.identities.clone())
    }
}

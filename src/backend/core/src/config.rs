//! Configuration management.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, WardenError};
use crate::rbac::{Provisioning, DEFAULT_ROLE, GLOBAL_DOMAIN, INVITE_ROLE};
use crate::saga::{RetryPolicy, StepOptions};

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Policy persistence
    #[serde(default)]
    pub store: StoreConfig,

    /// Policy model text
    #[serde(default)]
    pub model: ModelConfig,

    /// Enforcement behaviour
    #[serde(default)]
    pub enforcement: EnforcementConfig,

    /// Saga run/step journal
    #[serde(default)]
    pub journal: JournalConfig,

    /// External identity directory
    #[serde(default)]
    pub directory: DirectoryConfig,

    /// Outbound notifications
    #[serde(default)]
    pub notifications: NotificationConfig,

    /// Per-step invite saga options
    #[serde(default)]
    pub saga: SagaConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    File,
    Postgres,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// CSV file for the file backend
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    /// PostgreSQL connection URL
    pub url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: default_store_path(),
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelConfig {
    /// Model file; the embedded model is used when unset
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnforcementConfig {
    /// Role granted to newly provisioned subjects
    #[serde(default = "default_role")]
    pub default_role: String,

    /// Domain used for global resources
    #[serde(default = "default_global_domain")]
    pub global_domain: String,

    #[serde(default)]
    pub provisioning: Provisioning,
}

impl Default for EnforcementConfig {
    fn default() -> Self {
        Self {
            default_role: default_role(),
            global_domain: default_global_domain(),
            provisioning: Provisioning::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalBackend {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JournalConfig {
    #[serde(default)]
    pub backend: JournalBackend,

    /// Redis connection URL
    pub url: Option<String>,

    /// Namespace for journal keys
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            backend: JournalBackend::default(),
            url: None,
            key_prefix: default_key_prefix(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryConfig {
    /// Admin API base URL of the identity provider
    #[serde(default = "default_directory_url")]
    pub base_url: String,

    #[serde(default = "default_http_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            base_url: default_directory_url(),
            timeout: default_http_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    /// Event trigger endpoint; notifications are dropped when unset
    pub endpoint: Option<String>,

    pub api_key: Option<String>,

    /// Workflow name sent with every event
    #[serde(default = "default_workflow")]
    pub workflow: String,

    #[serde(default = "default_http_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            workflow: default_workflow(),
            timeout: default_http_timeout(),
        }
    }
}

/// Timeout and retry options for each invite step.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SagaConfig {
    #[serde(default)]
    pub resolve_identity: StepOptions,

    #[serde(default = "default_self_invite_options")]
    pub check_self_invite: StepOptions,

    #[serde(default = "default_grant_options")]
    pub grant_pending_invite: StepOptions,

    #[serde(default)]
    pub send_notification: StepOptions,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            resolve_identity: StepOptions::default(),
            check_self_invite: default_self_invite_options(),
            grant_pending_invite: default_grant_options(),
            send_notification: StepOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
        }
    }
}

// Default value functions
fn default_store_path() -> PathBuf { PathBuf::from("warden_policy.csv") }
fn default_max_connections() -> u32 { 10 }
fn default_role() -> String { DEFAULT_ROLE.to_string() }
fn default_global_domain() -> String { GLOBAL_DOMAIN.to_string() }
fn default_key_prefix() -> String { "warden:saga".to_string() }
fn default_directory_url() -> String { "http://localhost:4434".to_string() }
fn default_http_timeout() -> Duration { Duration::from_secs(10) }
fn default_workflow() -> String { "org-invite-notification".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { false }

fn default_self_invite_options() -> StepOptions {
    StepOptions {
        retry: RetryPolicy::no_retry(),
        ..Default::default()
    }
}

fn default_grant_options() -> StepOptions {
    StepOptions {
        retry: RetryPolicy::with_attempts(5),
        ..Default::default()
    }
}

impl Config {
    /// Load configuration from the environment (`WARDEN__SECTION__KEY`).
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("WARDEN").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with the environment layered on top.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("WARDEN").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject combinations that cannot start.
    pub fn validate(&self) -> Result<()> {
        if self.store.backend == StoreBackend::Postgres && self.store.url.is_none() {
            return Err(WardenError::configuration("store.url is required for the postgres backend"));
        }
        if self.journal.backend == JournalBackend::Redis && self.journal.url.is_none() {
            return Err(WardenError::configuration("journal.url is required for the redis backend"));
        }
        if self.notifications.endpoint.is_some() && self.notifications.api_key.is_none() {
            return Err(WardenError::configuration(
                "notifications.api_key is required when an endpoint is set",
            ));
        }
        let role = self.enforcement.default_role.trim();
        if role.is_empty() || role == INVITE_ROLE {
            return Err(WardenError::configuration(format!(
                "enforcement.default_role `{role}` is not usable"
            )));
        }
        Ok(())
    }
}

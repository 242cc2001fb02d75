//! Error handling for Warden.
//!
//! This module provides:
//! - A single error type carrying a stable machine-readable code
//! - HTTP status mapping so infrastructure failures never look like a deny
//! - A business / transient split used at the saga boundary
//! - Error logging with tracing integration
//! - Metrics integration for error tracking
//!
//! # Usage
//!
//! ```rust,ignore
//! use warden_core::error::{WardenError, ErrorCode, Result};
//!
//! fn load() -> Result<()> {
//!     Err(WardenError::store_unavailable("connection refused"))
//! }
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for Warden operations.
pub type Result<T> = std::result::Result<T, WardenError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
///
/// These codes are stable and can be used by callers for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Policy store (1000-1099)
    StoreUnavailable,
    StoreCorrupted,
    JournalUnavailable,

    // Role assignment (1100-1199)
    AlreadyInvited,
    AlreadyMember,
    NoPendingInvite,
    RoleConflict,

    // Invite saga (1200-1299)
    IdentityNotFound,
    SelfInvite,
    RunConflict,
    RunNotFound,
    StepTimeout,
    StepFailed,

    // Serialization (2200-2299)
    SerializationError,
    DeserializationError,

    // External collaborators (3000-3099)
    DirectoryUnavailable,
    NotificationFailed,
    ExternalServiceError,
    NetworkError,

    // Authentication/Authorization (4000-4099)
    Unauthorized,
    Forbidden,

    // Validation (4100-4199)
    ValidationError,

    // Configuration (5000-5099)
    ConfigurationError,
    InvalidConfiguration,
    InvalidModel,

    // Internal (9000-9099)
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::StoreUnavailable => 1000,
            Self::StoreCorrupted => 1001,
            Self::JournalUnavailable => 1002,

            Self::AlreadyInvited => 1100,
            Self::AlreadyMember => 1101,
            Self::NoPendingInvite => 1102,
            Self::RoleConflict => 1103,

            Self::IdentityNotFound => 1200,
            Self::SelfInvite => 1201,
            Self::RunConflict => 1202,
            Self::RunNotFound => 1203,
            Self::StepTimeout => 1204,
            Self::StepFailed => 1205,

            Self::SerializationError => 2200,
            Self::DeserializationError => 2201,

            Self::DirectoryUnavailable => 3000,
            Self::NotificationFailed => 3001,
            Self::ExternalServiceError => 3002,
            Self::NetworkError => 3003,

            Self::Unauthorized => 4000,
            Self::Forbidden => 4001,

            Self::ValidationError => 4100,

            Self::ConfigurationError => 5000,
            Self::InvalidConfiguration => 5001,
            Self::InvalidModel => 5002,

            Self::InternalError => 9000,
        }
    }

    /// Get the HTTP status code for this error.
    pub const fn http_status(&self) -> StatusCode {
        match self {
            Self::IdentityNotFound | Self::RunNotFound | Self::NoPendingInvite => {
                StatusCode::NOT_FOUND
            }

            Self::AlreadyInvited | Self::AlreadyMember | Self::RoleConflict | Self::RunConflict => {
                StatusCode::CONFLICT
            }

            Self::SelfInvite | Self::ValidationError => StatusCode::UNPROCESSABLE_ENTITY,

            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,

            Self::StepTimeout => StatusCode::GATEWAY_TIMEOUT,

            Self::StoreUnavailable
            | Self::JournalUnavailable
            | Self::DirectoryUnavailable
            | Self::ExternalServiceError => StatusCode::SERVICE_UNAVAILABLE,

            Self::NotificationFailed | Self::NetworkError => StatusCode::BAD_GATEWAY,

            Self::StoreCorrupted
            | Self::StepFailed
            | Self::SerializationError
            | Self::DeserializationError
            | Self::ConfigurationError
            | Self::InvalidConfiguration
            | Self::InvalidModel
            | Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this error is transient and worth retrying.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable
                | Self::JournalUnavailable
                | Self::StepTimeout
                | Self::DirectoryUnavailable
                | Self::NotificationFailed
                | Self::ExternalServiceError
                | Self::NetworkError
        )
    }

    /// Check if this error is an expected business outcome rather than an
    /// infrastructure failure. Business failures are terminal and carry a
    /// reason meant for the end user.
    pub const fn is_business(&self) -> bool {
        matches!(
            self,
            Self::AlreadyInvited
                | Self::AlreadyMember
                | Self::NoPendingInvite
                | Self::RoleConflict
                | Self::IdentityNotFound
                | Self::SelfInvite
                | Self::RunConflict
                | Self::ValidationError
        )
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "store",
            1100..=1199 => "role_assignment",
            1200..=1299 => "saga",
            2200..=2299 => "serialization",
            3000..=3099 => "external_service",
            4000..=4099 => "authorization",
            4100..=4199 => "validation",
            5000..=5099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Expected business outcomes and bad input
    Low,
    /// Transient operational issues
    Medium,
    /// System errors
    High,
    /// Startup-blocking or data-integrity errors
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        if code.is_business() {
            return Self::Low;
        }
        match code {
            ErrorCode::StepTimeout
            | ErrorCode::DirectoryUnavailable
            | ErrorCode::NotificationFailed
            | ErrorCode::ExternalServiceError
            | ErrorCode::NetworkError
            | ErrorCode::Unauthorized
            | ErrorCode::Forbidden => Self::Medium,

            ErrorCode::StoreCorrupted
            | ErrorCode::ConfigurationError
            | ErrorCode::InvalidConfiguration
            | ErrorCode::InvalidModel => Self::Critical,

            _ => Self::High,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Details
// ═══════════════════════════════════════════════════════════════════════════════

/// Additional structured details about an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Additional context key-value pairs
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    /// Related entity ID (run id, subject, domain...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,

    /// Related entity type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
}

impl ErrorDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    fn is_empty(&self) -> bool {
        self.context.is_empty() && self.entity_id.is_none()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for Warden.
#[derive(Error, Debug)]
pub struct WardenError {
    /// Machine-readable error code
    code: ErrorCode,

    /// User-friendly error message (safe to expose to clients)
    user_message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// Additional structured details
    details: ErrorDetails,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for WardenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl WardenError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and user message.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            details: ErrorDetails::default(),
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both user and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, user_message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error (500).
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::InternalError, "An internal error occurred", message)
    }

    /// The backing policy store could not be reached or refused the write.
    pub fn store_unavailable(message: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::StoreUnavailable,
            "The policy store is unavailable",
            message,
        )
    }

    /// A persisted row could not be interpreted.
    pub fn store_corrupted(message: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::StoreCorrupted,
            "The policy store contains an invalid record",
            message,
        )
    }

    /// The saga journal could not be reached.
    pub fn journal_unavailable(message: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::JournalUnavailable,
            "The workflow journal is unavailable",
            message,
        )
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::InvalidConfiguration,
            "Configuration is invalid",
            message,
        )
    }

    /// Create a policy model error.
    pub fn invalid_model(message: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::InvalidModel, "Policy model is invalid", message)
    }

    /// The subject already holds a pending invite in the domain.
    pub fn already_invited(subject: &str, domain: &str) -> Self {
        Self::new(ErrorCode::AlreadyInvited, "User already invited")
            .with_details(subject_details(subject, domain))
    }

    /// The subject already holds a role in the domain.
    pub fn already_member(subject: &str, domain: &str) -> Self {
        Self::new(ErrorCode::AlreadyMember, "User already exists in this organization")
            .with_details(subject_details(subject, domain))
    }

    /// No pending invite exists for the subject in the domain.
    pub fn no_pending_invite(subject: &str, domain: &str) -> Self {
        Self::new(ErrorCode::NoPendingInvite, "No pending invite for this organization")
            .with_details(subject_details(subject, domain))
    }

    /// A conditional role replacement observed a different role set.
    pub fn role_conflict(subject: &str, domain: &str, current: &[String]) -> Self {
        Self::new(
            ErrorCode::RoleConflict,
            "The user's roles changed concurrently; reload and retry",
        )
        .with_details(subject_details(subject, domain).with_context("current_roles", current))
    }

    /// No identity matches the invited email.
    pub fn identity_not_found(email: &str) -> Self {
        Self::new(ErrorCode::IdentityNotFound, "User with this email not found")
            .with_details(ErrorDetails::new().with_entity("email", email))
    }

    /// The inviter tried to invite themselves.
    pub fn self_invite() -> Self {
        Self::new(ErrorCode::SelfInvite, "You cannot invite yourself")
    }

    /// A run id was reused with a different input.
    pub fn run_conflict(run_id: &str) -> Self {
        Self::new(
            ErrorCode::RunConflict,
            "This run id was already used for a different invite",
        )
        .with_details(ErrorDetails::new().with_entity("run", run_id))
    }

    /// No run is recorded under the id.
    pub fn run_not_found(run_id: &str) -> Self {
        Self::new(ErrorCode::RunNotFound, "Invite run not found")
            .with_details(ErrorDetails::new().with_entity("run", run_id))
    }

    /// Create an unauthorized error.
    pub fn unauthorized(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    /// Create a forbidden error.
    pub fn forbidden(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Add error details.
    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = details;
        self
    }

    /// Add context to details.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.context.insert(key.into(), v);
        }
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    pub fn http_status(&self) -> StatusCode {
        self.code.http_status()
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    pub fn is_business(&self) -> bool {
        self.code.is_business()
    }

    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();

        match self.severity() {
            ErrorSeverity::Critical | ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    source = ?self.source,
                    "Warden error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    "Transient failure"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    "Request rejected"
                );
            }
        }
    }

    fn record_metrics(&self) {
        counter!(
            "warden_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
            "retryable" => self.is_retryable().to_string(),
        )
        .increment(1);
    }
}

fn subject_details(subject: &str, domain: &str) -> ErrorDetails {
    ErrorDetails::new()
        .with_entity("subject", subject)
        .with_context("domain", domain)
}

// ═══════════════════════════════════════════════════════════════════════════════
// API Response
// ═══════════════════════════════════════════════════════════════════════════════

/// Error body returned to HTTP clients.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorInfo,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub numeric_code: u32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ErrorDetails>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl From<&WardenError> for ErrorResponse {
    fn from(error: &WardenError) -> Self {
        Self {
            success: false,
            error: ErrorInfo {
                code: error.code,
                numeric_code: error.code.numeric_code(),
                message: error.user_message.to_string(),
                details: if error.details.is_empty() {
                    None
                } else {
                    Some(error.details.clone())
                },
                timestamp: chrono::Utc::now(),
            },
        }
    }
}

impl IntoResponse for WardenError {
    fn into_response(self) -> Response {
        self.log();
        let status = self.http_status();
        (status, Json(ErrorResponse::from(&self))).into_response()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<sqlx::Error> for WardenError {
    fn from(error: sqlx::Error) -> Self {
        let (code, user_msg) = match &error {
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::ColumnNotFound(_) => (
                ErrorCode::StoreCorrupted,
                "The policy store contains an invalid record",
            ),
            _ => (ErrorCode::StoreUnavailable, "The policy store is unavailable"),
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<sqlx::migrate::MigrateError> for WardenError {
    fn from(error: sqlx::migrate::MigrateError) -> Self {
        Self::with_internal(
            ErrorCode::ConfigurationError,
            "Failed to migrate the policy store schema",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<redis::RedisError> for WardenError {
    fn from(error: redis::RedisError) -> Self {
        let user_msg = if error.is_timeout() {
            "Workflow journal operation timed out"
        } else {
            "The workflow journal is unavailable"
        };

        Self::with_internal(ErrorCode::JournalUnavailable, user_msg, error.to_string())
            .with_source(error)
    }
}

impl From<csv_async::Error> for WardenError {
    fn from(error: csv_async::Error) -> Self {
        let (code, user_msg) = if matches!(error.kind(), csv_async::ErrorKind::Io(_)) {
            (ErrorCode::StoreUnavailable, "The policy store is unavailable")
        } else {
            (
                ErrorCode::StoreCorrupted,
                "The policy store contains an invalid record",
            )
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<serde_json::Error> for WardenError {
    fn from(error: serde_json::Error) -> Self {
        let code = if error.is_syntax() || error.is_data() || error.is_eof() {
            ErrorCode::DeserializationError
        } else {
            ErrorCode::SerializationError
        };

        Self::with_internal(code, "Failed to process JSON data", error.to_string())
            .with_source(error)
    }
}

impl From<reqwest::Error> for WardenError {
    fn from(error: reqwest::Error) -> Self {
        let (code, user_msg) = if error.is_timeout() {
            (ErrorCode::ExternalServiceError, "External service request timed out")
        } else if error.is_connect() {
            (ErrorCode::NetworkError, "Failed to connect to external service")
        } else if error.is_decode() {
            (
                ErrorCode::DeserializationError,
                "External service returned an unreadable response",
            )
        } else {
            (ErrorCode::NetworkError, "Network error occurred")
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<tokio::time::error::Elapsed> for WardenError {
    fn from(error: tokio::time::error::Elapsed) -> Self {
        Self::with_internal(ErrorCode::StepTimeout, "Operation timed out", error.to_string())
            .with_source(error)
    }
}

impl From<std::io::Error> for WardenError {
    fn from(error: std::io::Error) -> Self {
        Self::with_internal(
            ErrorCode::StoreUnavailable,
            "The policy store is unavailable",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<config::ConfigError> for WardenError {
    fn from(error: config::ConfigError) -> Self {
        let (code, user_msg) = match &error {
            config::ConfigError::PathParse(_) | config::ConfigError::FileParse { .. } => (
                ErrorCode::InvalidConfiguration,
                "Configuration file is invalid",
            ),
            _ => (ErrorCode::ConfigurationError, "Configuration error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

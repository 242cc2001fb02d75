//! The invite saga.
//!
//! Four steps, strictly ordered, each run through the durable scheduler:
//!
//! 1. `resolve_identity`: look the invitee up by email
//! 2. `check_self_invite`: refuse an inviter inviting themselves
//! 3. `grant_pending_invite`: record `(invitee, invite, domain)` if the
//!    invitee has no role there yet
//! 4. `send_notification`: tell the invitee
//!
//! There is no compensation. A run that commits step 3 and then fails
//! step 4 keeps the pending invite.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info_span, Instrument};

use crate::config::SagaConfig;
use crate::directory::IdentityDirectory;
use crate::error::{ErrorCode, Result, WardenError};
use crate::notify::{InviteNotification, Notifier};
use crate::observability::{metrics, WardenEvent};
use crate::rbac::RoleAssignmentService;
use crate::saga::{run_typed_step, DurableScheduler, StepJournal, StepRecord};

pub const STEP_RESOLVE_IDENTITY: &str = "resolve_identity";
pub const STEP_CHECK_SELF_INVITE: &str = "check_self_invite";
pub const STEP_GRANT_PENDING_INVITE: &str = "grant_pending_invite";
pub const STEP_SEND_NOTIFICATION: &str = "send_notification";

const POLL_INTERVAL: Duration = Duration::from_millis(20);

// ═══════════════════════════════════════════════════════════════════════════════
// Run data
// ═══════════════════════════════════════════════════════════════════════════════

/// Immutable input of one invite run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteInput {
    pub inviter: String,
    pub email: String,
    pub domain: String,
    pub domain_name: String,
    #[serde(default)]
    pub description: String,
}

impl InviteInput {
    pub fn validate(&self) -> Result<()> {
        if self.inviter.trim().is_empty() {
            return Err(WardenError::validation("inviter must not be empty"));
        }
        if self.domain.trim().is_empty() {
            return Err(WardenError::validation("domain must not be empty"));
        }
        if self.domain.trim() != self.domain || self.domain.chars().any(char::is_control) {
            return Err(WardenError::validation(
                "domain must not have surrounding whitespace or control characters",
            ));
        }
        if !self.email.contains('@') {
            return Err(WardenError::validation("email must be an email address"));
        }
        Ok(())
    }
}

/// Why a run failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InviteFailure {
    IdentityNotFound { email: String },
    SelfInvite,
    AlreadyInvited,
    AlreadyMember,
    /// A step ran out of attempts on transient errors, or hit an
    /// unexpected one
    Infrastructure {
        step: String,
        code: ErrorCode,
        message: String,
    },
}

impl InviteFailure {
    fn from_step_error(step: &str, email: &str, error: &WardenError) -> Self {
        match error.code() {
            ErrorCode::IdentityNotFound => InviteFailure::IdentityNotFound {
                email: email.to_string(),
            },
            ErrorCode::SelfInvite => InviteFailure::SelfInvite,
            ErrorCode::AlreadyInvited => InviteFailure::AlreadyInvited,
            ErrorCode::AlreadyMember => InviteFailure::AlreadyMember,
            code => InviteFailure::Infrastructure {
                step: step.to_string(),
                code,
                message: error.user_message().to_string(),
            },
        }
    }

    /// Business failures are final; retrying the same invite cannot help.
    pub fn is_business(&self) -> bool {
        !matches!(self, InviteFailure::Infrastructure { .. })
    }

    /// Message suitable for the inviter.
    pub fn reason(&self) -> String {
        match self {
            InviteFailure::IdentityNotFound { .. } => "User with this email not found".into(),
            InviteFailure::SelfInvite => "You cannot invite yourself".into(),
            InviteFailure::AlreadyInvited => "User already invited".into(),
            InviteFailure::AlreadyMember => "User already exists in this organization".into(),
            InviteFailure::Infrastructure { step, message, .. } => {
                format!("{step} failed: {message}")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::Failed)
    }
}

/// Stored state of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub input: InviteInput,
    pub status: RunStatus,
    #[serde(default)]
    pub failure: Option<InviteFailure>,
    /// Resolved identity of the invitee, once known
    #[serde(default)]
    pub invitee: Option<String>,
    /// Journaled steps; filled in on read, never stored in the run document
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<StepRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunRecord {
    fn new(run_id: &str, input: InviteInput) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.to_string(),
            input,
            status: RunStatus::Pending,
            failure: None,
            invitee: None,
            steps: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn result(&self) -> InviteResult {
        match (self.status, &self.failure) {
            (RunStatus::Succeeded, _) => InviteResult::Succeeded {
                invitee: self.invitee.clone().unwrap_or_default(),
            },
            (RunStatus::Failed, Some(failure)) => InviteResult::Failed(failure.clone()),
            (RunStatus::Failed, None) => InviteResult::Failed(InviteFailure::Infrastructure {
                step: "unknown".into(),
                code: ErrorCode::StepFailed,
                message: "run failed without a recorded reason".into(),
            }),
            _ => InviteResult::Pending,
        }
    }
}

/// Answer to [`InviteSaga::submit_invite`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Submission {
    Accepted { run_id: String },
    Rejected { code: ErrorCode, reason: String },
}

/// Answer to [`InviteSaga::get_invite_result`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum InviteResult {
    Pending,
    Succeeded { invitee: String },
    Failed(InviteFailure),
}

// ═══════════════════════════════════════════════════════════════════════════════
// Saga
// ═══════════════════════════════════════════════════════════════════════════════

type StepFailure = (&'static str, WardenError);

struct SagaInner {
    scheduler: Arc<dyn DurableScheduler>,
    journal: Arc<dyn StepJournal>,
    directory: Arc<dyn IdentityDirectory>,
    assignment: RoleAssignmentService,
    notifier: Arc<dyn Notifier>,
    options: SagaConfig,
    running: DashMap<String, Arc<Mutex<()>>>,
}

/// Orchestrates invite runs.
#[derive(Clone)]
pub struct InviteSaga {
    inner: Arc<SagaInner>,
}

impl InviteSaga {
    pub fn new(
        scheduler: Arc<dyn DurableScheduler>,
        journal: Arc<dyn StepJournal>,
        directory: Arc<dyn IdentityDirectory>,
        assignment: RoleAssignmentService,
        notifier: Arc<dyn Notifier>,
        options: SagaConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SagaInner {
                scheduler,
                journal,
                directory,
                assignment,
                notifier,
                options,
                running: DashMap::new(),
            }),
        }
    }

    /// A fresh run id for callers that do not bring their own.
    pub fn new_run_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Register run `run_id` and start it in the background.
    ///
    /// Resubmitting the same input under the same id is accepted and resumes
    /// a run that has not finished; a finished run is not executed again.
    pub async fn submit_invite(&self, run_id: &str, input: InviteInput) -> Result<Submission> {
        if run_id.trim().is_empty() {
            return Ok(rejected(&WardenError::validation("run id must not be empty")));
        }
        if let Err(e) = input.validate() {
            return Ok(rejected(&e));
        }

        let record = RunRecord::new(run_id, input);
        let document = serde_json::to_value(&record)?;

        match self.inner.journal.create_run(run_id, &document).await? {
            Some(existing) => {
                let existing: RunRecord = serde_json::from_value(existing)?;
                if existing.input != record.input {
                    return Ok(rejected(&WardenError::run_conflict(run_id)));
                }
                if existing.status.is_terminal() {
                    debug!(run_id, status = ?existing.status, "Run already finished");
                    return Ok(Submission::Accepted {
                        run_id: run_id.to_string(),
                    });
                }
                debug!(run_id, "Resuming unfinished run");
            }
            None => {
                WardenEvent::InviteSubmitted {
                    run_id: run_id.to_string(),
                    inviter: record.input.inviter.clone(),
                    domain: record.input.domain.clone(),
                }
                .log();
            }
        }

        let saga = self.clone();
        let id = run_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = saga.execute(&id).await {
                e.log();
            }
        });

        Ok(Submission::Accepted {
            run_id: run_id.to_string(),
        })
    }

    /// Drive run `run_id` to a terminal state.
    ///
    /// Concurrent calls for the same run inside this process are serialized;
    /// completed steps are replayed from the journal, never re-executed.
    pub async fn execute(&self, run_id: &str) -> Result<InviteResult> {
        let lock = self.run_lock(run_id);
        let result = async {
            let _guard = lock.lock().await;
            self.execute_locked(run_id).await
        }
        .instrument(info_span!("invite_run", run_id = %run_id))
        .await;
        self.release_run_lock(run_id, lock);
        result
    }

    fn run_lock(&self, run_id: &str) -> Arc<Mutex<()>> {
        self.inner
            .running
            .entry(run_id.to_string())
            .or_default()
            .clone()
    }

    /// Drop the map entry only when no other caller still holds the lock, so
    /// every caller of one run shares a single mutex.
    fn release_run_lock(&self, run_id: &str, lock: Arc<Mutex<()>>) {
        self.inner
            .running
            .remove_if(run_id, |_, held| Arc::ptr_eq(held, &lock) && Arc::strong_count(held) == 2);
    }

    async fn execute_locked(&self, run_id: &str) -> Result<InviteResult> {
        let mut record = self
            .load(run_id)
            .await?
            .ok_or_else(|| WardenError::run_not_found(run_id))?;
        if record.status.is_terminal() {
            return Ok(record.result());
        }

        record.status = RunStatus::Running;
        self.store(&mut record).await?;

        match self.run_steps(run_id, &record.input).await {
            Ok(invitee) => {
                record.status = RunStatus::Succeeded;
                record.invitee = Some(invitee.clone());
                metrics::record_saga_run("succeeded");
                WardenEvent::InviteSucceeded {
                    run_id: run_id.to_string(),
                    invitee,
                    domain: record.input.domain.clone(),
                }
                .log();
            }
            Err((step, error)) => {
                // A journal outage leaves the run resumable instead of failed.
                if error.code() == ErrorCode::JournalUnavailable {
                    return Err(error);
                }
                let failure = InviteFailure::from_step_error(step, &record.input.email, &error);
                let business = failure.is_business();
                metrics::record_saga_run(if business { "rejected" } else { "failed" });
                WardenEvent::InviteFailed {
                    run_id: run_id.to_string(),
                    reason: failure.reason(),
                    business,
                }
                .log();
                record.status = RunStatus::Failed;
                record.failure = Some(failure);
            }
        }

        self.store(&mut record).await?;
        Ok(record.result())
    }

    async fn run_steps(
        &self,
        run_id: &str,
        input: &InviteInput,
    ) -> std::result::Result<String, StepFailure> {
        let scheduler = self.inner.scheduler.as_ref();
        let options = &self.inner.options;

        let directory = self.inner.directory.clone();
        let email = input.email.clone();
        let invitee: String = run_typed_step(
            scheduler,
            run_id,
            STEP_RESOLVE_IDENTITY,
            &options.resolve_identity,
            move |_| {
                let directory = directory.clone();
                let email = email.clone();
                async move {
                    directory
                        .find_by_email(&email)
                        .await?
                        .map(|identity| identity.id)
                        .ok_or_else(|| WardenError::identity_not_found(&email))
                }
            },
        )
        .await
        .map_err(|e| (STEP_RESOLVE_IDENTITY, e))?;

        let inviter = input.inviter.clone();
        let candidate = invitee.clone();
        run_typed_step::<(), _, _>(
            scheduler,
            run_id,
            STEP_CHECK_SELF_INVITE,
            &options.check_self_invite,
            move |_| {
                let same = inviter == candidate;
                async move {
                    if same {
                        Err(WardenError::self_invite())
                    } else {
                        Ok(())
                    }
                }
            },
        )
        .await
        .map_err(|e| (STEP_CHECK_SELF_INVITE, e))?;

        let assignment = self.inner.assignment.clone();
        let subject = invitee.clone();
        let domain = input.domain.clone();
        run_typed_step::<(), _, _>(
            scheduler,
            run_id,
            STEP_GRANT_PENDING_INVITE,
            &options.grant_pending_invite,
            move |_| {
                let assignment = assignment.clone();
                let subject = subject.clone();
                let domain = domain.clone();
                async move {
                    // Pick up writes made by other processes before the check.
                    assignment.store().refresh().await?;
                    assignment.grant_pending_invite(&subject, &domain).await
                }
            },
        )
        .await
        .map_err(|e| (STEP_GRANT_PENDING_INVITE, e))?;

        let notifier = self.inner.notifier.clone();
        let notification = InviteNotification {
            email: input.email.clone(),
            domain: input.domain.clone(),
            domain_name: input.domain_name.clone(),
            description: input.description.clone(),
            accepted: false,
        };
        run_typed_step::<(), _, _>(
            scheduler,
            run_id,
            STEP_SEND_NOTIFICATION,
            &options.send_notification,
            move |_| {
                let notifier = notifier.clone();
                let notification = notification.clone();
                async move { notifier.send_invite_notification(&notification).await }
            },
        )
        .await
        .map_err(|e| (STEP_SEND_NOTIFICATION, e))?;

        Ok(invitee)
    }

    async fn load(&self, run_id: &str) -> Result<Option<RunRecord>> {
        self.inner
            .journal
            .get_run(run_id)
            .await?
            .map(|doc| serde_json::from_value(doc).map_err(WardenError::from))
            .transpose()
    }

    async fn store(&self, record: &mut RunRecord) -> Result<()> {
        record.updated_at = Utc::now();
        let document = serde_json::to_value(&*record)?;
        self.inner.journal.put_run(&record.run_id, &document).await
    }

    /// The run record with its journaled steps, if the run exists.
    pub async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>> {
        let Some(mut record) = self.load(run_id).await? else {
            return Ok(None);
        };
        record.steps = self.inner.journal.steps(run_id).await?;
        Ok(Some(record))
    }

    /// Current result of run `run_id`.
    pub async fn get_invite_result(&self, run_id: &str) -> Result<InviteResult> {
        self.load(run_id)
            .await?
            .map(|record| record.result())
            .ok_or_else(|| WardenError::run_not_found(run_id))
    }

    /// Poll until the run is terminal or `timeout` elapses.
    /// Returns [`InviteResult::Pending`] on timeout.
    pub async fn wait_for(&self, run_id: &str, timeout: Duration) -> Result<InviteResult> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let result = self.get_invite_result(run_id).await?;
            if result != InviteResult::Pending || tokio::time::Instant::now() >= deadline {
                return Ok(result);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

fn rejected(error: &WardenError) -> Submission {
    Submission::Rejected {
        code: error.code(),
        reason: error.user_message().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> InviteInput {
        InviteInput {
            inviter: "u1".into(),
            email: "a@b.com".into(),
            domain: "org42".into(),
            domain_name: "Acme".into(),
            description: String::new(),
        }
    }

    async fn saga() -> InviteSaga {
        use crate::directory::StaticIdentityDirectory;
        use crate::notify::NoopNotifier;
        use crate::rbac::{MemoryAdapter, PolicyStore};
        use crate::saga::{InMemoryJournal, JournaledScheduler};

        let store = PolicyStore::open(Arc::new(MemoryAdapter::new())).await.unwrap();
        let journal: Arc<dyn StepJournal> = Arc::new(InMemoryJournal::new());
        InviteSaga::new(
            Arc::new(JournaledScheduler::new(journal.clone())),
            journal,
            Arc::new(StaticIdentityDirectory::new(Vec::new())),
            RoleAssignmentService::new(store, "reader"),
            Arc::new(NoopNotifier),
            SagaConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_run_lock_shared_until_last_holder_releases() {
        let saga = saga().await;

        let first = saga.run_lock("r1");
        let second = saga.run_lock("r1");
        assert!(Arc::ptr_eq(&first, &second));

        saga.release_run_lock("r1", first);
        let third = saga.run_lock("r1");
        assert!(Arc::ptr_eq(&second, &third));

        saga.release_run_lock("r1", second);
        saga.release_run_lock("r1", third);
        assert!(saga.inner.running.is_empty());
    }

    #[test]
    fn test_input_validation() {
        assert!(input().validate().is_ok());

        let mut bad = input();
        bad.email = "not-an-email".into();
        assert_eq!(bad.validate().unwrap_err().code(), ErrorCode::ValidationError);

        let mut bad = input();
        bad.inviter = " ".into();
        assert!(bad.validate().is_err());

        let mut bad = input();
        bad.domain = "org42 ".into();
        assert!(bad.validate().is_err());

        let mut spaced = input();
        spaced.domain = "org,42".into();
        assert!(spaced.validate().is_ok());
    }

    #[test]
    fn test_failure_classification() {
        let f = InviteFailure::from_step_error(
            STEP_GRANT_PENDING_INVITE,
            "a@b.com",
            &WardenError::already_invited("u2", "org42"),
        );
        assert_eq!(f, InviteFailure::AlreadyInvited);
        assert!(f.is_business());
        assert_eq!(f.reason(), "User already invited");

        let f = InviteFailure::from_step_error(
            STEP_SEND_NOTIFICATION,
            "a@b.com",
            &WardenError::new(ErrorCode::NotificationFailed, "down"),
        );
        assert!(!f.is_business());
        assert!(f.reason().starts_with("send_notification"));
    }

    #[test]
    fn test_run_record_result() {
        let mut record = RunRecord::new("r1", input());
        assert_eq!(record.result(), InviteResult::Pending);

        record.status = RunStatus::Succeeded;
        record.invitee = Some("u2".into());
        assert_eq!(
            record.result(),
            InviteResult::Succeeded {
                invitee: "u2".into()
            }
        );

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "succeeded");
        assert!(json.get("steps").is_none());
    }
}

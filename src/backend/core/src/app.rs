//! Startup wiring.
//!
//! Everything is constructed once here and handed out by handle; nothing
//! in the crate is a process-wide singleton.

use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{Config, JournalBackend, StoreBackend};
use crate::directory::{HttpIdentityDirectory, IdentityDirectory};
use crate::error::{Result, WardenError};
use crate::invite::{InviteAcceptance, InviteSaga};
use crate::members::{InMemoryMemberRegistry, MemberRegistry};
use crate::notify::{HttpNotifier, NoopNotifier, Notifier};
use crate::rbac::{
    Enforcer, FileAdapter, MemoryAdapter, PolicyAdapter, PolicyModel, PolicyStore,
    PostgresAdapter, RoleAssignmentService,
};
use crate::saga::{InMemoryJournal, JournaledScheduler, RedisJournal, StepJournal};

/// External pieces a [`Warden`] is built from.
pub struct Collaborators {
    pub adapter: Arc<dyn PolicyAdapter>,
    pub journal: Arc<dyn StepJournal>,
    pub directory: Arc<dyn IdentityDirectory>,
    pub notifier: Arc<dyn Notifier>,
    pub members: Arc<dyn MemberRegistry>,
}

impl Collaborators {
    /// Connect everything the configuration names.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let adapter: Arc<dyn PolicyAdapter> = match config.store.backend {
            StoreBackend::Memory => Arc::new(MemoryAdapter::new()),
            StoreBackend::File => Arc::new(FileAdapter::new(&config.store.path)),
            StoreBackend::Postgres => {
                let url = config.store.url.as_deref().ok_or_else(|| {
                    WardenError::configuration("store.url is required for the postgres backend")
                })?;
                Arc::new(PostgresAdapter::connect(url, config.store.max_connections).await?)
            }
        };

        let journal: Arc<dyn StepJournal> = match config.journal.backend {
            JournalBackend::Memory => Arc::new(InMemoryJournal::new()),
            JournalBackend::Redis => {
                let url = config.journal.url.as_deref().ok_or_else(|| {
                    WardenError::configuration("journal.url is required for the redis backend")
                })?;
                Arc::new(RedisJournal::connect(url, config.journal.key_prefix.clone()).await?)
            }
        };

        let directory = Arc::new(HttpIdentityDirectory::new(
            config.directory.base_url.clone(),
            config.directory.timeout,
        )?);

        let notifications = &config.notifications;
        let notifier: Arc<dyn Notifier> = match &notifications.endpoint {
            Some(endpoint) => Arc::new(HttpNotifier::new(
                endpoint.clone(),
                notifications.api_key.clone().unwrap_or_default(),
                notifications.workflow.clone(),
                notifications.timeout,
            )?),
            None => {
                warn!("notifications.endpoint is not set; invite notifications are disabled");
                Arc::new(NoopNotifier)
            }
        };

        Ok(Self {
            adapter,
            journal,
            directory,
            notifier,
            members: Arc::new(InMemoryMemberRegistry::new()),
        })
    }
}

/// A fully wired instance.
#[derive(Clone)]
pub struct Warden {
    pub store: PolicyStore,
    pub assignment: RoleAssignmentService,
    pub enforcer: Arc<Enforcer>,
    pub saga: InviteSaga,
    pub acceptance: InviteAcceptance,
    pub journal: Arc<dyn StepJournal>,
    pub members: Arc<dyn MemberRegistry>,
}

impl Warden {
    /// Build from configuration. Fails if the model is invalid or a backend
    /// cannot be reached.
    pub async fn build(config: &Config) -> Result<Self> {
        config.validate()?;
        let collaborators = Collaborators::from_config(config).await?;
        Self::with_collaborators(config, collaborators).await
    }

    /// Build around caller-supplied collaborators.
    pub async fn with_collaborators(config: &Config, c: Collaborators) -> Result<Self> {
        let model = match &config.model.path {
            Some(path) => PolicyModel::from_file(path)?,
            None => PolicyModel::default_model(),
        };

        let store = PolicyStore::open(c.adapter).await?;
        let assignment =
            RoleAssignmentService::new(store.clone(), config.enforcement.default_role.clone());
        let enforcer = Arc::new(Enforcer::new(
            store.clone(),
            model,
            assignment.clone(),
            config.enforcement.provisioning,
        ));

        let scheduler = Arc::new(JournaledScheduler::new(c.journal.clone()));
        let saga = InviteSaga::new(
            scheduler,
            c.journal.clone(),
            c.directory,
            assignment.clone(),
            c.notifier.clone(),
            config.saga.clone(),
        );
        let acceptance = InviteAcceptance::new(assignment.clone(), c.members.clone(), c.notifier);

        info!(
            store = store.backend(),
            provisioning = ?config.enforcement.provisioning,
            "Warden ready"
        );

        Ok(Self {
            store,
            assignment,
            enforcer,
            saga,
            acceptance,
            journal: c.journal,
            members: c.members,
        })
    }
}

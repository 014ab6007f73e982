//! Tenant-scoped context: created at login, torn down at logout.

use crate::conflict::ConflictRecord;
use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::feed::ChangeEvent;
use crate::orchestrator::SyncOrchestrator;
use crate::repository::Repository;
use crate::state::KeyReport;
use crate::worker::SyncWorker;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use tallysync_core::{Entity, SchemaRegistry, TenantId};
use tallysync_storage::{Authenticator, RemoteBackend, StorageBackend};
use tracing::{info, warn};

/// Owns everything that lives for one tenant session: the orchestrator,
/// its background worker, and the schema registry repositories use.
///
/// # Example
///
/// ```rust,ignore
/// let context = TenantContext::builder(TenantId::new("alice")?, registry)
///     .with_authenticator(auth)
///     .open(local, remote)?;
/// let accounts = context.repository::<Account>()?;
/// accounts.put(&account)?;
/// context.shutdown().await;
/// ```
pub struct TenantContext {
    orchestrator: Arc<SyncOrchestrator>,
    worker: Option<SyncWorker>,
}

impl TenantContext {
    /// Starts building a context for `tenant`.
    pub fn builder(tenant: TenantId, registry: SchemaRegistry) -> TenantContextBuilder {
        TenantContextBuilder {
            tenant,
            registry,
            config: SyncConfig::default(),
            auth: None,
            background: true,
        }
    }

    /// The tenant of this context.
    pub fn tenant(&self) -> &TenantId {
        self.orchestrator.tenant()
    }

    /// The orchestrator of this context.
    pub fn orchestrator(&self) -> &Arc<SyncOrchestrator> {
        &self.orchestrator
    }

    /// Returns a repository for entity type `T`.
    pub fn repository<T: Entity>(&self) -> SyncResult<Repository<T>> {
        Repository::new(Arc::clone(&self.orchestrator))
    }

    /// Returns true while the background worker runs.
    pub fn has_worker(&self) -> bool {
        self.worker.as_ref().is_some_and(SyncWorker::is_running)
    }

    /// Logs in to the remote and re-queues every key.
    pub async fn login(&self) -> SyncResult<()> {
        self.orchestrator.login().await
    }

    /// Runs one reconciliation round for every known key.
    pub async fn sync_all(&self) -> SyncResult<Vec<KeyReport>> {
        self.orchestrator.sync_all().await
    }

    /// Subscribes to every applied change of this tenant.
    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        self.orchestrator.subscribe()
    }

    /// Conflict records of this tenant.
    pub fn conflicts(&self) -> Vec<ConflictRecord> {
        self.orchestrator.conflicts()
    }

    /// Stops the worker. Local data stays on the local backend; observers
    /// see [`SyncError::Shutdown`](crate::SyncError::Shutdown) once the
    /// last handle to the orchestrator is gone.
    pub async fn shutdown(mut self) {
        if let Some(worker) = self.worker.take() {
            worker.shutdown().await;
        }
        info!(tenant = %self.orchestrator.tenant().namespace(), "tenant context shut down");
    }
}

impl std::fmt::Debug for TenantContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantContext")
            .field("orchestrator", &self.orchestrator)
            .field("worker", &self.worker.is_some())
            .finish()
    }
}

/// Builder for [`TenantContext`].
pub struct TenantContextBuilder {
    tenant: TenantId,
    registry: SchemaRegistry,
    config: SyncConfig,
    auth: Option<Arc<dyn Authenticator>>,
    background: bool,
}

impl TenantContextBuilder {
    /// Sets the sync configuration.
    #[must_use]
    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the remote login collaborator.
    #[must_use]
    pub fn with_authenticator(mut self, auth: Arc<dyn Authenticator>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Enables or disables the background worker. Without it, keys are
    /// reconciled only through `flush` and `sync_all`.
    #[must_use]
    pub fn with_background_sync(mut self, enabled: bool) -> Self {
        self.background = enabled;
        self
    }

    /// Opens the context over the two backends.
    ///
    /// Every registered key is loaded and checked against local metadata;
    /// with a worker running, each is queued for reconciliation.
    pub fn open(
        self,
        local: Arc<dyn StorageBackend>,
        remote: Arc<dyn RemoteBackend>,
    ) -> SyncResult<TenantContext> {
        let mut orchestrator =
            SyncOrchestrator::open(self.tenant, self.config, Arc::new(self.registry), local, remote)?;
        if let Some(auth) = self.auth {
            orchestrator = orchestrator.with_authenticator(auth);
        }
        let orchestrator = Arc::new(orchestrator);

        let worker = if !self.background {
            None
        } else if tokio::runtime::Handle::try_current().is_ok() {
            Some(SyncWorker::spawn(Arc::clone(&orchestrator)))
        } else {
            warn!(
                tenant = %orchestrator.tenant().namespace(),
                "no tokio runtime; background sync disabled"
            );
            None
        };

        let corrupt = orchestrator.verify_local()?;
        if !corrupt.is_empty() {
            warn!(
                tenant = %orchestrator.tenant().namespace(),
                keys = ?corrupt,
                "local corruption found at startup; keys will be refetched"
            );
        }
        info!(
            tenant = %orchestrator.tenant().namespace(),
            background = worker.is_some(),
            "tenant context opened"
        );

        Ok(TenantContext { orchestrator, worker })
    }
}

//! Typed, tenant-scoped facade over one entity name.

use crate::error::{SyncError, SyncResult};
use crate::feed::ObservedValue;
use crate::orchestrator::SyncOrchestrator;
use crate::state::{KeyReport, KeySyncState};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tallysync_core::codec::to_cbor;
use tallysync_core::{decode_entity, Entity, EntityCounts, EntityKey};
use tokio::sync::watch;

/// Read/write access to the entities of type `T` of one tenant.
///
/// Reads and writes hit the local cache only. Every effective write bumps
/// the key's metadata and schedules a reconciliation without waiting for it.
pub struct Repository<T: Entity> {
    orchestrator: Arc<SyncOrchestrator>,
    key: EntityKey,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> Repository<T> {
    /// Creates a repository for `T`, which must be registered.
    pub fn new(orchestrator: Arc<SyncOrchestrator>) -> SyncResult<Self> {
        let key = orchestrator.registry().key_for(T::NAME)?.clone();
        Ok(Self {
            orchestrator,
            key,
            _entity: PhantomData,
        })
    }

    /// Entity key holding `T`.
    pub fn key(&self) -> &EntityKey {
        &self.key
    }

    /// Gets one live entity.
    pub fn get(&self, id: &str) -> SyncResult<Option<T>> {
        self.orchestrator
            .get_raw(T::NAME, id)?
            .map(|raw| decode_entity::<T>(id, &raw))
            .transpose()
            .map_err(SyncError::from)
    }

    /// All live entities, ordered by id.
    pub fn list(&self) -> SyncResult<Vec<T>> {
        let data = self.orchestrator.snapshot(&self.key)?;
        data.live(T::NAME)
            .map(|(id, raw)| decode_entity::<T>(id, raw).map_err(SyncError::from))
            .collect()
    }

    /// Ids of all live entities, ordered.
    pub fn ids(&self) -> SyncResult<Vec<String>> {
        let data = self.orchestrator.snapshot(&self.key)?;
        Ok(data.live(T::NAME).map(|(id, _)| id.to_string()).collect())
    }

    /// Inserts or replaces an entity.
    ///
    /// Returns false if the stored value was already identical.
    pub fn put(&self, entity: &T) -> SyncResult<bool> {
        let body = to_cbor(entity)?;
        self.orchestrator.put_raw(T::NAME, entity.id(), body)
    }

    /// Deletes an entity, leaving a tombstone.
    ///
    /// Returns false if the entity did not exist.
    pub fn delete(&self, id: &str) -> SyncResult<bool> {
        self.orchestrator.delete_raw(T::NAME, id)
    }

    /// Watches one entity. Works before the entity exists.
    pub fn observe(&self, id: &str) -> SyncResult<Observer<T>> {
        let receiver = self.orchestrator.observe_raw(T::NAME, id)?;
        Ok(Observer {
            id: id.to_string(),
            receiver,
            _entity: PhantomData,
        })
    }

    /// Reconciles the key now and waits until it is synced.
    pub async fn flush(&self) -> SyncResult<KeyReport> {
        self.orchestrator.flush(&self.key).await
    }

    /// Sync state of the key.
    pub fn key_state(&self) -> KeySyncState {
        self.orchestrator.key_state(&self.key)
    }

    /// Live and tombstoned counts of `T`, as last recorded.
    pub fn summary(&self) -> EntityCounts {
        self.orchestrator
            .summary(&self.key)
            .and_then(|entry| entry.entities.get(T::NAME).copied())
            .unwrap_or_default()
    }
}

impl<T: Entity> Clone for Repository<T> {
    fn clone(&self) -> Self {
        Self {
            orchestrator: Arc::clone(&self.orchestrator),
            key: self.key.clone(),
            _entity: PhantomData,
        }
    }
}

impl<T: Entity> fmt::Debug for Repository<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("entity", &T::NAME)
            .field("key", &self.key)
            .finish()
    }
}

/// Live view of one entity.
///
/// Updates may repeat an identical value; consumers should refresh
/// idempotently. Dropping the observer unsubscribes it.
pub struct Observer<T: Entity> {
    id: String,
    receiver: watch::Receiver<ObservedValue>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> Observer<T> {
    /// Id of the observed entity.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Latest known value. `None` if absent or deleted.
    pub fn current(&self) -> SyncResult<Option<T>> {
        let value = self.receiver.borrow();
        decode::<T>(&self.id, value.as_deref())
    }

    /// Returns true if a value arrived since the last `changed`.
    pub fn has_changed(&self) -> bool {
        self.receiver.has_changed().unwrap_or(false)
    }

    /// Waits for the next value.
    ///
    /// Fails with [`SyncError::Shutdown`] once the tenant is torn down.
    pub async fn changed(&mut self) -> SyncResult<Option<T>> {
        self.receiver.changed().await.map_err(|_| SyncError::Shutdown)?;
        let value = self.receiver.borrow_and_update();
        decode::<T>(&self.id, value.as_deref())
    }
}

impl<T: Entity> fmt::Debug for Observer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("entity", &T::NAME)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

fn decode<T: Entity>(id: &str, raw: Option<&[u8]>) -> SyncResult<Option<T>> {
    raw.map(|raw| decode_entity::<T>(id, raw))
        .transpose()
        .map_err(SyncError::from)
}

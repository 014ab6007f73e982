//! Per-tenant sync orchestrator.
//!
//! Owns the in-memory cache of every loaded entity key, serializes local
//! mutations per key, and reconciles each key with the remote backend by
//! comparing metadata first and moving payloads only when they differ.
//!
//! Lock order: `slots` → key state → `metadata`. Remote calls never run
//! while a `parking_lot` guard is held.

use crate::config::SyncConfig;
use crate::conflict::{ConflictRecord, CONFLICTS_KEY};
use crate::error::{SyncError, SyncResult};
use crate::feed::{diff_events, ChangeEvent, ChangeFeed, ChangeOrigin, ObservedValue, ObserverRegistry};
use crate::state::{KeyReport, KeySyncState, SyncOutcome, SyncStats};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Instant;
use tallysync_core::{
    compare, verify_integrity, Checkpoint, CoreError, EntityKey, EntityKeyData, EntityKeyMetadata,
    Metadata, SchemaRegistry, Side, SyncDirection, TenantId, Timestamp, METADATA_KEY,
};
use tallysync_storage::{Authenticator, RemoteBackend, StorageBackend};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Cached state of one entity key.
struct KeyState {
    data: Arc<EntityKeyData>,
    /// Bumped by every local mutation; a reconciliation that captured an
    /// older value must not apply its result.
    generation: u64,
    state: KeySyncState,
    /// Local payload does not match local metadata.
    corrupt: bool,
    /// Consecutive rounds that found the remote unreachable.
    attempts: u32,
    last_checked: Option<Instant>,
}

struct KeySlot {
    state: Mutex<KeyState>,
    /// One reconciliation per key at a time.
    reconcile: tokio::sync::Mutex<()>,
}

impl KeySlot {
    fn new(data: EntityKeyData, corrupt: bool) -> Self {
        Self {
            state: Mutex::new(KeyState {
                data: Arc::new(data),
                generation: 0,
                state: KeySyncState::Unsynced,
                corrupt,
                attempts: 0,
                last_checked: None,
            }),
            reconcile: tokio::sync::Mutex::new(()),
        }
    }
}

/// Coordinates the local and remote backends of one tenant.
pub struct SyncOrchestrator {
    tenant: TenantId,
    config: SyncConfig,
    registry: Arc<SchemaRegistry>,
    local: Arc<dyn StorageBackend>,
    remote: Arc<dyn RemoteBackend>,
    auth: Option<Arc<dyn Authenticator>>,
    slots: RwLock<BTreeMap<EntityKey, Arc<KeySlot>>>,
    metadata: Mutex<Metadata>,
    /// Serializes read-modify-write of the remote metadata record.
    remote_metadata: tokio::sync::Mutex<()>,
    conflicts: Mutex<Vec<ConflictRecord>>,
    feed: ChangeFeed,
    observers: ObserverRegistry,
    stats: RwLock<SyncStats>,
    scheduler: Mutex<Option<mpsc::UnboundedSender<EntityKey>>>,
    pending: Mutex<HashSet<EntityKey>>,
}

impl SyncOrchestrator {
    /// Opens the orchestrator of one tenant over its two backends.
    ///
    /// Unreadable local metadata is discarded: every key then fails its
    /// integrity check on load and is rebuilt from the remote.
    pub fn open(
        tenant: TenantId,
        config: SyncConfig,
        registry: Arc<SchemaRegistry>,
        local: Arc<dyn StorageBackend>,
        remote: Arc<dyn RemoteBackend>,
    ) -> SyncResult<Self> {
        let namespace = tenant.namespace();
        let metadata = match local.load(namespace, METADATA_KEY)? {
            None => Metadata::new(&tenant),
            Some(bytes) => Metadata::decode(&bytes).unwrap_or_else(|err| {
                warn!(tenant = %namespace, error = %err, "local metadata unreadable; rebuilding");
                Metadata::new(&tenant)
            }),
        };
        let conflicts = match local.load(namespace, CONFLICTS_KEY)? {
            None => Vec::new(),
            Some(bytes) => ConflictRecord::decode_log(&bytes).unwrap_or_else(|err| {
                warn!(tenant = %namespace, error = %err, "conflict log unreadable; starting a new one");
                Vec::new()
            }),
        };
        debug!(
            tenant = %namespace,
            keys = metadata.keys.len(),
            remote = remote.name(),
            "opened orchestrator"
        );

        Ok(Self {
            tenant,
            config,
            registry,
            local,
            remote,
            auth: None,
            slots: RwLock::new(BTreeMap::new()),
            metadata: Mutex::new(metadata),
            remote_metadata: tokio::sync::Mutex::new(()),
            conflicts: Mutex::new(conflicts),
            feed: ChangeFeed::new(),
            observers: ObserverRegistry::new(),
            stats: RwLock::new(SyncStats::default()),
            scheduler: Mutex::new(None),
            pending: Mutex::new(HashSet::new()),
        })
    }

    /// Attaches the collaborator that logs in to the remote.
    #[must_use]
    pub fn with_authenticator(mut self, auth: Arc<dyn Authenticator>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Returns the tenant.
    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the schema registry.
    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Subscribes to every change applied to this tenant's cache.
    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        self.feed.subscribe()
    }

    /// Conflict records, oldest first.
    pub fn conflicts(&self) -> Vec<ConflictRecord> {
        self.conflicts.lock().clone()
    }

    /// Drops all conflict records.
    pub fn clear_conflicts(&self) -> SyncResult<()> {
        let mut conflicts = self.conflicts.lock();
        self.local.clear(self.tenant.namespace(), CONFLICTS_KEY)?;
        conflicts.clear();
        Ok(())
    }

    /// Sync state of a key. Keys never loaded are `Unsynced`.
    pub fn key_state(&self, key: &EntityKey) -> KeySyncState {
        self.slots
            .read()
            .get(key)
            .map(|slot| slot.state.lock().state)
            .unwrap_or_default()
    }

    /// Local metadata entry of a key.
    pub fn summary(&self, key: &EntityKey) -> Option<EntityKeyMetadata> {
        self.metadata.lock().entry(key.as_str()).cloned()
    }

    /// Last reconciliation checkpoint of a key.
    pub fn checkpoint(&self, key: &EntityKey) -> Option<Checkpoint> {
        self.metadata.lock().checkpoint(key.as_str()).copied()
    }

    /// Every key the orchestrator knows about: registered or loaded.
    pub fn known_keys(&self) -> Vec<EntityKey> {
        let mut keys: BTreeSet<EntityKey> = self.registry.keys().into_iter().collect();
        keys.extend(self.slots.read().keys().cloned());
        keys.into_iter().collect()
    }

    /// Loads every registered key and returns those whose local copy failed
    /// its integrity check. They are refetched on their next reconciliation.
    pub fn verify_local(&self) -> SyncResult<Vec<EntityKey>> {
        let mut corrupt = Vec::new();
        for key in self.registry.keys() {
            let slot = self.slot(&key)?;
            if slot.state.lock().corrupt {
                corrupt.push(key);
            }
        }
        Ok(corrupt)
    }

    // --- local path ---------------------------------------------------------

    /// Returns a consistent snapshot of a key's payload.
    ///
    /// Schedules a reconciliation if the key is unsynced or stale.
    pub fn snapshot(&self, key: &EntityKey) -> SyncResult<Arc<EntityKeyData>> {
        let slot = self.slot(key)?;
        let (data, stale) = {
            let state = slot.state.lock();
            (Arc::clone(&state.data), self.is_stale(&state))
        };
        if stale {
            self.schedule(key);
        }
        Ok(data)
    }

    /// Returns the raw body of one live entity.
    pub fn get_raw(&self, entity: &str, id: &str) -> SyncResult<Option<Vec<u8>>> {
        let key = self.registry.key_for(entity)?.clone();
        let data = self.snapshot(&key)?;
        Ok(data.body(entity, id).map(<[u8]>::to_vec))
    }

    /// Stores one entity body after validating it.
    ///
    /// Returns false if the stored body was already identical. Ids that
    /// were deleted are refused with [`CoreError::Deleted`].
    pub fn put_raw(&self, entity: &str, id: &str, body: Vec<u8>) -> SyncResult<bool> {
        let schema = self
            .registry
            .schema(entity)
            .ok_or_else(|| CoreError::EntityNotRegistered {
                name: entity.to_string(),
            })?;
        schema.validate(id, &body)?;
        let key = schema.key().clone();

        let mut refused = None;
        let changed = self.mutate(&key, |data, _| {
            if data.body(entity, id) == Some(body.as_slice()) {
                return false;
            }
            match data.put(entity, id, body) {
                Ok(_) => true,
                Err(err) => {
                    refused = Some(err);
                    false
                }
            }
        })?;
        match refused {
            Some(err) => Err(err.into()),
            None => Ok(changed),
        }
    }

    /// Replaces one live entity with a tombstone.
    ///
    /// Returns false if the entity was not live.
    pub fn delete_raw(&self, entity: &str, id: &str) -> SyncResult<bool> {
        let key = self.registry.key_for(entity)?.clone();
        self.mutate(&key, |data, at| data.delete(entity, id, at))
    }

    /// Subscribes to the raw body of one entity.
    pub(crate) fn observe_raw(&self, entity: &str, id: &str) -> SyncResult<watch::Receiver<ObservedValue>> {
        let key = self.registry.key_for(entity)?.clone();
        let slot = self.slot(&key)?;
        let (receiver, stale) = {
            let state = slot.state.lock();
            let receiver = self.observers.observe(&key, entity, id, state.data.body(entity, id));
            (receiver, self.is_stale(&state))
        };
        if stale {
            self.schedule(&key);
        }
        Ok(receiver)
    }

    /// Drops tombstones already covered by the key's checkpoint.
    ///
    /// Returns the number of tombstones removed. Without a checkpoint
    /// nothing is known to be shared, so nothing is removed.
    pub fn compact(&self, key: &EntityKey) -> SyncResult<usize> {
        let Some(horizon) = self.checkpoint(key).map(|checkpoint| checkpoint.at) else {
            return Ok(0);
        };
        let mut removed = 0;
        self.mutate(key, |data, _| {
            removed = data.compact(horizon);
            removed > 0
        })?;
        if removed > 0 {
            info!(tenant = %self.tenant.namespace(), key = %key, removed, "compacted tombstones");
        }
        Ok(removed)
    }

    /// Applies one local mutation to a key under its lock.
    ///
    /// `apply` receives the new `updated_at` and returns whether it changed
    /// anything. Payload and metadata are persisted together; the key is
    /// then scheduled for reconciliation.
    fn mutate<F>(&self, key: &EntityKey, apply: F) -> SyncResult<bool>
    where
        F: FnOnce(&mut EntityKeyData, Timestamp) -> bool,
    {
        let slot = self.slot(key)?;
        {
            let mut state = slot.state.lock();
            let previous = self
                .metadata
                .lock()
                .entry(key.as_str())
                .map_or(Timestamp::ZERO, |entry| entry.updated_at);
            let at = Timestamp::now_after(previous);

            let mut next = EntityKeyData::clone(&state.data);
            if !apply(&mut next, at) {
                return Ok(false);
            }
            let entry = EntityKeyMetadata::describe(&next, at);
            self.commit_local(key, &mut state, next, entry, None, ChangeOrigin::Local)?;

            state.generation += 1;
            if state.state != KeySyncState::Syncing {
                state.state = KeySyncState::Unsynced;
            }
            debug!(tenant = %self.tenant.namespace(), key = %key, generation = state.generation, "local write");
        }
        self.schedule(key);
        Ok(true)
    }

    /// Persists a new payload and its metadata entry, then swaps it into
    /// the cache and notifies observers.
    ///
    /// If the metadata write fails the previous payload is restored, so
    /// the two are never left describing different content.
    fn commit_local(
        &self,
        key: &EntityKey,
        state: &mut KeyState,
        next: EntityKeyData,
        entry: EntityKeyMetadata,
        checkpoint: Option<Checkpoint>,
        origin: ChangeOrigin,
    ) -> SyncResult<usize> {
        let namespace = self.tenant.namespace();
        let payload = next.encode()?;

        let mut metadata = self.metadata.lock();
        let mut updated = metadata.clone();
        updated.set_entry(key.as_str(), entry);
        if let Some(checkpoint) = checkpoint {
            updated.set_checkpoint(key.as_str(), checkpoint);
        }
        let encoded_metadata = updated.encode()?;

        let previous = self.local.load(namespace, key.as_str())?;
        self.local.store(namespace, key.as_str(), &payload)?;
        if let Err(err) = self.local.store(namespace, METADATA_KEY, &encoded_metadata) {
            let restored = match previous {
                Some(bytes) => self.local.store(namespace, key.as_str(), &bytes),
                None => self.local.clear(namespace, key.as_str()),
            };
            if let Err(restore_err) = restored {
                error!(
                    tenant = %namespace,
                    key = %key,
                    error = %restore_err,
                    "failed to roll back payload after metadata write failure"
                );
            }
            return Err(err.into());
        }
        *metadata = updated;
        drop(metadata);

        let before = std::mem::replace(&mut state.data, Arc::new(next));
        Ok(self.publish(key, &before, &state.data, origin))
    }

    fn publish(&self, key: &EntityKey, before: &EntityKeyData, after: &EntityKeyData, origin: ChangeOrigin) -> usize {
        let events = diff_events(key, before, after, origin);
        let count = events.len();
        for event in events {
            self.observers
                .publish(key, &event.entity, &event.id, after.body(&event.entity, &event.id));
            self.feed.emit(event);
        }
        count
    }

    /// Rewrites the local metadata record. No-op if `update` changes nothing.
    fn update_metadata(&self, update: impl FnOnce(&mut Metadata)) -> SyncResult<()> {
        let mut metadata = self.metadata.lock();
        let mut updated = metadata.clone();
        update(&mut updated);
        if updated == *metadata {
            return Ok(());
        }
        self.local
            .store(self.tenant.namespace(), METADATA_KEY, &updated.encode()?)?;
        *metadata = updated;
        Ok(())
    }

    fn slot(&self, key: &EntityKey) -> SyncResult<Arc<KeySlot>> {
        if let Some(slot) = self.slots.read().get(key) {
            return Ok(Arc::clone(slot));
        }
        let slot = {
            let mut slots = self.slots.write();
            if let Some(slot) = slots.get(key) {
                return Ok(Arc::clone(slot));
            }
            let (data, corrupt) = self.load_local(key)?;
            let slot = Arc::new(KeySlot::new(data, corrupt));
            slots.insert(key.clone(), Arc::clone(&slot));
            slot
        };
        // read miss
        self.schedule(key);
        Ok(slot)
    }

    /// Loads a key from the local backend and checks it against local
    /// metadata. Returns the payload to serve and whether it is corrupt.
    fn load_local(&self, key: &EntityKey) -> SyncResult<(EntityKeyData, bool)> {
        let namespace = self.tenant.namespace();
        let entry = self.metadata.lock().entry(key.as_str()).cloned();

        let Some(bytes) = self.local.load(namespace, key.as_str())? else {
            let lost = entry.is_some_and(|entry| entry.live_count() + entry.deleted_count() > 0);
            if lost {
                warn!(tenant = %namespace, key = %key, "local payload missing; forcing refetch");
            }
            return Ok((EntityKeyData::new(), lost));
        };

        let data = match EntityKeyData::decode(&bytes) {
            Ok(data) => data,
            Err(err) => {
                warn!(tenant = %namespace, key = %key, error = %err, "local payload unreadable; forcing refetch");
                return Ok((EntityKeyData::new(), true));
            }
        };
        if let Err(err) = self.registry.validate_data(key, &data) {
            warn!(tenant = %namespace, key = %key, error = %err, "local payload failed validation; forcing refetch");
            return Ok((EntityKeyData::new(), true));
        }

        let corrupt = match &entry {
            Some(entry) => match verify_integrity(key.as_str(), entry, &data) {
                Ok(()) => false,
                Err(err) => {
                    warn!(tenant = %namespace, key = %key, error = %err, "local corruption detected");
                    true
                }
            },
            None => !data.is_empty(),
        };
        Ok((data, corrupt))
    }

    fn is_stale(&self, state: &KeyState) -> bool {
        state.state.needs_sync()
            || state
                .last_checked
                .map_or(true, |checked| checked.elapsed() >= self.config.stale_after)
    }

    // --- scheduling ---------------------------------------------------------

    pub(crate) fn attach_scheduler(&self, sender: mpsc::UnboundedSender<EntityKey>) {
        *self.scheduler.lock() = Some(sender);
    }

    pub(crate) fn detach_scheduler(&self) {
        self.scheduler.lock().take();
        self.pending.lock().clear();
    }

    /// Queues a reconciliation of `key` on the worker, if one is attached.
    /// A key already queued is not queued twice.
    pub fn schedule(&self, key: &EntityKey) {
        let scheduler = self.scheduler.lock();
        let Some(sender) = scheduler.as_ref() else {
            return;
        };
        if self.pending.lock().insert(key.clone()) && sender.send(key.clone()).is_err() {
            self.pending.lock().remove(key);
        }
    }

    /// Marks a queued key as picked up by the worker.
    pub(crate) fn take_pending(&self, key: &EntityKey) {
        self.pending.lock().remove(key);
    }

    /// Consecutive offline rounds of a key.
    pub(crate) fn attempts(&self, key: &EntityKey) -> u32 {
        self.slots
            .read()
            .get(key)
            .map_or(0, |slot| slot.state.lock().attempts)
    }

    pub(crate) fn note_retry(&self) {
        self.stats.write().retries += 1;
    }

    // --- remote path --------------------------------------------------------

    /// Logs in through the authenticator and re-queues every known key.
    pub async fn login(&self) -> SyncResult<()> {
        let Some(auth) = &self.auth else {
            return Ok(());
        };
        auth.login().await.map_err(SyncError::from_remote)?;
        info!(tenant = %self.tenant.namespace(), "logged in; re-queuing keys");
        for key in self.known_keys() {
            self.schedule(&key);
        }
        Ok(())
    }

    fn ensure_authenticated(&self) -> SyncResult<()> {
        match &self.auth {
            Some(auth) if !auth.is_authenticated() => Err(SyncError::AuthRequired),
            _ => Ok(()),
        }
    }

    async fn fetch_remote_metadata(&self) -> SyncResult<Option<Metadata>> {
        let namespace = self.tenant.namespace();
        let bytes = self
            .remote
            .load(namespace, METADATA_KEY)
            .await
            .map_err(SyncError::from_remote)?;
        Ok(bytes.and_then(|bytes| match Metadata::decode(&bytes) {
            Ok(metadata) => Some(metadata),
            Err(err) => {
                warn!(tenant = %namespace, error = %err, "remote metadata unreadable; treating as absent");
                None
            }
        }))
    }

    /// Runs one reconciliation round for a key.
    ///
    /// Remote unavailability is not an error here: the key goes
    /// [`KeySyncState::OfflineDegraded`] and the report says
    /// [`SyncOutcome::Offline`]. `AuthRequired` and local failures are
    /// returned as errors.
    pub async fn sync_key(&self, key: &EntityKey) -> SyncResult<KeyReport> {
        let slot = self.slot(key)?;
        let _round = slot.reconcile.lock().await;

        let result = self.reconcile(key, &slot).await;
        let mut stats = self.stats.write();
        match &result {
            Ok(report) => {
                stats.cycles_completed += 1;
                stats.last_sync_time = Some(Instant::now());
                match &report.outcome {
                    SyncOutcome::Pulled { .. } => stats.pulls += 1,
                    SyncOutcome::Pushed => stats.pushes += 1,
                    SyncOutcome::Superseded => stats.superseded += 1,
                    SyncOutcome::Offline => stats.offline += 1,
                    SyncOutcome::Quarantined(_) => stats.quarantined += 1,
                    SyncOutcome::UpToDate => {}
                }
                if report.conflict.is_some() {
                    stats.conflicts_encountered += 1;
                }
            }
            Err(err) => stats.last_error = Some(err.to_string()),
        }
        drop(stats);

        if let Ok(report) = &result {
            if report.state == KeySyncState::Synced && self.config.compact_on_sync {
                if let Err(err) = self.compact(key) {
                    warn!(tenant = %self.tenant.namespace(), key = %key, error = %err, "compaction after sync failed");
                }
            }
        }
        result
    }

    /// Reconciles a key until it settles, tolerating up to
    /// `max_coalesce_rounds` superseded rounds.
    ///
    /// Unlike [`sync_key`](Self::sync_key), an unreachable remote or a
    /// quarantined payload is an error here.
    pub async fn flush(&self, key: &EntityKey) -> SyncResult<KeyReport> {
        let rounds = self.config.max_coalesce_rounds.max(1);
        for _ in 0..rounds {
            let report = self.sync_key(key).await?;
            match &report.outcome {
                SyncOutcome::Offline => {
                    return Err(SyncError::unavailable(format!("{key}: remote unreachable")));
                }
                SyncOutcome::Quarantined(error) => {
                    return Err(SyncError::Quarantined {
                        key: key.to_string(),
                        error: error.clone(),
                    });
                }
                _ => {}
            }
            if report.state == KeySyncState::Synced {
                return Ok(report);
            }
        }
        Err(SyncError::Superseded {
            key: key.to_string(),
            rounds,
        })
    }

    /// Runs one reconciliation round for every known key.
    pub async fn sync_all(&self) -> SyncResult<Vec<KeyReport>> {
        let mut reports = Vec::new();
        for key in self.known_keys() {
            reports.push(self.sync_key(&key).await?);
        }
        Ok(reports)
    }

    async fn reconcile(&self, key: &EntityKey, slot: &KeySlot) -> SyncResult<KeyReport> {
        let namespace = self.tenant.namespace();
        let (generation, local_data, corrupt) = {
            let mut state = slot.state.lock();
            state.state = KeySyncState::Syncing;
            (state.generation, Arc::clone(&state.data), state.corrupt)
        };
        let (local_entry, checkpoint) = {
            let metadata = self.metadata.lock();
            (
                metadata.entry(key.as_str()).cloned(),
                metadata.checkpoint(key.as_str()).copied(),
            )
        };

        if let Err(err) = self.ensure_authenticated() {
            return self.fail_round(key, slot, err);
        }
        let remote_metadata = match self.fetch_remote_metadata().await {
            Ok(metadata) => metadata,
            Err(err) => return self.fail_round(key, slot, err),
        };
        let remote_entry = remote_metadata
            .as_ref()
            .and_then(|metadata| metadata.entry(key.as_str()))
            .cloned();

        let count_mismatch = matches!(
            (&local_entry, &remote_entry),
            (Some(local), Some(remote)) if local.is_count_mismatch(remote)
        );
        let forced = corrupt || count_mismatch;
        let direction = if forced {
            if remote_entry.is_some() {
                SyncDirection::RemoteNewer
            } else {
                SyncDirection::LocalNewer
            }
        } else {
            compare(local_entry.as_ref(), remote_entry.as_ref(), checkpoint.as_ref())
        };
        debug!(tenant = %namespace, key = %key, ?direction, forced, "compared metadata");

        let conflict = match (direction, &local_entry, &remote_entry) {
            (SyncDirection::Conflict { winner }, Some(local), Some(remote)) => Some(ConflictRecord::new(
                namespace,
                key.as_str(),
                local.clone(),
                remote.clone(),
                checkpoint,
                winner,
            )),
            _ => None,
        };

        let step = match (direction.source(), remote_entry.as_ref()) {
            (None, _) => self
                .settle_equal(key, slot, generation, local_entry.as_ref(), remote_entry.as_ref())
                .map(|outcome| (outcome, None)),
            (Some(Side::Remote), Some(remote)) => {
                self.pull(key, slot, generation, remote, &local_data, local_entry.as_ref(), corrupt)
                    .await
            }
            (Some(Side::Remote), None) | (Some(Side::Local), _) => self
                .push(key, slot, generation, &local_data, local_entry.as_ref(), corrupt)
                .await
                .map(|outcome| (outcome, None)),
        };
        let (outcome, remote_corruption) = match step {
            Ok(step) => step,
            Err(err) => return self.fail_round(key, slot, err),
        };

        let state_after = {
            let mut state = slot.state.lock();
            state.last_checked = Some(Instant::now());
            if outcome.is_settled() {
                state.attempts = 0;
            }
            state.state = if outcome.is_settled() && state.generation == generation {
                KeySyncState::Synced
            } else {
                KeySyncState::Unsynced
            };
            state.state
        };

        let conflict = conflict.filter(|_| outcome.is_settled());
        if let Some(record) = &conflict {
            self.record_conflict(record.clone());
        }

        info!(
            tenant = %namespace,
            key = %key,
            ?direction,
            outcome = ?outcome,
            state = %state_after,
            "reconciled"
        );
        Ok(KeyReport {
            key: key.clone(),
            direction: Some(direction),
            outcome,
            conflict,
            remote_corruption,
            state: state_after,
        })
    }

    /// Ends a round that hit an error. An unreachable remote degrades the
    /// key to offline; anything else is returned.
    fn fail_round(&self, key: &EntityKey, slot: &KeySlot, err: SyncError) -> SyncResult<KeyReport> {
        let mut state = slot.state.lock();
        match err {
            SyncError::RemoteUnavailable { message } => {
                state.state = KeySyncState::OfflineDegraded;
                state.attempts = state.attempts.saturating_add(1);
                warn!(
                    tenant = %self.tenant.namespace(),
                    key = %key,
                    attempts = state.attempts,
                    error = %message,
                    "remote unavailable; serving local data"
                );
                let report = KeyReport::new(key.clone(), SyncOutcome::Offline, state.state);
                drop(state);
                self.stats.write().last_error = Some(message);
                Ok(report)
            }
            other => {
                state.state = KeySyncState::Unsynced;
                warn!(tenant = %self.tenant.namespace(), key = %key, error = %other, "reconciliation failed");
                Err(other)
            }
        }
    }

    fn settle_equal(
        &self,
        key: &EntityKey,
        slot: &KeySlot,
        generation: u64,
        local: Option<&EntityKeyMetadata>,
        remote: Option<&EntityKeyMetadata>,
    ) -> SyncResult<SyncOutcome> {
        let state = slot.state.lock();
        if state.generation != generation {
            return Ok(SyncOutcome::Superseded);
        }
        if let (Some(local), Some(remote)) = (local, remote) {
            let checkpoint = Checkpoint {
                at: local.updated_at.max(remote.updated_at),
                hash: local.hash,
            };
            self.update_metadata(|metadata| metadata.set_checkpoint(key.as_str(), checkpoint))?;
        }
        Ok(SyncOutcome::UpToDate)
    }

    #[allow(clippy::too_many_arguments)]
    async fn pull(
        &self,
        key: &EntityKey,
        slot: &KeySlot,
        generation: u64,
        remote_entry: &EntityKeyMetadata,
        local_data: &EntityKeyData,
        local_entry: Option<&EntityKeyMetadata>,
        corrupt: bool,
    ) -> SyncResult<(SyncOutcome, Option<String>)> {
        let namespace = self.tenant.namespace();
        if slot.state.lock().generation != generation {
            return Ok((SyncOutcome::Superseded, None));
        }
        let bytes = self
            .remote
            .load(namespace, key.as_str())
            .await
            .map_err(SyncError::from_remote)?;

        let verified = match bytes {
            None => Err(CoreError::corruption(key.as_str(), "remote payload missing")),
            Some(bytes) => EntityKeyData::decode(&bytes)
                .and_then(|data| verify_integrity(key.as_str(), remote_entry, &data).map(|()| data)),
        };
        let data = match verified {
            Ok(data) => data,
            Err(err) if !corrupt => {
                warn!(tenant = %namespace, key = %key, error = %err, "remote copy failed verification; pushing local");
                self.stats.write().quarantined += 1;
                let outcome = self.push(key, slot, generation, local_data, local_entry, false).await?;
                return Ok((outcome, Some(err.to_string())));
            }
            Err(err) => {
                error!(tenant = %namespace, key = %key, error = %err, "both copies failed verification");
                return Err(err.into());
            }
        };

        if let Err(error) = self.registry.validate_data(key, &data) {
            warn!(tenant = %namespace, key = %key, error = %error, "remote payload quarantined");
            return Ok((SyncOutcome::Quarantined(error), None));
        }

        let mut state = slot.state.lock();
        if state.generation != generation {
            debug!(tenant = %namespace, key = %key, "pull superseded by local write");
            return Ok((SyncOutcome::Superseded, None));
        }
        let checkpoint = Checkpoint {
            at: remote_entry.updated_at,
            hash: remote_entry.hash,
        };
        let changed = self.commit_local(
            key,
            &mut state,
            data,
            remote_entry.clone(),
            Some(checkpoint),
            ChangeOrigin::Remote,
        )?;
        state.corrupt = false;
        Ok((SyncOutcome::Pulled { changed }, None))
    }

    async fn push(
        &self,
        key: &EntityKey,
        slot: &KeySlot,
        generation: u64,
        local_data: &EntityKeyData,
        local_entry: Option<&EntityKeyMetadata>,
        corrupt: bool,
    ) -> SyncResult<SyncOutcome> {
        let namespace = self.tenant.namespace();

        // An entry that no longer describes the payload is rebuilt first.
        let entry = match local_entry {
            Some(entry) if !corrupt && verify_integrity(key.as_str(), entry, local_data).is_ok() => entry.clone(),
            previous => {
                let state = slot.state.lock();
                if state.generation != generation {
                    return Ok(SyncOutcome::Superseded);
                }
                let at = Timestamp::now_after(previous.map_or(Timestamp::ZERO, |entry| entry.updated_at));
                let entry = EntityKeyMetadata::describe(local_data, at);
                self.update_metadata(|metadata| metadata.set_entry(key.as_str(), entry.clone()))?;
                info!(tenant = %namespace, key = %key, "rebuilt local metadata entry");
                entry
            }
        };

        if slot.state.lock().generation != generation {
            return Ok(SyncOutcome::Superseded);
        }
        self.remote
            .store(namespace, key.as_str(), local_data.encode()?)
            .await
            .map_err(SyncError::from_remote)?;
        {
            let _guard = self.remote_metadata.lock().await;
            let mut remote_metadata = self
                .fetch_remote_metadata()
                .await?
                .unwrap_or_else(|| Metadata::new(&self.tenant));
            remote_metadata.set_entry(key.as_str(), entry.clone());
            self.remote
                .store(namespace, METADATA_KEY, remote_metadata.encode()?)
                .await
                .map_err(SyncError::from_remote)?;
        }

        // The remote now holds `entry`, whatever happened locally meanwhile.
        let mut state = slot.state.lock();
        let checkpoint = Checkpoint {
            at: entry.updated_at,
            hash: entry.hash,
        };
        self.update_metadata(|metadata| metadata.set_checkpoint(key.as_str(), checkpoint))?;
        state.corrupt = false;
        if state.generation != generation {
            debug!(tenant = %namespace, key = %key, "push superseded by local write");
            return Ok(SyncOutcome::Superseded);
        }
        Ok(SyncOutcome::Pushed)
    }

    fn record_conflict(&self, record: ConflictRecord) {
        warn!(
            tenant = %record.tenant,
            key = %record.key,
            resolution = ?record.resolution,
            "conflict resolved by tie-break"
        );
        let mut conflicts = self.conflicts.lock();
        conflicts.push(record);
        let excess = conflicts.len().saturating_sub(self.config.max_conflict_records);
        conflicts.drain(..excess);

        let stored = ConflictRecord::encode_log(&conflicts)
            .map_err(SyncError::from)
            .and_then(|bytes| {
                self.local
                    .store(self.tenant.namespace(), CONFLICTS_KEY, &bytes)
                    .map_err(SyncError::from)
            });
        if let Err(err) = stored {
            error!(tenant = %self.tenant.namespace(), error = %err, "failed to persist conflict log");
        }
    }
}

impl std::fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("tenant", &self.tenant)
            .field("remote", &self.remote.name())
            .field("loaded_keys", &self.slots.read().len())
            .finish_non_exhaustive()
    }
}

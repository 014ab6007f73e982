//! Scenario helpers that put either side into a known state.
//!
//! Seeding writes the payload and its metadata entry directly, the way a
//! previous session or another device would have left them.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::io;
use tallysync_core::codec::to_cbor;
use tallysync_core::{
    Checkpoint, Entity, EntityKeyData, EntityKeyMetadata, Metadata, TenantId, Timestamp, METADATA_KEY,
};
use tallysync_storage::{InMemoryBackend, MemoryRemote, StorageBackend, StorageError, StorageResult};

/// Builds a payload holding `entities` as live records.
pub fn key_data<T: Entity>(entities: &[T]) -> EntityKeyData {
    let mut data = EntityKeyData::new();
    for entity in entities {
        let body = to_cbor(entity).expect("Failed to encode entity");
        data.put(T::NAME, entity.id(), body).expect("Duplicate of a deleted id");
    }
    data
}

/// Writes `data` and its metadata entry to a local backend.
pub fn seed_local(
    local: &dyn StorageBackend,
    tenant: &TenantId,
    key: &str,
    data: &EntityKeyData,
    updated_at: Timestamp,
) -> EntityKeyMetadata {
    let namespace = tenant.namespace();
    let entry = EntityKeyMetadata::describe(data, updated_at);
    local
        .store(namespace, key, &data.encode().expect("Failed to encode payload"))
        .expect("Failed to seed local payload");
    update_local_metadata(local, tenant, |metadata| metadata.set_entry(key, entry.clone()));
    entry
}

/// Records a checkpoint in the local metadata, as if a sync had completed.
pub fn seed_checkpoint(local: &dyn StorageBackend, tenant: &TenantId, key: &str, checkpoint: Checkpoint) {
    update_local_metadata(local, tenant, |metadata| metadata.set_checkpoint(key, checkpoint));
}

/// Writes `data` and its metadata entry to a simulated remote.
pub fn seed_remote(
    remote: &MemoryRemote,
    tenant: &TenantId,
    key: &str,
    data: &EntityKeyData,
    updated_at: Timestamp,
) -> EntityKeyMetadata {
    let namespace = tenant.namespace();
    let entry = EntityKeyMetadata::describe(data, updated_at);
    remote.seed(namespace, key, data.encode().expect("Failed to encode payload"));
    let mut metadata = remote_metadata(remote, tenant).unwrap_or_else(|| Metadata::new(tenant));
    metadata.set_entry(key, entry.clone());
    remote.seed(namespace, METADATA_KEY, metadata.encode().expect("Failed to encode metadata"));
    entry
}

/// Reads the local metadata record.
pub fn local_metadata(local: &dyn StorageBackend, tenant: &TenantId) -> Option<Metadata> {
    local
        .load(tenant.namespace(), METADATA_KEY)
        .expect("Failed to load local metadata")
        .map(|bytes| Metadata::decode(&bytes).expect("Failed to decode local metadata"))
}

/// Reads the remote metadata record without touching the call counters.
pub fn remote_metadata(remote: &MemoryRemote, tenant: &TenantId) -> Option<Metadata> {
    remote
        .peek(tenant.namespace(), METADATA_KEY)
        .map(|bytes| Metadata::decode(&bytes).expect("Failed to decode remote metadata"))
}

/// Reads a remote payload without touching the call counters.
pub fn remote_data(remote: &MemoryRemote, tenant: &TenantId, key: &str) -> Option<EntityKeyData> {
    remote
        .peek(tenant.namespace(), key)
        .map(|bytes| EntityKeyData::decode(&bytes).expect("Failed to decode remote payload"))
}

fn update_local_metadata(local: &dyn StorageBackend, tenant: &TenantId, update: impl FnOnce(&mut Metadata)) {
    let mut metadata = local_metadata(local, tenant).unwrap_or_else(|| Metadata::new(tenant));
    update(&mut metadata);
    local
        .store(
            tenant.namespace(),
            METADATA_KEY,
            &metadata.encode().expect("Failed to encode metadata"),
        )
        .expect("Failed to seed local metadata");
}

/// An in-memory local backend whose stores to selected keys fail.
#[derive(Default)]
pub struct FlakyBackend {
    inner: InMemoryBackend,
    failing: Mutex<HashSet<String>>,
}

impl FlakyBackend {
    /// Creates a backend where every call succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every store to `key` fail, in any tenant.
    pub fn fail_stores_to(&self, key: &str) {
        self.failing.lock().insert(key.to_string());
    }

    /// Makes every call succeed again.
    pub fn heal(&self) {
        self.failing.lock().clear();
    }
}

impl StorageBackend for FlakyBackend {
    fn load(&self, tenant: &str, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.inner.load(tenant, key)
    }

    fn store(&self, tenant: &str, key: &str, data: &[u8]) -> StorageResult<()> {
        if self.failing.lock().contains(key) {
            return Err(StorageError::Io(io::Error::other("injected store failure")));
        }
        self.inner.store(tenant, key, data)
    }

    fn clear(&self, tenant: &str, key: &str) -> StorageResult<()> {
        self.inner.clear(tenant, key)
    }

    fn keys(&self, tenant: &str) -> StorageResult<Vec<String>> {
        self.inner.keys(tenant)
    }
}

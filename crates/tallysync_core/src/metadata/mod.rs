//! Per-tenant metadata: fingerprints and counts per entity key.
//!
//! The metadata record lets the engine decide whether a key needs pulling,
//! pushing, or nothing at all by exchanging a few dozen bytes instead of the
//! whole payload.

mod compare;
mod hash;

pub use compare::{compare, flattened_count, Side, SyncDirection};
pub use hash::compute_hash;

use crate::codec::{from_cbor, to_cbor};
use crate::entity::{Entity, EntityKeyData};
use crate::error::{CoreError, CoreResult};
use crate::types::{TenantId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reserved storage key of the per-tenant metadata record.
pub const METADATA_KEY: &str = "_metadata";

/// Live and tombstoned record counts of one entity name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCounts {
    /// Live records.
    pub count: u64,
    /// Tombstones.
    pub deleted_count: u64,
}

/// Fingerprint of one entity key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityKeyMetadata {
    /// Time of the last mutation of the key.
    pub updated_at: Timestamp,
    /// [`compute_hash`] of the key's payload.
    pub hash: u64,
    /// Counts per entity name.
    #[serde(default)]
    pub entities: BTreeMap<String, EntityCounts>,
}

impl EntityKeyMetadata {
    /// Describes `data` as of `updated_at`.
    #[must_use]
    pub fn describe(data: &EntityKeyData, updated_at: Timestamp) -> Self {
        Self {
            updated_at,
            hash: compute_hash(data),
            entities: data.counts(),
        }
    }

    /// Returns true if both entries fingerprint the same content.
    ///
    /// Equal hashes with different counts are not equal: that combination
    /// means one side is corrupt.
    #[must_use]
    pub fn same_content(&self, other: &EntityKeyMetadata) -> bool {
        self.hash == other.hash && self.entities == other.entities
    }

    /// Returns true if hashes agree while counts do not.
    #[must_use]
    pub fn is_count_mismatch(&self, other: &EntityKeyMetadata) -> bool {
        self.hash == other.hash && self.entities != other.entities
    }

    /// Total live records across entity names.
    #[must_use]
    pub fn live_count(&self) -> u64 {
        self.entities.values().map(|c| c.count).sum()
    }

    /// Total tombstones across entity names.
    #[must_use]
    pub fn deleted_count(&self) -> u64 {
        self.entities.values().map(|c| c.deleted_count).sum()
    }
}

/// Point at which local and remote were last known to hold the same content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Shared `updated_at` at the end of the last successful reconciliation.
    pub at: Timestamp,
    /// Shared hash at that point.
    pub hash: u64,
}

/// Per-tenant metadata record.
///
/// Created lazily on the first write to a tenant. An entry, once created,
/// is never removed while the tenant exists; an emptied key keeps an entry
/// with zero counts so it is not mistaken for "never synced".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Record id: the tenant namespace.
    pub id: String,
    /// Fingerprints per entity key.
    #[serde(default)]
    pub keys: BTreeMap<String, EntityKeyMetadata>,
    /// Last reconciliation checkpoint per entity key. Local bookkeeping.
    #[serde(default)]
    pub checkpoints: BTreeMap<String, Checkpoint>,
}

impl Entity for Metadata {
    const NAME: &'static str = "metadata";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Metadata {
    /// Creates an empty metadata record for a tenant.
    #[must_use]
    pub fn new(tenant: &TenantId) -> Self {
        Self {
            id: tenant.namespace().to_string(),
            keys: BTreeMap::new(),
            checkpoints: BTreeMap::new(),
        }
    }

    /// Returns the entry of one key.
    #[must_use]
    pub fn entry(&self, key: &str) -> Option<&EntityKeyMetadata> {
        self.keys.get(key)
    }

    /// Sets the entry of one key.
    pub fn set_entry(&mut self, key: &str, entry: EntityKeyMetadata) {
        self.keys.insert(key.to_string(), entry);
    }

    /// Returns the checkpoint of one key.
    #[must_use]
    pub fn checkpoint(&self, key: &str) -> Option<&Checkpoint> {
        self.checkpoints.get(key)
    }

    /// Records a checkpoint for one key.
    pub fn set_checkpoint(&mut self, key: &str, checkpoint: Checkpoint) {
        self.checkpoints.insert(key.to_string(), checkpoint);
    }

    /// Encodes to CBOR.
    ///
    /// # Errors
    ///
    /// Returns a codec error if serialization fails.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        to_cbor(self)
    }

    /// Decodes from CBOR.
    ///
    /// # Errors
    ///
    /// Returns a codec error for malformed bytes.
    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        from_cbor(bytes)
    }
}

/// Checks a payload against the entry that claims to describe it.
///
/// # Errors
///
/// Returns [`CoreError::Corruption`] if the recomputed hash or counts differ.
pub fn verify_integrity(key: &str, entry: &EntityKeyMetadata, data: &EntityKeyData) -> CoreResult<()> {
    let hash = compute_hash(data);
    if hash != entry.hash {
        return Err(CoreError::corruption(
            key,
            format!("hash mismatch: recorded {:016x}, computed {:016x}", entry.hash, hash),
        ));
    }
    if data.counts() != entry.entities {
        return Err(CoreError::corruption(key, "entity counts do not match payload"));
    }
    Ok(())
}

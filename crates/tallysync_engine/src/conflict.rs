//! Conflict records.
//!
//! A conflict is never fatal: the tie-break picks a winner, the round goes
//! on, and the losing fingerprint is kept here so the caller can see what
//! was overwritten.

use serde::{Deserialize, Serialize};
use tallysync_core::codec::{from_cbor, to_cbor};
use tallysync_core::{new_id, Checkpoint, CoreResult, EntityKeyMetadata, Side, Timestamp};

/// Reserved storage key of the per-tenant conflict log.
pub const CONFLICTS_KEY: &str = "_conflicts";

/// How a conflict was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictResolution {
    /// Local content was pushed over the remote copy.
    KeepLocal,
    /// Remote content replaced the local cache.
    AcceptRemote,
}

impl ConflictResolution {
    /// Maps the winning side onto a resolution.
    pub fn from_winner(winner: Side) -> Self {
        match winner {
            Side::Local => ConflictResolution::KeepLocal,
            Side::Remote => ConflictResolution::AcceptRemote,
        }
    }

    /// Returns the side that was kept.
    pub fn winner(&self) -> Side {
        match self {
            ConflictResolution::KeepLocal => Side::Local,
            ConflictResolution::AcceptRemote => Side::Remote,
        }
    }
}

/// A detected conflict between the local and remote copy of one key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    /// Unique record id.
    pub id: String,
    /// Tenant namespace.
    pub tenant: String,
    /// Entity key.
    pub key: String,
    /// Local fingerprint at detection time.
    pub local: EntityKeyMetadata,
    /// Remote fingerprint at detection time.
    pub remote: EntityKeyMetadata,
    /// Checkpoint both sides diverged from.
    pub checkpoint: Option<Checkpoint>,
    /// How the conflict was settled.
    pub resolution: ConflictResolution,
    /// When the conflict was detected.
    pub detected_at: Timestamp,
}

impl ConflictRecord {
    /// Creates a new conflict record.
    pub fn new(
        tenant: impl Into<String>,
        key: impl Into<String>,
        local: EntityKeyMetadata,
        remote: EntityKeyMetadata,
        checkpoint: Option<Checkpoint>,
        winner: Side,
    ) -> Self {
        Self {
            id: new_id(),
            tenant: tenant.into(),
            key: key.into(),
            local,
            remote,
            checkpoint,
            resolution: ConflictResolution::from_winner(winner),
            detected_at: Timestamp::now(),
        }
    }

    /// Returns true if the local copy was overwritten.
    pub fn local_lost(&self) -> bool {
        self.resolution == ConflictResolution::AcceptRemote
    }

    /// Encodes a conflict log to CBOR.
    pub fn encode_log(records: &[ConflictRecord]) -> CoreResult<Vec<u8>> {
        to_cbor(records)
    }

    /// Decodes a conflict log from CBOR.
    pub fn decode_log(bytes: &[u8]) -> CoreResult<Vec<ConflictRecord>> {
        from_cbor(bytes)
    }
}

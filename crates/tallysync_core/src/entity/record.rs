//! A single stored record: live body or tombstone.

use crate::types::Timestamp;
use serde::{Deserialize, Serialize};

/// One entry of an [`super::EntityKeyData`].
///
/// Deletions leave a tombstone behind so that they propagate to the other
/// backend instead of the entity reappearing on the next pull.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityRecord {
    /// A live entity, stored as its CBOR body.
    Live {
        /// Encoded entity.
        #[serde(with = "serde_bytes")]
        body: Vec<u8>,
    },
    /// A deleted entity.
    Tombstone {
        /// When the deletion happened.
        deleted_at: Timestamp,
    },
}

impl EntityRecord {
    /// Creates a live record.
    #[must_use]
    pub fn live(body: Vec<u8>) -> Self {
        Self::Live { body }
    }

    /// Creates a tombstone.
    #[must_use]
    pub fn tombstone(deleted_at: Timestamp) -> Self {
        Self::Tombstone { deleted_at }
    }

    /// Returns true for tombstones.
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        matches!(self, Self::Tombstone { .. })
    }

    /// Returns the body of a live record.
    #[must_use]
    pub fn body(&self) -> Option<&[u8]> {
        match self {
            Self::Live { body } => Some(body),
            Self::Tombstone { .. } => None,
        }
    }
}

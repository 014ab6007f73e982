//! Deciding the sync direction of one key from its two metadata entries.

use super::{Checkpoint, EntityKeyMetadata};
use std::fmt;

/// Which copy of a key wins a reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// The local backend's copy.
    Local,
    /// The remote backend's copy.
    Remote,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Local => f.write_str("local"),
            Side::Remote => f.write_str("remote"),
        }
    }
}

/// Outcome of comparing local and remote metadata for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDirection {
    /// Both copies hold the same content. Nothing to transfer.
    Equal,
    /// Local is ahead: push.
    LocalNewer,
    /// Remote is ahead: pull.
    RemoteNewer,
    /// Both sides changed since the last checkpoint.
    ///
    /// `winner` is the side chosen by the tie-break policy.
    Conflict {
        /// Side whose content is kept.
        winner: Side,
    },
}

impl SyncDirection {
    /// Returns the side whose content should end up on both backends.
    #[must_use]
    pub fn source(&self) -> Option<Side> {
        match self {
            SyncDirection::Equal => None,
            SyncDirection::LocalNewer => Some(Side::Local),
            SyncDirection::RemoteNewer => Some(Side::Remote),
            SyncDirection::Conflict { winner } => Some(*winner),
        }
    }
}

/// Live size of a key: `Σ (count - deleted_count)` over entity names.
///
/// Used only to break conflicts, so it is signed: a key with more
/// tombstones than live records ranks below an empty one.
#[must_use]
pub fn flattened_count(entry: &EntityKeyMetadata) -> i64 {
    entry
        .entities
        .values()
        .map(|c| c.count as i64 - c.deleted_count as i64)
        .sum()
}

/// Compares two metadata entries of the same key.
///
/// - Missing on both sides: `Equal`. Missing on one side: the other wins.
/// - Same hash and same counts: `Equal`. A hash match with differing counts
///   is treated as a hash miss.
/// - Both `updated_at` past the last common `checkpoint`: `Conflict`.
/// - Otherwise the later `updated_at` wins; ties go to local.
///
/// Without a checkpoint there is no evidence of independent edits, so the
/// timestamps decide.
///
/// # Conflict policy
///
/// A conflict keeps the copy with the larger [`flattened_count`]; an exact
/// tie keeps local. This policy is deliberate and **lossy**: the losing
/// copy's changes are overwritten, and the caller gets a conflict record
/// for it. It is a placeholder until real multi-device usage tells us
/// whether a per-entity merge is worth its cost.
#[must_use]
pub fn compare(
    local: Option<&EntityKeyMetadata>,
    remote: Option<&EntityKeyMetadata>,
    checkpoint: Option<&Checkpoint>,
) -> SyncDirection {
    let (local, remote) = match (local, remote) {
        (None, None) => return SyncDirection::Equal,
        (Some(_), None) => return SyncDirection::LocalNewer,
        (None, Some(_)) => return SyncDirection::RemoteNewer,
        (Some(local), Some(remote)) => (local, remote),
    };

    if local.same_content(remote) {
        return SyncDirection::Equal;
    }

    if let Some(checkpoint) = checkpoint {
        if local.updated_at > checkpoint.at && remote.updated_at > checkpoint.at {
            return SyncDirection::Conflict {
                winner: tie_break(local, remote),
            };
        }
    }

    if remote.updated_at > local.updated_at {
        SyncDirection::RemoteNewer
    } else {
        SyncDirection::LocalNewer
    }
}

fn tie_break(local: &EntityKeyMetadata, remote: &EntityKeyMetadata) -> Side {
    if flattened_count(remote) > flattened_count(local) {
        Side::Remote
    } else {
        Side::Local
    }
}

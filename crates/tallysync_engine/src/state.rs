//! Per-key sync state machine and reporting types.

use crate::conflict::ConflictRecord;
use tallysync_core::{EntityKey, SyncDirection, ValidationError};
use std::fmt;
use std::time::Instant;

/// Where a single entity key stands relative to the remote backend.
///
/// ```text
/// Unsynced --sync--> Syncing --ok--> Synced
///     ^                 |  \
///     |   local write   |   `--remote down--> OfflineDegraded
///     `-----------------'                          |
///                                  retry / login --'
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeySyncState {
    /// Local data has not been reconciled since it was loaded or changed.
    #[default]
    Unsynced,
    /// A reconciliation is in flight.
    Syncing,
    /// Local and remote agreed at the last reconciliation.
    Synced,
    /// The remote was unreachable; local data is served as-is.
    OfflineDegraded,
}

impl KeySyncState {
    /// Returns true if a reconciliation is in flight.
    pub fn is_active(&self) -> bool {
        matches!(self, KeySyncState::Syncing)
    }

    /// Returns true if the key needs a reconciliation.
    pub fn needs_sync(&self) -> bool {
        matches!(self, KeySyncState::Unsynced | KeySyncState::OfflineDegraded)
    }
}

impl fmt::Display for KeySyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            KeySyncState::Unsynced => "unsynced",
            KeySyncState::Syncing => "syncing",
            KeySyncState::Synced => "synced",
            KeySyncState::OfflineDegraded => "offline",
        };
        f.write_str(label)
    }
}

/// What a single reconciliation round did.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// Fingerprints matched; no data moved.
    UpToDate,
    /// Remote data replaced the local cache.
    Pulled {
        /// Number of (entity, id) pairs whose value changed locally.
        changed: usize,
    },
    /// Local data replaced the remote copy.
    Pushed,
    /// A newer local write landed mid-flight; the round was discarded.
    Superseded,
    /// The remote could not be reached; local data is unchanged.
    Offline,
    /// The remote payload failed validation and was not applied.
    Quarantined(ValidationError),
}

impl SyncOutcome {
    /// Returns true if local and remote agree after this round.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            SyncOutcome::UpToDate | SyncOutcome::Pulled { .. } | SyncOutcome::Pushed
        )
    }
}

/// Report for one reconciliation of one key.
#[derive(Debug, Clone)]
pub struct KeyReport {
    /// The reconciled key.
    pub key: EntityKey,
    /// Direction chosen by the metadata comparison, if one was made.
    pub direction: Option<SyncDirection>,
    /// What happened.
    pub outcome: SyncOutcome,
    /// Conflict detected during this round.
    pub conflict: Option<ConflictRecord>,
    /// Why the remote copy was rejected when this round pushed the local
    /// copy over it instead of pulling.
    pub remote_corruption: Option<String>,
    /// State of the key after the round.
    pub state: KeySyncState,
}

impl KeyReport {
    pub(crate) fn new(key: EntityKey, outcome: SyncOutcome, state: KeySyncState) -> Self {
        Self {
            key,
            direction: None,
            outcome,
            conflict: None,
            remote_corruption: None,
            state,
        }
    }
}

/// Statistics about sync operations.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Total number of reconciliation rounds completed.
    pub cycles_completed: u64,
    /// Rounds that pulled remote data.
    pub pulls: u64,
    /// Rounds that pushed local data.
    pub pushes: u64,
    /// Conflicts detected.
    pub conflicts_encountered: u64,
    /// Rounds discarded because of a newer local write.
    pub superseded: u64,
    /// Remote payloads refused by validation or integrity checks.
    pub quarantined: u64,
    /// Rounds that found the remote unreachable.
    pub offline: u64,
    /// Retries scheduled after transient failures.
    pub retries: u64,
    /// Last sync time.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

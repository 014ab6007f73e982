//! # tallysync engine
//!
//! Local-first synchronization of tenant-scoped entity collections.
//!
//! This crate provides:
//! - [`SyncOrchestrator`]: per-key reconciliation between a fast local
//!   backend and a slower, failable remote backend
//! - A per-key state machine (unsynced → syncing → synced, or offline)
//! - Conflict detection against the last common checkpoint, with a
//!   deterministic tie-break and persisted [`ConflictRecord`]s
//! - Retry with exponential backoff from a background [`SyncWorker`]
//! - [`Repository`]: a typed read/write facade with `observe` handles
//! - [`TenantContext`]: the per-login owner of all of the above
//!
//! ## Architecture
//!
//! Reads and writes go to the local cache only. Every write bumps the key's
//! metadata atomically with the data and schedules a reconciliation; the
//! reconciliation compares local and remote metadata and moves data only
//! when the fingerprints differ:
//!
//! 1. Load local metadata (synchronous)
//! 2. Load remote metadata (may fail: the key goes offline-degraded)
//! 3. Compare: equal → done, remote newer → pull, local newer → push
//! 4. Conflict → tie-break, then pull or push, and record the conflict
//!
//! ## Key Invariants
//!
//! - Remote failures never block local reads or writes
//! - Writes to one key are serialized; their order is the call order
//! - A reconciliation that started before a newer local write is discarded
//! - Observers may see duplicates, never a torn or stale-after-newer value

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod conflict;
mod context;
mod error;
mod feed;
mod orchestrator;
mod repository;
mod state;
mod worker;

pub use config::{RetryConfig, SyncConfig};
pub use conflict::{ConflictRecord, ConflictResolution, CONFLICTS_KEY};
pub use context::{TenantContext, TenantContextBuilder};
pub use error::{SyncError, SyncResult};
pub use feed::{ChangeEvent, ChangeFeed, ChangeOrigin, ChangeType};
pub use orchestrator::SyncOrchestrator;
pub use repository::{Observer, Repository};
pub use state::{KeyReport, KeySyncState, SyncOutcome, SyncStats};
pub use worker::SyncWorker;

pub use tallysync_core::{Entity, EntityKey, SchemaRegistry, TenantId};

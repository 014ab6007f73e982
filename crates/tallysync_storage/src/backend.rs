//! Local storage backend trait definition.

use crate::error::{StorageError, StorageResult};

/// A synchronous, always-available key/value blob store.
///
/// This is the local side of the engine: the authoritative cache that
/// repositories read from directly. Calls are expected to be fast and never
/// to suspend.
///
/// # Invariants
///
/// - `load` returns `Ok(None)` for a key that was never written
/// - `store` is atomic from the caller's point of view
/// - `clear` succeeds when the key is absent
/// - Backends must be `Send + Sync`; mutation goes through `&self`
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing
/// - [`super::FileBackend`] - For persistent storage
pub trait StorageBackend: Send + Sync {
    /// Loads the blob stored at `{tenant}/{key}`.
    ///
    /// # Errors
    ///
    /// Returns an error if the medium cannot be read.
    fn load(&self, tenant: &str, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Replaces the blob stored at `{tenant}/{key}`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails. The previous value is kept.
    fn store(&self, tenant: &str, key: &str, data: &[u8]) -> StorageResult<()>;

    /// Removes the blob stored at `{tenant}/{key}`.
    ///
    /// # Errors
    ///
    /// Returns an error only if an existing blob cannot be removed.
    fn clear(&self, tenant: &str, key: &str) -> StorageResult<()>;

    /// Lists the keys stored for a tenant, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the medium cannot be listed.
    fn keys(&self, tenant: &str) -> StorageResult<Vec<String>>;
}

/// Builds the persisted location of a blob.
#[must_use]
pub fn storage_path(tenant: &str, key: &str) -> String {
    format!("{tenant}/{key}")
}

/// Checks that a tenant or key can be used as a single path segment.
///
/// # Errors
///
/// Returns [`StorageError::InvalidPath`] for empty segments, segments
/// containing a separator, and the `.`/`..` names.
pub fn validate_segment(segment: &str) -> StorageResult<()> {
    let invalid = segment.is_empty()
        || segment == "."
        || segment == ".."
        || segment.contains(['/', '\\', '\0']);
    if invalid {
        return Err(StorageError::InvalidPath {
            segment: segment.to_string(),
        });
    }
    Ok(())
}

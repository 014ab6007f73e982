//! In-memory storage backend.

use crate::backend::{storage_path, validate_segment, StorageBackend};
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// An in-memory local backend.
///
/// This backend keeps every blob in a sorted map keyed by `"{tenant}/{key}"`
/// and is suitable for:
/// - Unit and integration tests
/// - Sessions that do not need to survive a restart
///
/// Writes can be switched off with [`InMemoryBackend::set_read_only`] to
/// exercise failed-store paths; a refused store never touches the old value.
///
/// # Example
///
/// ```rust
/// use tallysync_storage::{InMemoryBackend, StorageBackend};
///
/// let backend = InMemoryBackend::new();
/// backend.store("t1", "accounts", b"v1").unwrap();
/// backend.clear("t1", "accounts").unwrap();
/// backend.clear("t1", "accounts").unwrap(); // idempotent
/// assert!(backend.load("t1", "accounts").unwrap().is_none());
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    blobs: RwLock<BTreeMap<String, Vec<u8>>>,
    read_only: AtomicBool,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `store` and `clear` fail with an I/O error.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    /// Returns a copy of every stored blob, keyed by storage path.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, Vec<u8>> {
        self.blobs.read().clone()
    }

    /// Returns the number of stored blobs across all tenants.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }

    fn check_writable(&self) -> StorageResult<()> {
        if self.read_only.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "in-memory backend is read-only",
            )));
        }
        Ok(())
    }
}

impl StorageBackend for InMemoryBackend {
    fn load(&self, tenant: &str, key: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_segment(tenant)?;
        validate_segment(key)?;
        Ok(self.blobs.read().get(&storage_path(tenant, key)).cloned())
    }

    fn store(&self, tenant: &str, key: &str, data: &[u8]) -> StorageResult<()> {
        validate_segment(tenant)?;
        validate_segment(key)?;
        self.check_writable()?;
        self.blobs
            .write()
            .insert(storage_path(tenant, key), data.to_vec());
        Ok(())
    }

    fn clear(&self, tenant: &str, key: &str) -> StorageResult<()> {
        validate_segment(tenant)?;
        validate_segment(key)?;
        self.check_writable()?;
        self.blobs.write().remove(&storage_path(tenant, key));
        Ok(())
    }

    fn keys(&self, tenant: &str) -> StorageResult<Vec<String>> {
        validate_segment(tenant)?;
        let prefix = format!("{tenant}/");
        Ok(self
            .blobs
            .read()
            .keys()
            .filter_map(|path| path.strip_prefix(&prefix).map(str::to_string))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_new_is_empty() {
        let backend = InMemoryBackend::new();
        assert!(backend.is_empty());
        assert_eq!(backend.load("t", "k").unwrap(), None);
    }

    #[test]
    fn memory_store_overwrites() {
        let backend = InMemoryBackend::new();
        backend.store("t", "k", b"one").unwrap();
        backend.store("t", "k", b"two").unwrap();
        assert_eq!(backend.load("t", "k").unwrap(), Some(b"two".to_vec()));
        assert_eq!(backend.len(), 1);
    }

    #[test]
    fn memory_tenants_are_isolated() {
        let backend = InMemoryBackend::new();
        backend.store("alice", "accounts", b"a").unwrap();
        backend.store("bob", "accounts", b"b").unwrap();

        assert_eq!(backend.load("alice", "accounts").unwrap(), Some(b"a".to_vec()));
        assert_eq!(backend.load("bob", "accounts").unwrap(), Some(b"b".to_vec()));
        assert_eq!(backend.keys("alice").unwrap(), vec!["accounts".to_string()]);
    }

    #[test]
    fn memory_clear_is_idempotent() {
        let backend = InMemoryBackend::new();
        backend.clear("t", "missing").unwrap();
        backend.store("t", "k", b"x").unwrap();
        backend.clear("t", "k").unwrap();
        backend.clear("t", "k").unwrap();
        assert!(backend.is_empty());
    }

    #[test]
    fn memory_failed_store_keeps_previous_value() {
        let backend = InMemoryBackend::new();
        backend.store("t", "k", b"old").unwrap();
        backend.set_read_only(true);

        assert!(backend.store("t", "k", b"new").is_err());
        assert_eq!(backend.load("t", "k").unwrap(), Some(b"old".to_vec()));

        backend.set_read_only(false);
        backend.store("t", "k", b"new").unwrap();
        assert_eq!(backend.load("t", "k").unwrap(), Some(b"new".to_vec()));
    }

    #[test]
    fn memory_rejects_bad_segments() {
        let backend = InMemoryBackend::new();
        assert!(matches!(
            backend.store("a/b", "k", b"x"),
            Err(StorageError::InvalidPath { .. })
        ));
    }
}

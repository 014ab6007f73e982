//! File-based storage backend for persistent storage.

use crate::backend::{validate_segment, StorageBackend};
use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Advisory lock file held for the lifetime of the backend.
const LOCK_FILE: &str = "LOCK";
/// Prefix of in-flight temporary files. Never listed as keys.
const TEMP_PREFIX: &str = ".tmp-";

/// A directory-based storage backend.
///
/// Each blob is one file:
///
/// ```text
/// <root>/
/// ├─ LOCK                  # Advisory lock, single owner
/// ├─ alice/
/// │  ├─ _metadata
/// │  └─ transactions
/// └─ _default/
///    └─ settings
/// ```
///
/// # Durability
///
/// `store` writes a temporary file, syncs it, then renames it over the old
/// blob, so readers observe either the old or the new bytes and never a
/// partial write.
///
/// # Example
///
/// ```no_run
/// use tallysync_storage::{FileBackend, StorageBackend};
/// use std::path::Path;
///
/// let backend = FileBackend::open(Path::new("tally-data")).unwrap();
/// backend.store("alice", "accounts", b"payload").unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    root: PathBuf,
    _lock_file: File,
}

impl FileBackend {
    /// Opens or creates a backend rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Locked`] if another process owns the directory,
    /// or an I/O error if it cannot be created.
    pub fn open(root: &Path) -> StorageResult<Self> {
        fs::create_dir_all(root)?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(root.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked);
        }

        Ok(Self {
            root: root.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lists the tenant namespaces present on disk, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the root directory cannot be read.
    pub fn tenants(&self) -> StorageResult<Vec<String>> {
        let mut tenants = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    tenants.push(name.to_string());
                }
            }
        }
        tenants.sort();
        Ok(tenants)
    }

    fn blob_path(&self, tenant: &str, key: &str) -> StorageResult<PathBuf> {
        validate_segment(tenant)?;
        validate_segment(key)?;
        Ok(self.root.join(tenant).join(key))
    }
}

impl StorageBackend for FileBackend {
    fn load(&self, tenant: &str, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let path = self.blob_path(tenant, key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn store(&self, tenant: &str, key: &str, data: &[u8]) -> StorageResult<()> {
        let path = self.blob_path(tenant, key)?;
        let dir = self.root.join(tenant);
        fs::create_dir_all(&dir)?;

        let temp = dir.join(format!("{TEMP_PREFIX}{key}"));
        let written = (|| -> std::io::Result<()> {
            let mut file = File::create(&temp)?;
            file.write_all(data)?;
            file.sync_all()
        })();

        if let Err(e) = written {
            let _ = fs::remove_file(&temp);
            return Err(e.into());
        }

        fs::rename(&temp, &path)?;
        Ok(())
    }

    fn clear(&self, tenant: &str, key: &str) -> StorageResult<()> {
        let path = self.blob_path(tenant, key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self, tenant: &str) -> StorageResult<Vec<String>> {
        validate_segment(tenant)?;
        let dir = self.root.join(tenant);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with(TEMP_PREFIX) {
                    keys.push(name.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

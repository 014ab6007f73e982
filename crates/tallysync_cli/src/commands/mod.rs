//! CLI command implementations.

pub mod clear;
pub mod compact;
pub mod inspect;
pub mod verify;

use std::path::Path;
use tallysync_core::{Metadata, TenantId, METADATA_KEY};
use tallysync_storage::{FileBackend, StorageBackend};

/// Boxed error returned by every command.
pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Opens an existing store directory.
///
/// Fails if the directory does not exist, so a typo does not create an
/// empty store.
pub fn open_store(path: &Path) -> CliResult<FileBackend> {
    if !path.is_dir() {
        return Err(format!("No store found at {}", path.display()).into());
    }
    Ok(FileBackend::open(path)?)
}

/// Resolves the tenant namespaces a command applies to.
///
/// With an explicit tenant only that namespace is returned; otherwise every
/// namespace present on disk.
pub fn tenant_namespaces(store: &FileBackend, tenant: Option<&str>) -> CliResult<Vec<String>> {
    match tenant {
        Some(name) => Ok(vec![parse_tenant(name)?.namespace().to_string()]),
        None => Ok(store.tenants()?),
    }
}

/// Parses a tenant argument. `_default` names the anonymous tenant.
pub fn parse_tenant(name: &str) -> CliResult<TenantId> {
    if name == tallysync_core::DEFAULT_TENANT_NAMESPACE {
        return Ok(TenantId::anonymous());
    }
    Ok(TenantId::new(name)?)
}

/// Reads the metadata record of a namespace, if one was ever written.
pub fn load_metadata(store: &dyn StorageBackend, namespace: &str) -> CliResult<Option<Metadata>> {
    match store.load(namespace, METADATA_KEY)? {
        Some(bytes) => Ok(Some(Metadata::decode(&bytes)?)),
        None => Ok(None),
    }
}

/// Lists the payload keys of a namespace, skipping internal records.
pub fn payload_keys(store: &dyn StorageBackend, namespace: &str) -> CliResult<Vec<String>> {
    Ok(store
        .keys(namespace)?
        .into_iter()
        .filter(|key| !key.starts_with('_'))
        .collect())
}

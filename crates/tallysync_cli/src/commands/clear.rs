//! Clear command implementation.

use super::{load_metadata, CliResult};
use tallysync_core::METADATA_KEY;
use tallysync_storage::StorageBackend;
use tracing::info;

/// Drops local data of one tenant.
///
/// With a key, only that key's payload and checkpoint go. Its metadata entry
/// is kept, so the next sync sees a missing payload and refetches it from
/// the remote. Without a key the whole namespace is removed, metadata
/// included.
pub fn run(store: &dyn StorageBackend, namespace: &str, key: Option<&str>) -> CliResult<()> {
    match key {
        Some(key) => {
            clear_key(store, namespace, key)?;
            println!("Cleared {namespace}/{key}; it is refetched on the next sync");
        }
        None => {
            let removed = clear_tenant(store, namespace)?;
            println!("Cleared {removed} blobs of tenant {namespace}");
        }
    }
    Ok(())
}

/// Removes one key's payload and its checkpoint.
pub fn clear_key(store: &dyn StorageBackend, namespace: &str, key: &str) -> CliResult<()> {
    if key.starts_with('_') {
        return Err(format!("{key} is an internal record").into());
    }
    store.clear(namespace, key)?;
    if let Some(mut metadata) = load_metadata(store, namespace)? {
        if metadata.checkpoints.remove(key).is_some() {
            store.store(namespace, METADATA_KEY, &metadata.encode()?)?;
        }
    }
    info!(tenant = namespace, key, "cleared key");
    Ok(())
}

/// Removes every blob of a namespace. Returns how many were removed.
pub fn clear_tenant(store: &dyn StorageBackend, namespace: &str) -> CliResult<usize> {
    let keys = store.keys(namespace)?;
    // metadata last, so an interrupted clear still describes what is left
    let (metadata, payloads): (Vec<&String>, Vec<&String>) =
        keys.iter().partition(|key| key.as_str() == METADATA_KEY);
    for key in payloads.iter().chain(metadata.iter()) {
        store.clear(namespace, key)?;
    }
    info!(tenant = namespace, removed = keys.len(), "cleared tenant");
    Ok(keys.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tallysync_core::{Checkpoint, Timestamp};
    use tallysync_storage::InMemoryBackend;
    use tallysync_testkit::prelude::*;

    fn seeded() -> InMemoryBackend {
        let store = InMemoryBackend::new();
        let tenant = TenantId::new("alice").unwrap();
        let at = Timestamp::from_millis(9);
        let entry = seed_local(&store, &tenant, TRANSACTIONS, &key_data(&ledger(2)), at);
        seed_checkpoint(
            &store,
            &tenant,
            TRANSACTIONS,
            Checkpoint {
                at: entry.updated_at,
                hash: entry.hash,
            },
        );
        let budgets = key_data(&[Budget::with_id("b1", "Car", 80)]);
        seed_local(&store, &tenant, BUDGETS, &budgets, at);
        store
    }

    #[test]
    fn clearing_a_key_keeps_its_entry() {
        let store = seeded();
        clear_key(&store, "alice", TRANSACTIONS).unwrap();

        assert!(store.load("alice", TRANSACTIONS).unwrap().is_none());
        let metadata = load_metadata(&store, "alice").unwrap().unwrap();
        assert!(metadata.entry(TRANSACTIONS).is_some());
        assert!(metadata.checkpoint(TRANSACTIONS).is_none());
        assert!(store.load("alice", BUDGETS).unwrap().is_some());
    }

    #[test]
    fn internal_records_cannot_be_cleared_alone() {
        let store = seeded();
        assert!(clear_key(&store, "alice", METADATA_KEY).is_err());
        assert!(load_metadata(&store, "alice").unwrap().is_some());
    }

    #[test]
    fn clearing_a_tenant_removes_everything() {
        let store = seeded();
        store.store("bob", BUDGETS, b"other").unwrap();

        assert_eq!(clear_tenant(&store, "alice").unwrap(), 3);
        assert!(store.keys("alice").unwrap().is_empty());
        assert_eq!(store.keys("bob").unwrap(), vec![BUDGETS]);
    }
}

//! Compact command implementation.

use super::{load_metadata, CliResult};
use tallysync_core::{verify_integrity, EntityKeyData, EntityKeyMetadata, Timestamp, METADATA_KEY};
use tallysync_storage::StorageBackend;
use tracing::debug;

/// Compaction statistics for one tenant namespace.
#[derive(Debug, Default)]
pub struct CompactStats {
    /// Keys with a checkpoint, eligible for compaction.
    pub keys_scanned: usize,
    /// Keys that had tombstones to drop.
    pub keys_compacted: usize,
    /// Tombstones dropped (or droppable, on a dry run).
    pub tombstones_removed: usize,
    /// Keys left alone because their payload failed verification.
    pub skipped: Vec<String>,
}

/// Runs the compact command.
pub fn run(store: &dyn StorageBackend, namespaces: &[String], dry_run: bool) -> CliResult<()> {
    if dry_run {
        println!("(dry run - no changes will be made)");
    }
    for namespace in namespaces {
        let stats = compact_tenant(store, namespace, dry_run)?;
        println!("Tenant {namespace}:");
        println!("  Keys scanned:       {}", stats.keys_scanned);
        println!("  Keys compacted:     {}", stats.keys_compacted);
        println!(
            "  Tombstones:         {} ({})",
            stats.tombstones_removed,
            if dry_run { "would be removed" } else { "removed" }
        );
        for key in &stats.skipped {
            println!("  ✗ {key}: failed verification, skipped");
        }
    }
    Ok(())
}

/// Drops tombstones at or before each key's last sync checkpoint.
///
/// Keys without a checkpoint have never been reconciled and are left alone:
/// their tombstones may not have reached the remote yet.
pub fn compact_tenant(store: &dyn StorageBackend, namespace: &str, dry_run: bool) -> CliResult<CompactStats> {
    let mut stats = CompactStats::default();
    let Some(mut metadata) = load_metadata(store, namespace)? else {
        return Ok(stats);
    };

    let checkpoints: Vec<(String, Timestamp)> = metadata
        .checkpoints
        .iter()
        .map(|(key, checkpoint)| (key.clone(), checkpoint.at))
        .collect();

    for (key, horizon) in checkpoints {
        let Some(entry) = metadata.entry(&key).cloned() else {
            continue;
        };
        let Some(bytes) = store.load(namespace, &key)? else {
            continue;
        };
        stats.keys_scanned += 1;

        let verified = EntityKeyData::decode(&bytes).and_then(|data| {
            verify_integrity(&key, &entry, &data)?;
            Ok(data)
        });
        let mut data = match verified {
            Ok(data) => data,
            Err(err) => {
                debug!(tenant = namespace, key = %key, error = %err, "skipping unverifiable key");
                stats.skipped.push(key);
                continue;
            }
        };

        let removed = data.compact(horizon);
        if removed == 0 {
            continue;
        }
        stats.keys_compacted += 1;
        stats.tombstones_removed += removed;
        if dry_run {
            continue;
        }

        // payload first; a crash before the metadata write reads as corruption
        // and is healed by the next sync
        store.store(namespace, &key, &data.encode()?)?;
        let updated_at = Timestamp::now_after(entry.updated_at);
        metadata.set_entry(&key, EntityKeyMetadata::describe(&data, updated_at));
        store.store(namespace, METADATA_KEY, &metadata.encode()?)?;
        debug!(tenant = namespace, key = %key, removed, "compacted");
    }
    Ok(stats)
}

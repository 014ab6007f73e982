//! Inspect command implementation.

use super::{load_metadata, payload_keys, CliResult};
use serde::Serialize;
use std::collections::BTreeMap;
use tallysync_core::EntityCounts;
use tallysync_storage::StorageBackend;

/// Inspection result for one tenant namespace.
#[derive(Debug, Serialize)]
pub struct TenantReport {
    /// Storage namespace.
    pub namespace: String,
    /// Whether a metadata record exists.
    pub has_metadata: bool,
    /// One row per known key.
    pub keys: Vec<KeyRow>,
}

/// Metadata summary of one key.
#[derive(Debug, Serialize)]
pub struct KeyRow {
    /// Entity key.
    pub key: String,
    /// Last local mutation, in epoch milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<u64>,
    /// Content fingerprint, hex.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    /// Counts per entity name.
    pub entities: BTreeMap<String, EntityCounts>,
    /// Last reconciliation checkpoint, in epoch milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<u64>,
    /// Size of the persisted payload in bytes.
    pub payload_bytes: usize,
}

/// Runs the inspect command.
pub fn run(store: &dyn StorageBackend, namespaces: &[String], format: &str) -> CliResult<()> {
    let reports = namespaces
        .iter()
        .map(|namespace| inspect_tenant(store, namespace))
        .collect::<CliResult<Vec<_>>>()?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&reports)?),
        _ => print_text_output(&reports),
    }
    Ok(())
}

/// Collects the metadata table of one namespace.
///
/// Keys with a payload but no metadata entry are listed without a hash.
pub fn inspect_tenant(store: &dyn StorageBackend, namespace: &str) -> CliResult<TenantReport> {
    let metadata = load_metadata(store, namespace)?;
    let mut names: Vec<String> = payload_keys(store, namespace)?;
    if let Some(metadata) = &metadata {
        names.extend(metadata.keys.keys().cloned());
    }
    names.sort();
    names.dedup();

    let mut keys = Vec::with_capacity(names.len());
    for key in names {
        let entry = metadata.as_ref().and_then(|m| m.entry(&key));
        let checkpoint = metadata.as_ref().and_then(|m| m.checkpoint(&key));
        let payload_bytes = store.load(namespace, &key)?.map_or(0, |bytes| bytes.len());
        keys.push(KeyRow {
            updated_at: entry.map(|e| e.updated_at.as_millis()),
            hash: entry.map(|e| format!("{:016x}", e.hash)),
            entities: entry.map(|e| e.entities.clone()).unwrap_or_default(),
            checkpoint: checkpoint.map(|c| c.at.as_millis()),
            payload_bytes,
            key,
        });
    }

    Ok(TenantReport {
        namespace: namespace.to_string(),
        has_metadata: metadata.is_some(),
        keys,
    })
}

fn print_text_output(reports: &[TenantReport]) {
    if reports.is_empty() {
        println!("No tenants found");
        return;
    }

    for report in reports {
        println!("Tenant {}", report.namespace);
        if !report.has_metadata {
            println!("  (no metadata record)");
        }
        println!(
            "  {:<20} {:>16} {:>15} {:>8} {:>8} {:>15} {:>10}",
            "KEY", "HASH", "UPDATED", "LIVE", "DELETED", "CHECKPOINT", "BYTES"
        );
        for row in &report.keys {
            let live: u64 = row.entities.values().map(|c| c.count).sum();
            let deleted: u64 = row.entities.values().map(|c| c.deleted_count).sum();
            println!(
                "  {:<20} {:>16} {:>15} {:>8} {:>8} {:>15} {:>10}",
                row.key,
                row.hash.as_deref().unwrap_or("-"),
                row.updated_at.map_or_else(|| "-".to_string(), |t| t.to_string()),
                live,
                deleted,
                row.checkpoint.map_or_else(|| "-".to_string(), |t| t.to_string()),
                row.payload_bytes
            );
        }
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tallysync_core::{Checkpoint, Timestamp};
    use tallysync_storage::InMemoryBackend;
    use tallysync_testkit::prelude::*;

    #[test]
    fn rows_merge_metadata_and_payloads() {
        let store = InMemoryBackend::new();
        let tenant = TenantId::new("alice").unwrap();
        let entry = seed_local(
            &store,
            &tenant,
            TRANSACTIONS,
            &key_data(&ledger(3)),
            Timestamp::from_millis(40),
        );
        seed_checkpoint(
            &store,
            &tenant,
            TRANSACTIONS,
            Checkpoint {
                at: Timestamp::from_millis(40),
                hash: entry.hash,
            },
        );
        // payload written without metadata
        store.store("alice", BUDGETS, b"orphan").unwrap();

        let report = inspect_tenant(&store, "alice").unwrap();
        assert!(report.has_metadata);
        assert_eq!(report.keys.len(), 2);

        let budgets = &report.keys[0];
        assert_eq!(budgets.key, BUDGETS);
        assert!(budgets.hash.is_none());
        assert_eq!(budgets.payload_bytes, 6);

        let transactions = &report.keys[1];
        assert_eq!(transactions.updated_at, Some(40));
        assert_eq!(transactions.checkpoint, Some(40));
        assert_eq!(transactions.entities["transaction"].count, 3);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["keys"][1]["hash"], format!("{:016x}", entry.hash));
    }
}

//! Persistence round-trip properties across backends.

use proptest::prelude::*;
use tallysync_core::{compute_hash, EntityKeyData};
use tallysync_storage::{FileBackend, InMemoryBackend, MemoryRemote, RemoteBackend, StorageBackend};
use tallysync_testkit::prelude::*;

fn round_trip(backend: &dyn StorageBackend, data: &EntityKeyData) -> EntityKeyData {
    backend
        .store("alice", TRANSACTIONS, &data.encode().unwrap())
        .unwrap();
    let bytes = backend.load("alice", TRANSACTIONS).unwrap().unwrap();
    EntityKeyData::decode(&bytes).unwrap()
}

fn remote_round_trip(remote: &MemoryRemote, data: &EntityKeyData) -> EntityKeyData {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let bytes = runtime.block_on(async {
        remote.store("alice", TRANSACTIONS, data.encode().unwrap()).await.unwrap();
        remote.load("alice", TRANSACTIONS).await.unwrap().unwrap()
    });
    EntityKeyData::decode(&bytes).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn remote_transfer_preserves_hash(data in key_data_strategy(24)) {
        let remote = MemoryRemote::new();
        let loaded = remote_round_trip(&remote, &data);
        prop_assert_eq!(compute_hash(&loaded), compute_hash(&data));
        prop_assert_eq!(loaded, data);

        let stats = remote.call_stats();
        prop_assert_eq!((stats.loads, stats.stores), (1, 1));
    }

    #[test]
    fn memory_backend_preserves_hash(data in key_data_strategy(24)) {
        let backend = InMemoryBackend::new();
        let loaded = round_trip(&backend, &data);
        prop_assert_eq!(compute_hash(&loaded), compute_hash(&data));
        prop_assert_eq!(loaded, data);
    }

    #[test]
    fn file_backend_preserves_hash(data in key_data_strategy(24)) {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();
        let loaded = round_trip(&backend, &data);
        prop_assert_eq!(compute_hash(&loaded), compute_hash(&data));
    }

    #[test]
    fn overwrite_keeps_only_latest(first in key_data_strategy(8), second in key_data_strategy(8)) {
        let backend = InMemoryBackend::new();
        round_trip(&backend, &first);
        let loaded = round_trip(&backend, &second);
        prop_assert_eq!(compute_hash(&loaded), compute_hash(&second));
    }
}

#[test]
fn remote_seed_and_peek_are_byte_exact() {
    let remote = MemoryRemote::new();
    let data = key_data(&ledger(5));
    let bytes = data.encode().unwrap();
    remote.seed("alice", TRANSACTIONS, bytes.clone());

    assert_eq!(remote.peek("alice", TRANSACTIONS), Some(bytes));
    assert_eq!(remote.call_stats().loads, 0);
}

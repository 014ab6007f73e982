//! Local-path tests: repository surface, integrity, compaction, isolation.

use std::sync::Arc;
use std::time::Duration;
use tallysync_core::{CoreError, EntityKey, TenantId, Timestamp};
use tallysync_engine::{
    ChangeOrigin, ChangeType, KeySyncState, Repository, SyncConfig, SyncError, SyncOrchestrator, SyncOutcome,
};
use tallysync_storage::{MemoryRemote, StorageBackend};
use tallysync_testkit::prelude::*;

fn ts(millis: u64) -> Timestamp {
    Timestamp::from_millis(millis)
}

fn transactions() -> EntityKey {
    EntityKey::new(TRANSACTIONS).unwrap()
}

fn open(stores: &TestStores, tenant: &TenantId) -> Arc<SyncOrchestrator> {
    open_over(stores.local.clone(), stores.remote.clone(), tenant, SyncConfig::default())
}

fn open_over(
    local: Arc<dyn StorageBackend>,
    remote: Arc<MemoryRemote>,
    tenant: &TenantId,
    config: SyncConfig,
) -> Arc<SyncOrchestrator> {
    Arc::new(SyncOrchestrator::open(tenant.clone(), config, Arc::new(finance_registry()), local, remote).unwrap())
}

#[test]
fn repository_crud() {
    let stores = TestStores::memory();
    let orchestrator = open(&stores, &TenantId::anonymous());
    let accounts = Repository::<Account>::new(orchestrator.clone()).unwrap();

    let checking = Account::with_id("a1", "Checking", "EUR");
    assert!(accounts.put(&checking).unwrap());
    assert!(!accounts.put(&checking).unwrap(), "identical put is a no-op");
    accounts.put(&Account::with_id("a2", "Savings", "EUR")).unwrap();

    assert_eq!(accounts.get("a1").unwrap(), Some(checking));
    assert_eq!(accounts.get("missing").unwrap(), None);
    assert_eq!(accounts.ids().unwrap(), vec!["a1", "a2"]);
    assert_eq!(accounts.list().unwrap().len(), 2);

    assert!(accounts.delete("a1").unwrap());
    assert!(!accounts.delete("a1").unwrap());
    assert!(!accounts.delete("never").unwrap());
    assert_eq!(accounts.get("a1").unwrap(), None);

    let counts = accounts.summary();
    assert_eq!(counts.count, 1);
    assert_eq!(counts.deleted_count, 1);
    assert_eq!(accounts.key_state(), KeySyncState::Unsynced);

    // the null tenant lives under the reserved namespace
    assert!(stores.local.load("_default", ACCOUNTS).unwrap().is_some());
}

#[test]
fn deleted_ids_cannot_be_reused() {
    let stores = TestStores::memory();
    let orchestrator = open(&stores, &TenantId::new("alice").unwrap());
    let accounts = Repository::<Account>::new(orchestrator.clone()).unwrap();

    accounts.put(&Account::with_id("a1", "Cash", "USD")).unwrap();
    accounts.delete("a1").unwrap();
    let before = orchestrator.summary(accounts.key()).unwrap();

    let err = accounts.put(&Account::with_id("a1", "Cash again", "USD")).unwrap_err();
    assert!(matches!(err, SyncError::Core(CoreError::Deleted { ref id, .. }) if id == "a1"));

    // the refused put left payload and metadata alone
    assert_eq!(accounts.get("a1").unwrap(), None);
    assert_eq!(accounts.summary().deleted_count, 1);
    assert_eq!(orchestrator.summary(accounts.key()), Some(before));
}

#[test]
fn every_write_bumps_metadata() {
    let stores = TestStores::memory();
    let orchestrator = open(&stores, &TenantId::new("alice").unwrap());
    let budgets = Repository::<Budget>::new(orchestrator.clone()).unwrap();
    let key = EntityKey::new(BUDGETS).unwrap();

    budgets.put(&Budget::with_id("b1", "Food", 100)).unwrap();
    let first = orchestrator.summary(&key).unwrap();
    budgets.put(&Budget::with_id("b1", "Food", 200)).unwrap();
    let second = orchestrator.summary(&key).unwrap();
    budgets.delete("b1").unwrap();
    let third = orchestrator.summary(&key).unwrap();

    assert!(first.updated_at < second.updated_at);
    assert!(second.updated_at < third.updated_at);
    assert_ne!(first.hash, second.hash);
    assert_eq!(third.live_count(), 0);
    // an emptied key keeps its entry
    assert_eq!(third.deleted_count(), 1);
}

#[test]
fn invalid_entities_are_rejected() {
    let stores = TestStores::memory();
    let orchestrator = open(&stores, &TenantId::anonymous());
    let transactions = Repository::<Transaction>::new(orchestrator.clone()).unwrap();

    let err = transactions.put(&Transaction::with_id("t1", "acc-1", 0)).unwrap_err();
    assert!(matches!(err, SyncError::Core(CoreError::Validation(_))));
    assert!(orchestrator.summary(&transactions.key().clone()).is_none());
}

#[test]
fn unregistered_entity_has_no_repository() {
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    struct Split {
        id: String,
    }

    impl tallysync_core::Entity for Split {
        const NAME: &'static str = "split";

        fn id(&self) -> &str {
            &self.id
        }
    }

    let stores = TestStores::memory();
    let orchestrator = open(&stores, &TenantId::anonymous());
    let err = Repository::<Split>::new(orchestrator).unwrap_err();
    assert!(matches!(err, SyncError::Core(CoreError::EntityNotRegistered { .. })));
}

#[tokio::test]
async fn observe_before_create_and_after_delete() {
    let stores = TestStores::memory();
    let orchestrator = open(&stores, &TenantId::anonymous());
    let budgets = Repository::<Budget>::new(orchestrator).unwrap();

    let mut observer = budgets.observe("b1").unwrap();
    assert_eq!(observer.current().unwrap(), None);

    budgets.put(&Budget::with_id("b1", "Rent", 900)).unwrap();
    let created = observer.changed().await.unwrap().unwrap();
    assert_eq!(created.monthly_limit, 900);

    budgets.delete("b1").unwrap();
    assert_eq!(observer.changed().await.unwrap(), None);

    // several observers of one id share the value
    let other = budgets.observe("b1").unwrap();
    assert_eq!(other.current().unwrap(), None);
    assert_eq!(other.id(), "b1");
}

#[test]
fn change_feed_reports_local_writes() {
    let stores = TestStores::memory();
    let orchestrator = open(&stores, &TenantId::anonymous());
    let feed = orchestrator.subscribe();
    let accounts = Repository::<Account>::new(orchestrator.clone()).unwrap();

    accounts.put(&Account::with_id("a1", "Cash", "USD")).unwrap();
    accounts.put(&Account::with_id("a1", "Wallet", "USD")).unwrap();
    accounts.delete("a1").unwrap();

    let kinds: Vec<ChangeType> = (0..3)
        .map(|_| feed.recv_timeout(Duration::from_millis(100)).unwrap())
        .inspect(|event| {
            assert_eq!(event.origin, ChangeOrigin::Local);
            assert_eq!(event.id, "a1");
        })
        .map(|event| event.change_type)
        .collect();
    assert_eq!(kinds, vec![ChangeType::Insert, ChangeType::Update, ChangeType::Delete]);
}

#[test]
fn failed_metadata_write_rolls_back_payload() {
    let flaky = Arc::new(FlakyBackend::new());
    let remote = Arc::new(MemoryRemote::new());
    let tenant = TenantId::new("alice").unwrap();
    let orchestrator = open_over(flaky.clone(), remote, &tenant, SyncConfig::default());
    let repo = Repository::<Transaction>::new(orchestrator.clone()).unwrap();
    repo.put(&Transaction::with_id("t1", "acc-1", 10)).unwrap();

    flaky.fail_stores_to(tallysync_core::METADATA_KEY);
    let err = repo.put(&Transaction::with_id("t2", "acc-1", 20)).unwrap_err();
    assert!(matches!(err, SyncError::Local(_)));

    // neither the cache nor the persisted payload moved
    assert_eq!(repo.ids().unwrap(), vec!["t1"]);
    let persisted = flaky.load("alice", TRANSACTIONS).unwrap().unwrap();
    assert_eq!(
        tallysync_core::EntityKeyData::decode(&persisted).unwrap(),
        key_data(&[Transaction::with_id("t1", "acc-1", 10)])
    );

    flaky.heal();
    repo.put(&Transaction::with_id("t2", "acc-1", 20)).unwrap();
    assert_eq!(orchestrator.summary(&transactions()).unwrap().live_count(), 2);
}

#[test]
fn cache_survives_reopen_over_files() {
    let stores = TestStores::file();
    let tenant = TenantId::new("alice").unwrap();
    {
        let orchestrator = open(&stores, &tenant);
        let repo = Repository::<Transaction>::new(orchestrator).unwrap();
        for tx in ledger(4) {
            repo.put(&tx).unwrap();
        }
    }

    let orchestrator = open(&stores, &tenant);
    assert!(orchestrator.verify_local().unwrap().is_empty());
    let repo = Repository::<Transaction>::new(orchestrator).unwrap();
    assert_eq!(repo.list().unwrap(), ledger(4));
}

#[tokio::test]
async fn local_corruption_forces_refetch() {
    let stores = TestStores::memory();
    let tenant = TenantId::new("alice").unwrap();
    seed_local(&*stores.local, &tenant, TRANSACTIONS, &key_data(&ledger(3)), ts(50));
    // payload no longer matches its metadata entry
    let damaged = key_data(&ledger(2)).encode().unwrap();
    stores.local.store("alice", TRANSACTIONS, &damaged).unwrap();
    // remote is older, but verifiable
    seed_remote(&stores.remote, &tenant, TRANSACTIONS, &key_data(&ledger(3)), ts(10));

    let orchestrator = open(&stores, &tenant);
    assert_eq!(orchestrator.verify_local().unwrap(), vec![transactions()]);

    let report = orchestrator.sync_key(&transactions()).await.unwrap();
    assert!(matches!(report.outcome, SyncOutcome::Pulled { .. }));
    assert_eq!(report.state, KeySyncState::Synced);

    let repo = Repository::<Transaction>::new(orchestrator.clone()).unwrap();
    assert_eq!(repo.list().unwrap(), ledger(3));
}

#[tokio::test]
async fn unreadable_local_payload_is_refetched() {
    let stores = TestStores::memory();
    let tenant = TenantId::new("alice").unwrap();
    seed_local(&*stores.local, &tenant, TRANSACTIONS, &key_data(&ledger(2)), ts(50));
    stores.local.store("alice", TRANSACTIONS, b"not cbor").unwrap();
    seed_remote(&stores.remote, &tenant, TRANSACTIONS, &key_data(&ledger(2)), ts(50));

    let orchestrator = open(&stores, &tenant);
    let repo = Repository::<Transaction>::new(orchestrator.clone()).unwrap();
    // served empty rather than failing the read
    assert!(repo.list().unwrap().is_empty());

    orchestrator.sync_key(&transactions()).await.unwrap();
    assert_eq!(repo.list().unwrap(), ledger(2));
}

#[tokio::test]
async fn corrupt_local_without_remote_rebuilds_metadata() {
    let stores = TestStores::memory();
    let tenant = TenantId::new("alice").unwrap();
    seed_local(&*stores.local, &tenant, TRANSACTIONS, &key_data(&ledger(3)), ts(50));
    let damaged = key_data(&ledger(2)).encode().unwrap();
    stores.local.store("alice", TRANSACTIONS, &damaged).unwrap();

    let orchestrator = open(&stores, &tenant);
    let report = orchestrator.sync_key(&transactions()).await.unwrap();

    assert_eq!(report.outcome, SyncOutcome::Pushed);
    let entry = orchestrator.summary(&transactions()).unwrap();
    assert_eq!(entry.live_count(), 2);
    assert!(entry.updated_at > ts(50));
    assert_eq!(remote_data(&stores.remote, &tenant, TRANSACTIONS).unwrap().len(), 2);
}

#[tokio::test]
async fn remote_corruption_pushes_local_instead() {
    let stores = TestStores::memory();
    let tenant = TenantId::new("alice").unwrap();
    seed_local(&*stores.local, &tenant, TRANSACTIONS, &key_data(&ledger(3)), ts(10));
    seed_remote(&stores.remote, &tenant, TRANSACTIONS, &key_data(&ledger(5)), ts(20));
    // remote payload silently lost two records
    stores
        .remote
        .seed("alice", TRANSACTIONS, key_data(&ledger(3)).encode().unwrap());

    let orchestrator = open(&stores, &tenant);
    let report = orchestrator.sync_key(&transactions()).await.unwrap();

    assert_eq!(report.outcome, SyncOutcome::Pushed);
    let rejected = report.remote_corruption.expect("remote rejection is reported");
    assert!(rejected.contains(TRANSACTIONS), "{rejected}");
    let remote = remote_metadata(&stores.remote, &tenant).unwrap();
    assert_eq!(remote.entry(TRANSACTIONS), orchestrator.summary(&transactions()).as_ref());
    assert_eq!(orchestrator.stats().quarantined, 1);
}

#[tokio::test]
async fn count_mismatch_forces_pull() {
    let stores = TestStores::memory();
    let tenant = TenantId::new("alice").unwrap();
    let data = key_data(&ledger(2));
    let mut local_entry = seed_local(&*stores.local, &tenant, TRANSACTIONS, &data, ts(90));
    seed_remote(&stores.remote, &tenant, TRANSACTIONS, &data, ts(10));

    // same hash, different counts: the local entry is lying
    local_entry.entities.get_mut("transaction").unwrap().deleted_count = 7;
    let mut metadata = local_metadata(&*stores.local, &tenant).unwrap();
    metadata.set_entry(TRANSACTIONS, local_entry);
    stores
        .local
        .store("alice", tallysync_core::METADATA_KEY, &metadata.encode().unwrap())
        .unwrap();

    let orchestrator = open(&stores, &tenant);
    let report = orchestrator.sync_key(&transactions()).await.unwrap();

    assert!(matches!(report.outcome, SyncOutcome::Pulled { changed: 0 }));
    assert_eq!(orchestrator.summary(&transactions()).unwrap().deleted_count(), 0);
}

#[tokio::test]
async fn compaction_drops_synced_tombstones() {
    let stores = TestStores::memory();
    let tenant = TenantId::new("alice").unwrap();
    let orchestrator = open(&stores, &tenant);
    let repo = Repository::<Transaction>::new(orchestrator.clone()).unwrap();
    let key = transactions();

    repo.put(&Transaction::with_id("t1", "acc-1", 5)).unwrap();
    repo.put(&Transaction::with_id("t2", "acc-1", 6)).unwrap();
    repo.delete("t1").unwrap();
    // nothing is known to be shared yet
    assert_eq!(orchestrator.compact(&key).unwrap(), 0);

    repo.flush().await.unwrap();
    assert_eq!(repo.summary().deleted_count, 1);

    assert_eq!(orchestrator.compact(&key).unwrap(), 1);
    assert_eq!(repo.summary().deleted_count, 0);
    assert_eq!(repo.summary().count, 1);
    assert_eq!(repo.key_state(), KeySyncState::Unsynced);

    repo.flush().await.unwrap();
    assert_eq!(remote_data(&stores.remote, &tenant, TRANSACTIONS).unwrap().len(), 1);
}

#[tokio::test]
async fn compact_on_sync_runs_after_settling() {
    let stores = TestStores::memory();
    let tenant = TenantId::new("alice").unwrap();
    let config = SyncConfig::default().with_compact_on_sync(true);
    let orchestrator = open_over(stores.local.clone(), stores.remote.clone(), &tenant, config);
    let repo = Repository::<Budget>::new(orchestrator.clone()).unwrap();

    repo.put(&Budget::with_id("b1", "Fun", 50)).unwrap();
    repo.delete("b1").unwrap();
    repo.flush().await.unwrap();

    assert_eq!(repo.summary().deleted_count, 0);
}

#[tokio::test]
async fn tenants_are_isolated() {
    let stores = TestStores::memory();
    let alice = open(&stores, &TenantId::new("alice").unwrap());
    let bob = open(&stores, &TenantId::new("bob").unwrap());
    let anonymous = open(&stores, &TenantId::anonymous());

    let alice_accounts = Repository::<Account>::new(alice.clone()).unwrap();
    alice_accounts.put(&Account::with_id("a1", "Alice", "EUR")).unwrap();
    alice_accounts.flush().await.unwrap();

    let bob_accounts = Repository::<Account>::new(bob.clone()).unwrap();
    bob_accounts.flush().await.unwrap();
    assert_eq!(bob_accounts.get("a1").unwrap(), None);
    assert!(Repository::<Account>::new(anonymous).unwrap().ids().unwrap().is_empty());

    assert!(stores.remote.peek("alice", ACCOUNTS).is_some());
    assert!(stores.remote.peek("bob", ACCOUNTS).is_none());
    assert!(stores.remote.peek("_default", ACCOUNTS).is_none());
}

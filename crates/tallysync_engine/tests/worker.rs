//! Background worker tests, driven through `TenantContext`.

use std::future::Future;
use std::time::Duration;
use tallysync_engine::{KeySyncState, RetryConfig, SyncConfig, TenantContext};
use tallysync_testkit::prelude::*;

const DEADLINE: Duration = Duration::from_secs(5);

async fn eventually<F: FnMut() -> bool>(what: &str, mut check: F) {
    let polled = tokio::time::timeout(DEADLINE, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "timed out waiting for {what}");
}

async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(DEADLINE, future).await.expect("future timed out")
}

fn fast_retry() -> SyncConfig {
    SyncConfig::default().with_retry(
        RetryConfig::new(100)
            .with_initial_delay(Duration::from_millis(5))
            .with_max_delay(Duration::from_millis(20))
            .with_jitter(false),
    )
}

fn context(stores: &TestStores, tenant: &TenantId, config: SyncConfig) -> TenantContext {
    TenantContext::builder(tenant.clone(), finance_registry())
        .with_config(config)
        .open(stores.local.clone(), stores.remote.clone())
        .unwrap()
}

#[tokio::test]
async fn writes_are_pushed_in_background() {
    let stores = TestStores::memory();
    let tenant = TenantId::new("alice").unwrap();
    let ctx = context(&stores, &tenant, SyncConfig::default());
    assert!(ctx.has_worker());

    let repo = ctx.repository::<Transaction>().unwrap();
    for tx in ledger(3) {
        repo.put(&tx).unwrap();
    }

    eventually("remote payload", || {
        remote_data(&stores.remote, &tenant, TRANSACTIONS).is_some_and(|data| data.len() == 3)
    })
    .await;
    eventually("synced state", || repo.key_state() == KeySyncState::Synced).await;

    ctx.shutdown().await;
}

#[tokio::test]
async fn offline_key_retries_until_remote_returns() {
    let stores = TestStores::memory();
    let tenant = TenantId::new("alice").unwrap();
    stores.remote.set_online(false);
    let ctx = context(&stores, &tenant, fast_retry());
    let repo = ctx.repository::<Budget>().unwrap();

    let observer = repo.observe("b1").unwrap();
    repo.put(&Budget::with_id("b1", "Travel", 300)).unwrap();
    eventually("offline state", || repo.key_state() == KeySyncState::OfflineDegraded).await;

    // local reads, writes and observers keep working while degraded
    repo.put(&Budget::with_id("b2", "Gifts", 40)).unwrap();
    repo.put(&Budget::with_id("b1", "Travel", 350)).unwrap();
    assert_eq!(repo.ids().unwrap(), vec!["b1", "b2"]);
    assert_eq!(observer.current().unwrap().map(|b| b.monthly_limit), Some(350));

    stores.remote.set_online(true);
    eventually("recovered push", || {
        remote_data(&stores.remote, &tenant, BUDGETS).is_some_and(|data| data.len() == 2)
    })
    .await;
    eventually("synced state", || repo.key_state() == KeySyncState::Synced).await;
    assert_eq!(observer.current().unwrap().map(|b| b.monthly_limit), Some(350));
    assert!(ctx.orchestrator().stats().retries > 0);

    ctx.shutdown().await;
}

#[tokio::test]
async fn outage_longer_than_backoff_still_pushes() {
    let stores = TestStores::memory();
    let tenant = TenantId::new("alice").unwrap();
    stores.remote.set_online(false);
    // 5 + 10 ms of growing backoff, then a 40 ms poll
    let config = SyncConfig::default().with_retry(
        RetryConfig::new(2)
            .with_initial_delay(Duration::from_millis(5))
            .with_max_delay(Duration::from_millis(40))
            .with_jitter(false),
    );
    let ctx = context(&stores, &tenant, config);
    let repo = ctx.repository::<Budget>().unwrap();

    repo.put(&Budget::with_id("b1", "Rent", 900)).unwrap();
    eventually("backoff exhausted", || ctx.orchestrator().stats().retries > 4).await;
    assert!(stores.remote.peek("alice", BUDGETS).is_none());

    stores.remote.set_online(true);
    eventually("pushed after the outage", || {
        remote_data(&stores.remote, &tenant, BUDGETS).is_some_and(|data| data.len() == 1)
    })
    .await;
    eventually("synced state", || repo.key_state() == KeySyncState::Synced).await;

    ctx.shutdown().await;
}

#[tokio::test]
async fn keys_wait_for_login() {
    let stores = TestStores::memory().requiring_auth();
    let tenant = TenantId::new("alice").unwrap();
    let ctx = TenantContext::builder(tenant.clone(), finance_registry())
        .with_authenticator(stores.remote.clone())
        .open(stores.local.clone(), stores.remote.clone())
        .unwrap();
    let repo = ctx.repository::<Account>().unwrap();

    repo.put(&Account::with_id("a1", "Main", "GBP")).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(stores.remote.call_stats().loads, 0);
    assert_ne!(repo.key_state(), KeySyncState::Synced);

    within(ctx.login()).await.unwrap();
    eventually("pushed after login", || stores.remote.peek("alice", ACCOUNTS).is_some()).await;

    ctx.shutdown().await;
}

#[tokio::test]
async fn interval_picks_up_remote_changes() {
    let stores = TestStores::memory();
    let tenant = TenantId::new("alice").unwrap();
    let config = SyncConfig::default().with_sync_interval(Duration::from_millis(20));
    let ctx = context(&stores, &tenant, config);
    let repo = ctx.repository::<Transaction>().unwrap();
    let mut observer = repo.observe("t2").unwrap();

    // another device writes after this context settled
    eventually("initial round", || repo.key_state() == KeySyncState::Synced).await;
    seed_remote(&stores.remote, &tenant, TRANSACTIONS, &key_data(&ledger(2)), Timestamp::now());

    let pulled = within(observer.changed()).await.unwrap();
    assert_eq!(pulled.map(|tx| tx.amount), Some(200));
    assert_eq!(repo.list().unwrap(), ledger(2));

    ctx.shutdown().await;
}

#[tokio::test]
async fn context_without_worker_syncs_on_demand() {
    let stores = TestStores::memory();
    let tenant = TenantId::anonymous();
    let ctx = TenantContext::builder(tenant.clone(), finance_registry())
        .with_background_sync(false)
        .open(stores.local.clone(), stores.remote.clone())
        .unwrap();
    assert!(!ctx.has_worker());

    let repo = ctx.repository::<Account>().unwrap();
    repo.put(&Account::with_id("a1", "Shared", "CHF")).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(stores.remote.peek("_default", ACCOUNTS).is_none());

    let reports = ctx.sync_all().await.unwrap();
    assert_eq!(reports.len(), 3);
    assert!(stores.remote.peek("_default", ACCOUNTS).is_some());

    ctx.shutdown().await;
}

#[test]
fn context_outside_runtime_has_no_worker() {
    let stores = TestStores::memory();
    let ctx = context(&stores, &TenantId::new("bob").unwrap(), SyncConfig::default());
    assert!(!ctx.has_worker());

    let repo = ctx.repository::<Account>().unwrap();
    assert!(repo.put(&Account::with_id("a1", "Offline", "EUR")).unwrap());
    assert_eq!(repo.key_state(), KeySyncState::Unsynced);
}

#[tokio::test]
async fn shutdown_reopen_keeps_local_data() {
    let stores = TestStores::file();
    let tenant = TenantId::new("carol").unwrap();
    stores.remote.set_online(false);

    let ctx = context(&stores, &tenant, SyncConfig::default());
    ctx.repository::<Budget>()
        .unwrap()
        .put(&Budget::with_id("b1", "Books", 25))
        .unwrap();
    ctx.shutdown().await;

    stores.remote.set_online(true);
    let ctx = context(&stores, &tenant, fast_retry());
    let repo = ctx.repository::<Budget>().unwrap();
    assert_eq!(repo.get("b1").unwrap().map(|b| b.monthly_limit), Some(25));
    eventually("pushed after reopen", || stores.remote.peek("carol", BUDGETS).is_some()).await;

    ctx.shutdown().await;
}

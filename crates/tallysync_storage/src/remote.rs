//! Remote backend contract and a simulated remote for tests.
//!
//! The remote side is higher latency, may need an out-of-band login before
//! any call succeeds, and may drop off the network at any time. Every method
//! is therefore async and independently failable.

use crate::backend::{storage_path, validate_segment};
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// An asynchronous blob store reachable over a network.
///
/// Same semantics as [`crate::StorageBackend`], plus two failure modes
/// that callers must keep apart from "not found":
/// [`StorageError::Unavailable`] and [`StorageError::AuthRequired`].
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Loads the blob stored at `{tenant}/{key}`.
    async fn load(&self, tenant: &str, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Replaces the blob stored at `{tenant}/{key}`.
    async fn store(&self, tenant: &str, key: &str, data: Vec<u8>) -> StorageResult<()>;

    /// Removes the blob stored at `{tenant}/{key}`. Idempotent.
    async fn clear(&self, tenant: &str, key: &str) -> StorageResult<()>;

    /// Short name used in log lines.
    fn name(&self) -> &str {
        "remote"
    }
}

/// Authentication collaborator for a remote backend.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Runs the login flow. Suspends until the user completes it.
    async fn login(&self) -> StorageResult<()>;

    /// Returns true once a login has succeeded.
    fn is_authenticated(&self) -> bool;
}

/// Per-operation call counters of a [`MemoryRemote`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoteCallStats {
    /// Number of `load` calls that reached the store.
    pub loads: u64,
    /// Number of `store` calls that reached the store.
    pub stores: u64,
    /// Number of `clear` calls that reached the store.
    pub clears: u64,
}

/// A remote backend simulated in memory.
///
/// Behaves like a cloud blob store and adds switches for the failure modes
/// the engine has to survive:
/// - [`MemoryRemote::set_online`] toggles [`StorageError::Unavailable`]
/// - [`MemoryRemote::requiring_auth`] makes every call fail with
///   [`StorageError::AuthRequired`] until [`Authenticator::login`] runs
/// - [`MemoryRemote::pause`] parks calls until the returned gate is opened
/// - [`MemoryRemote::with_latency`] delays every call
#[derive(Debug)]
pub struct MemoryRemote {
    blobs: RwLock<BTreeMap<String, Vec<u8>>>,
    online: AtomicBool,
    requires_auth: bool,
    authenticated: AtomicBool,
    latency: Option<Duration>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    waiting: AtomicUsize,
    loads: AtomicU64,
    stores: AtomicU64,
    clears: AtomicU64,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    /// Creates an online remote that needs no login.
    #[must_use]
    pub fn new() -> Self {
        Self {
            blobs: RwLock::new(BTreeMap::new()),
            online: AtomicBool::new(true),
            requires_auth: false,
            authenticated: AtomicBool::new(true),
            latency: None,
            gate: Mutex::new(None),
            waiting: AtomicUsize::new(0),
            loads: AtomicU64::new(0),
            stores: AtomicU64::new(0),
            clears: AtomicU64::new(0),
        }
    }

    /// Creates a remote that rejects calls until a login succeeds.
    #[must_use]
    pub fn requiring_auth() -> Self {
        Self {
            requires_auth: true,
            authenticated: AtomicBool::new(false),
            ..Self::new()
        }
    }

    /// Adds a fixed delay to every call.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Simulates the network coming and going.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Returns whether the remote is reachable.
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Drops the session so the next call needs a login again.
    pub fn logout(&self) {
        if self.requires_auth {
            self.authenticated.store(false, Ordering::SeqCst);
        }
    }

    /// Parks every subsequent call until the returned gate receives permits.
    ///
    /// Call `gate.add_permits(n)` to let `n` calls through, or
    /// [`MemoryRemote::resume`] to remove the gate altogether.
    pub fn pause(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock() = Some(Arc::clone(&gate));
        gate
    }

    /// Removes the gate installed by [`MemoryRemote::pause`] and releases parked calls.
    pub fn resume(&self) {
        if let Some(gate) = self.gate.lock().take() {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    /// Number of calls currently parked at the gate.
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Returns the call counters.
    pub fn call_stats(&self) -> RemoteCallStats {
        RemoteCallStats {
            loads: self.loads.load(Ordering::SeqCst),
            stores: self.stores.load(Ordering::SeqCst),
            clears: self.clears.load(Ordering::SeqCst),
        }
    }

    /// Resets the call counters.
    pub fn reset_call_stats(&self) {
        self.loads.store(0, Ordering::SeqCst);
        self.stores.store(0, Ordering::SeqCst);
        self.clears.store(0, Ordering::SeqCst);
    }

    /// Writes a blob directly, bypassing availability, auth and counters.
    pub fn seed(&self, tenant: &str, key: &str, data: Vec<u8>) {
        self.blobs.write().insert(storage_path(tenant, key), data);
    }

    /// Reads a blob directly, bypassing availability, auth and counters.
    pub fn peek(&self, tenant: &str, key: &str) -> Option<Vec<u8>> {
        self.blobs.read().get(&storage_path(tenant, key)).cloned()
    }

    async fn enter(&self, tenant: &str, key: &str) -> StorageResult<()> {
        validate_segment(tenant)?;
        validate_segment(key)?;

        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            self.waiting.fetch_add(1, Ordering::SeqCst);
            // each permit admits exactly one call
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
            self.waiting.fetch_sub(1, Ordering::SeqCst);
        }

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if !self.is_online() {
            return Err(StorageError::unavailable("remote is offline"));
        }
        if self.requires_auth && !self.authenticated.load(Ordering::SeqCst) {
            return Err(StorageError::AuthRequired);
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteBackend for MemoryRemote {
    async fn load(&self, tenant: &str, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.enter(tenant, key).await?;
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.blobs.read().get(&storage_path(tenant, key)).cloned())
    }

    async fn store(&self, tenant: &str, key: &str, data: Vec<u8>) -> StorageResult<()> {
        self.enter(tenant, key).await?;
        self.stores.fetch_add(1, Ordering::SeqCst);
        self.blobs.write().insert(storage_path(tenant, key), data);
        Ok(())
    }

    async fn clear(&self, tenant: &str, key: &str) -> StorageResult<()> {
        self.enter(tenant, key).await?;
        self.clears.fetch_add(1, Ordering::SeqCst);
        self.blobs.write().remove(&storage_path(tenant, key));
        Ok(())
    }

    fn name(&self) -> &str {
        "memory-remote"
    }
}

#[async_trait]
impl Authenticator for MemoryRemote {
    async fn login(&self) -> StorageResult<()> {
        if !self.is_online() {
            return Err(StorageError::unavailable("cannot reach login endpoint"));
        }
        self.authenticated.store(true, Ordering::SeqCst);
        tracing::debug!(remote = self.name(), "login completed");
        Ok(())
    }

    fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn remote_roundtrip() {
        let remote = MemoryRemote::new();
        remote.store("t", "k", b"v".to_vec()).await.unwrap();
        assert_eq!(remote.load("t", "k").await.unwrap(), Some(b"v".to_vec()));
        assert_eq!(remote.load("t", "other").await.unwrap(), None);

        let stats = remote.call_stats();
        assert_eq!(stats.stores, 1);
        assert_eq!(stats.loads, 2);
    }

    #[tokio::test]
    async fn remote_offline_is_not_not_found() {
        let remote = MemoryRemote::new();
        remote.set_online(false);

        let err = remote.load("t", "k").await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(remote.call_stats(), RemoteCallStats::default());
    }

    #[tokio::test]
    async fn remote_requires_login() {
        let remote = MemoryRemote::requiring_auth();
        assert!(!remote.is_authenticated());
        assert!(matches!(
            remote.load("t", "k").await,
            Err(StorageError::AuthRequired)
        ));

        remote.login().await.unwrap();
        assert!(remote.is_authenticated());
        assert_eq!(remote.load("t", "k").await.unwrap(), None);

        remote.logout();
        assert!(remote.load("t", "k").await.unwrap_err().is_auth_required());
    }

    #[tokio::test]
    async fn remote_clear_is_idempotent() {
        let remote = MemoryRemote::new();
        remote.clear("t", "k").await.unwrap();
        remote.seed("t", "k", vec![1]);
        remote.clear("t", "k").await.unwrap();
        assert!(remote.peek("t", "k").is_none());
    }

    #[tokio::test]
    async fn remote_gate_parks_calls() {
        let remote = Arc::new(MemoryRemote::new());
        let gate = remote.pause();

        let task = {
            let remote = Arc::clone(&remote);
            tokio::spawn(async move { remote.load("t", "k").await })
        };

        while remote.waiting() == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(remote.call_stats().loads, 0);

        gate.add_permits(1);
        assert_eq!(task.await.unwrap().unwrap(), None);
        assert_eq!(remote.call_stats().loads, 1);
    }
}

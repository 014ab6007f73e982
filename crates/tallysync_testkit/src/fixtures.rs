//! Sample finance entities and store helpers.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tallysync_core::{new_id, Entity, SchemaRegistry};
use tallysync_storage::{FileBackend, InMemoryBackend, MemoryRemote, StorageBackend};
use tempfile::TempDir;

/// Entity key of [`Account`]s.
pub const ACCOUNTS: &str = "accounts";
/// Entity key of [`Transaction`]s.
pub const TRANSACTIONS: &str = "transactions";
/// Entity key of [`Budget`]s.
pub const BUDGETS: &str = "budgets";

/// A bank or cash account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Account id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// ISO 4217 currency code.
    pub currency: String,
    /// Opening balance in minor units.
    pub opening_balance: i64,
}

impl Account {
    /// Creates an account with a fresh id.
    pub fn new(name: impl Into<String>, currency: impl Into<String>) -> Self {
        Self::with_id(new_id(), name, currency)
    }

    /// Creates an account with a fixed id.
    pub fn with_id(id: impl Into<String>, name: impl Into<String>, currency: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            currency: currency.into(),
            opening_balance: 0,
        }
    }
}

impl Entity for Account {
    const NAME: &'static str = "account";

    fn id(&self) -> &str {
        &self.id
    }

    fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name must not be empty".into());
        }
        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(format!("invalid currency code {:?}", self.currency));
        }
        Ok(())
    }
}

/// A booked transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction id.
    pub id: String,
    /// Owning account id.
    pub account_id: String,
    /// Signed amount in minor units.
    pub amount: i64,
    /// Free-form memo.
    pub memo: String,
    /// Booking date as days since the Unix epoch.
    pub booked_on: u32,
}

impl Transaction {
    /// Creates a transaction with a fixed id.
    pub fn with_id(id: impl Into<String>, account_id: impl Into<String>, amount: i64) -> Self {
        Self {
            id: id.into(),
            account_id: account_id.into(),
            amount,
            memo: String::new(),
            booked_on: 19_000,
        }
    }

    /// Sets the memo.
    #[must_use]
    pub fn memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = memo.into();
        self
    }
}

impl Entity for Transaction {
    const NAME: &'static str = "transaction";

    fn id(&self) -> &str {
        &self.id
    }

    fn validate(&self) -> Result<(), String> {
        if self.amount == 0 {
            return Err("amount must not be zero".into());
        }
        if self.account_id.is_empty() {
            return Err("account_id must not be empty".into());
        }
        Ok(())
    }
}

/// A spending limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budget {
    /// Budget id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Limit per month in minor units.
    pub monthly_limit: i64,
}

impl Budget {
    /// Creates a budget with a fixed id.
    pub fn with_id(id: impl Into<String>, name: impl Into<String>, monthly_limit: i64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            monthly_limit,
        }
    }
}

impl Entity for Budget {
    const NAME: &'static str = "budget";

    fn id(&self) -> &str {
        &self.id
    }

    fn validate(&self) -> Result<(), String> {
        if self.monthly_limit < 0 {
            return Err("monthly_limit must not be negative".into());
        }
        Ok(())
    }
}

/// Registry with the three sample entities under their own keys.
pub fn finance_registry() -> SchemaRegistry {
    let mut registry = SchemaRegistry::new();
    registry
        .register::<Account>(ACCOUNTS)
        .and_then(|r| r.register::<Transaction>(TRANSACTIONS))
        .and_then(|r| r.register::<Budget>(BUDGETS))
        .expect("finance registry is valid");
    registry
}

/// `n` transactions with ids `t1..=tn` on account `acc-1`.
pub fn ledger(n: usize) -> Vec<Transaction> {
    (1..=n)
        .map(|i| Transaction::with_id(format!("t{i}"), "acc-1", 100 * i as i64))
        .collect()
}

/// A local/remote store pair with automatic cleanup.
pub struct TestStores {
    /// The local backend.
    pub local: Arc<dyn StorageBackend>,
    /// The simulated remote.
    pub remote: Arc<MemoryRemote>,
    /// In-memory local backend, when not file-based.
    pub memory: Option<Arc<InMemoryBackend>>,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestStores {
    /// In-memory local backend and an open, authenticated remote.
    pub fn memory() -> Self {
        let memory = Arc::new(InMemoryBackend::new());
        Self {
            local: memory.clone(),
            remote: Arc::new(MemoryRemote::new()),
            memory: Some(memory),
            _temp_dir: None,
        }
    }

    /// File-based local backend in a temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let backend = FileBackend::open(temp_dir.path()).expect("Failed to open file backend");
        Self {
            local: Arc::new(backend),
            remote: Arc::new(MemoryRemote::new()),
            memory: None,
            _temp_dir: Some(temp_dir),
        }
    }

    /// Replaces the remote with one that requires a login.
    #[must_use]
    pub fn requiring_auth(mut self) -> Self {
        self.remote = Arc::new(MemoryRemote::requiring_auth());
        self
    }

    /// Path of the file-based local store, if any.
    pub fn path(&self) -> Option<&std::path::Path> {
        self._temp_dir.as_ref().map(TempDir::path)
    }
}

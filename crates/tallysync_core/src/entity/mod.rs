//! Entities and per-key payloads.

mod data;
mod record;

pub use data::EntityKeyData;
pub use record::EntityRecord;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// A typed, identity-bearing record.
///
/// Implementors are plain serde types. The engine stores them as CBOR and
/// checks every payload crossing a backend boundary against the registered
/// schema before it reaches the cache.
///
/// # Example
///
/// ```rust
/// use serde::{Deserialize, Serialize};
/// use tallysync_core::Entity;
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// struct Account {
///     id: String,
///     name: String,
///     balance_cents: i64,
/// }
///
/// impl Entity for Account {
///     const NAME: &'static str = "account";
///
///     fn id(&self) -> &str {
///         &self.id
///     }
///
///     fn validate(&self) -> Result<(), String> {
///         if self.name.is_empty() {
///             return Err("account name is empty".into());
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Entity name. Unique across the schema registry.
    const NAME: &'static str;

    /// Stable identifier. Must not change after creation.
    fn id(&self) -> &str;

    /// Field-level checks run after decoding.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when the value is unacceptable.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Generates a fresh random entity id.
#[must_use]
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

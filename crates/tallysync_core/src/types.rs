//! Core type definitions for tallysync.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Storage namespace of the pre-authentication (null) tenant.
pub const DEFAULT_TENANT_NAMESPACE: &str = "_default";

/// Wall-clock instant in milliseconds since the Unix epoch.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// The epoch. Used for "never written".
    pub const ZERO: Timestamp = Timestamp(0);

    /// Creates a timestamp from milliseconds.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Returns the current time, forced strictly past `previous`.
    ///
    /// Two writes inside the same millisecond still get ordered stamps.
    #[must_use]
    pub fn now_after(previous: Timestamp) -> Self {
        let now = Self::now();
        if now > previous {
            now
        } else {
            Self(previous.0.saturating_add(1))
        }
    }

    /// Returns the raw millisecond value.
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

fn check_name(kind: &'static str, value: &str) -> CoreResult<()> {
    if tallysync_storage::validate_segment(value).is_err() || value.starts_with('_') {
        return Err(CoreError::invalid_identifier(kind, value));
    }
    Ok(())
}

/// Isolation boundary for persisted data.
///
/// `TenantId::anonymous()` is the pre-authentication scope; it is stored
/// under the reserved [`DEFAULT_TENANT_NAMESPACE`], which no named tenant can
/// collide with because names may not start with `_`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TenantId(Option<String>);

impl TenantId {
    /// Creates a named tenant.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidIdentifier`] if the name is empty, contains
    /// a path separator, or starts with `_`.
    pub fn new(id: impl Into<String>) -> CoreResult<Self> {
        let id = id.into();
        check_name("tenant", &id)?;
        Ok(Self(Some(id)))
    }

    /// The pre-authentication tenant.
    #[must_use]
    pub const fn anonymous() -> Self {
        Self(None)
    }

    /// Returns true for the pre-authentication tenant.
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.0.is_none()
    }

    /// Returns the tenant name, if any.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.0.as_deref()
    }

    /// Returns the storage namespace used as the first path segment.
    #[must_use]
    pub fn namespace(&self) -> &str {
        self.0.as_deref().unwrap_or(DEFAULT_TENANT_NAMESPACE)
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.namespace())
    }
}

/// Name of a tenant-scoped collection, e.g. `transactions`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityKey(String);

impl EntityKey {
    /// Creates an entity key.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidIdentifier`] if the key is empty, contains
    /// a path separator, or starts with `_` (reserved for internal records).
    pub fn new(key: impl Into<String>) -> CoreResult<Self> {
        let key = key.into();
        check_name("entity key", &key)?;
        Ok(Self(key))
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for EntityKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

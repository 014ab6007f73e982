//! Error types for tallysync core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// A stored payload failed schema validation.
///
/// Payloads that fail validation are quarantined: they are never applied to
/// the cache, and the previous value stays in place.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("validation failed for {entity}{}: {reason}", fmt_id(.id))]
pub struct ValidationError {
    /// Entity name the payload was checked against.
    pub entity: String,
    /// Entity id, when the failure is tied to one record.
    pub id: Option<String>,
    /// What was wrong.
    pub reason: String,
}

impl ValidationError {
    /// Creates a validation error for one record.
    pub fn record(entity: impl Into<String>, id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            id: Some(id.into()),
            reason: reason.into(),
        }
    }

    /// Creates a validation error for a whole entity name.
    pub fn entity(entity: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            id: None,
            reason: reason.into(),
        }
    }
}

fn fmt_id(id: &Option<String>) -> String {
    id.as_ref().map(|id| format!(" {id:?}")).unwrap_or_default()
}

/// Errors that can occur in tallysync core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] tallysync_storage::StorageError),

    /// CBOR encoding or decoding failed.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the codec failure.
        message: String,
    },

    /// A payload failed schema validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Stored data does not match its metadata.
    #[error("corruption in key {key:?}: {message}")]
    Corruption {
        /// The affected entity key.
        key: String,
        /// Description of the mismatch.
        message: String,
    },

    /// A tenant id or entity key is not usable.
    #[error("invalid {kind}: {value:?}")]
    InvalidIdentifier {
        /// What was being named (`tenant`, `entity key`, `entity id`).
        kind: &'static str,
        /// The rejected value.
        value: String,
    },

    /// A put targeted an id whose record is a tombstone.
    #[error("{entity} {id:?} was deleted; deleted ids are not reused")]
    Deleted {
        /// Entity name of the tombstone.
        entity: String,
        /// The retired id.
        id: String,
    },

    /// An entity name has no registered schema.
    #[error("entity not registered: {name}")]
    EntityNotRegistered {
        /// The unknown entity name.
        name: String,
    },

    /// An entity name was registered twice.
    #[error("entity already registered: {name}")]
    DuplicateEntity {
        /// The duplicated entity name.
        name: String,
    },
}

impl CoreError {
    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates a corruption error.
    pub fn corruption(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Corruption {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid identifier error.
    pub fn invalid_identifier(kind: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidIdentifier {
            kind,
            value: value.into(),
        }
    }

    /// Returns true for payload problems that are quarantined rather than fatal.
    pub fn is_quarantinable(&self) -> bool {
        matches!(
            self,
            CoreError::Validation(_) | CoreError::Codec { .. } | CoreError::Corruption { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_display() {
        let err = ValidationError::record("transaction", "tx-1", "amount missing");
        assert_eq!(
            err.to_string(),
            "validation failed for transaction \"tx-1\": amount missing"
        );

        let err = ValidationError::entity("budget", "unknown entity name");
        assert_eq!(err.to_string(), "validation failed for budget: unknown entity name");
    }

    #[test]
    fn quarantinable_errors() {
        assert!(CoreError::corruption("transactions", "hash").is_quarantinable());
        assert!(CoreError::codec("eof").is_quarantinable());
        assert!(!CoreError::invalid_identifier("tenant", "a/b").is_quarantinable());
    }
}

//! Schema registry: entity names, their keys, and payload validation.
//!
//! Validation runs only where bytes cross a backend boundary. Everything
//! past that point works with payloads already known to decode.

use crate::codec::from_cbor;
use crate::entity::{Entity, EntityKeyData};
use crate::error::{CoreError, CoreResult, ValidationError};
use crate::types::EntityKey;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

type Validator = Arc<dyn Fn(&str, &[u8]) -> Result<(), ValidationError> + Send + Sync>;

/// Schema of one entity name.
#[derive(Clone)]
pub struct EntitySchema {
    name: &'static str,
    key: EntityKey,
    validator: Validator,
}

impl EntitySchema {
    fn of<T: Entity>(key: EntityKey) -> Self {
        Self {
            name: T::NAME,
            key,
            validator: Arc::new(|id: &str, raw: &[u8]| decode_entity::<T>(id, raw).map(|_| ())),
        }
    }

    /// Entity name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Key the entity name is stored under.
    #[must_use]
    pub fn key(&self) -> &EntityKey {
        &self.key
    }

    /// Validates one raw body.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] if the body does not decode, fails the
    /// entity's own checks, or carries a different id.
    pub fn validate(&self, id: &str, raw: &[u8]) -> Result<(), ValidationError> {
        (self.validator)(id, raw)
    }
}

impl fmt::Debug for EntitySchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntitySchema")
            .field("name", &self.name)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// Decodes and validates one entity body.
///
/// # Errors
///
/// Returns a [`ValidationError`] on malformed CBOR, a failed
/// [`Entity::validate`], or an id that differs from `id`.
pub fn decode_entity<T: Entity>(id: &str, raw: &[u8]) -> Result<T, ValidationError> {
    let entity: T = from_cbor(raw).map_err(|e| ValidationError::record(T::NAME, id, e.to_string()))?;
    if entity.id() != id {
        return Err(ValidationError::record(
            T::NAME,
            id,
            format!("body carries id {:?}", entity.id()),
        ));
    }
    entity
        .validate()
        .map_err(|reason| ValidationError::record(T::NAME, id, reason))?;
    Ok(entity)
}

/// Maps entity names to their key and validator.
///
/// Several entity names may share one key (e.g. `transaction` and `split`
/// both under `transactions`); each name belongs to exactly one key.
///
/// # Example
///
/// ```rust,ignore
/// let registry = SchemaRegistry::new()
///     .with::<Account>("accounts")?
///     .with::<Transaction>("transactions")?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: BTreeMap<&'static str, EntitySchema>,
}

impl SchemaRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T` under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if `key` is invalid or `T::NAME` is already registered.
    pub fn register<T: Entity>(&mut self, key: &str) -> CoreResult<&mut Self> {
        if self.schemas.contains_key(T::NAME) {
            return Err(CoreError::DuplicateEntity {
                name: T::NAME.to_string(),
            });
        }
        let key = EntityKey::new(key)?;
        self.schemas.insert(T::NAME, EntitySchema::of::<T>(key));
        Ok(self)
    }

    /// Builder form of [`SchemaRegistry::register`].
    ///
    /// # Errors
    ///
    /// Same as [`SchemaRegistry::register`].
    pub fn with<T: Entity>(mut self, key: &str) -> CoreResult<Self> {
        self.register::<T>(key)?;
        Ok(self)
    }

    /// Returns the schema of an entity name.
    #[must_use]
    pub fn schema(&self, name: &str) -> Option<&EntitySchema> {
        self.schemas.get(name)
    }

    /// Returns the key an entity name is stored under.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::EntityNotRegistered`] for unknown names.
    pub fn key_for(&self, name: &str) -> CoreResult<&EntityKey> {
        self.schema(name)
            .map(EntitySchema::key)
            .ok_or_else(|| CoreError::EntityNotRegistered {
                name: name.to_string(),
            })
    }

    /// Returns every distinct key, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<EntityKey> {
        let mut keys: Vec<EntityKey> = self.schemas.values().map(|s| s.key.clone()).collect();
        keys.sort();
        keys.dedup();
        keys
    }

    /// Validates every live record of a payload loaded for `key`.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`]: an unregistered entity name, a
    /// name registered under another key, or a body that fails its schema.
    pub fn validate_data(&self, key: &EntityKey, data: &EntityKeyData) -> Result<(), ValidationError> {
        for name in data.entity_names() {
            let schema = self
                .schema(name)
                .ok_or_else(|| ValidationError::entity(name, "entity name is not registered"))?;
            if schema.key() != key {
                return Err(ValidationError::entity(
                    name,
                    format!("stored under {key} but registered under {}", schema.key()),
                ));
            }
            for (id, body) in data.live(name) {
                schema.validate(id, body)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::to_cbor;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Account {
        id: String,
        name: String,
    }

    impl Entity for Account {
        const NAME: &'static str = "account";

        fn id(&self) -> &str {
            &self.id
        }

        fn validate(&self) -> Result<(), String> {
            if self.name.is_empty() {
                Err("name is empty".into())
            } else {
                Ok(())
            }
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Budget {
        id: String,
        limit_cents: i64,
    }

    impl Entity for Budget {
        const NAME: &'static str = "budget";

        fn id(&self) -> &str {
            &self.id
        }
    }

    fn account(id: &str, name: &str) -> Vec<u8> {
        to_cbor(&Account {
            id: id.into(),
            name: name.into(),
        })
        .unwrap()
    }

    fn registry() -> SchemaRegistry {
        SchemaRegistry::new()
            .with::<Account>("accounts")
            .unwrap()
            .with::<Budget>("budgets")
            .unwrap()
    }

    #[test]
    fn register_and_lookup() {
        let registry = registry();
        assert_eq!(registry.key_for("account").unwrap().as_str(), "accounts");
        assert!(matches!(
            registry.key_for("nope"),
            Err(CoreError::EntityNotRegistered { .. })
        ));
        assert_eq!(registry.keys().len(), 2);
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut registry = registry();
        assert!(matches!(
            registry.register::<Account>("other"),
            Err(CoreError::DuplicateEntity { .. })
        ));
    }

    #[test]
    fn decode_checks_id_and_fields() {
        let ok: Account = decode_entity("a1", &account("a1", "Checking")).unwrap();
        assert_eq!(ok.name, "Checking");

        let wrong_id = decode_entity::<Account>("a2", &account("a1", "Checking"));
        assert!(wrong_id.unwrap_err().reason.contains("a1"));

        let empty = decode_entity::<Account>("a1", &account("a1", ""));
        assert_eq!(empty.unwrap_err().reason, "name is empty");

        let garbage = decode_entity::<Account>("a1", &[0x01, 0x02]);
        assert!(garbage.is_err());
    }

    #[test]
    fn validate_data_rejects_foreign_and_bad_records() {
        let registry = registry();
        let accounts = EntityKey::new("accounts").unwrap();

        let mut data = EntityKeyData::new();
        data.put("account", "a1", account("a1", "Savings")).unwrap();
        assert!(registry.validate_data(&accounts, &data).is_ok());

        let mut bad = data.clone();
        bad.put("account", "a2", account("a2", "")).unwrap();
        assert!(registry.validate_data(&accounts, &bad).is_err());

        let mut unknown = data.clone();
        unknown.put("ghost", "g1", vec![0xa0]).unwrap();
        assert!(registry.validate_data(&accounts, &unknown).is_err());

        let mut misplaced = data;
        misplaced.put("budget", "b1", to_cbor(&Budget { id: "b1".into(), limit_cents: 1 }).unwrap()).unwrap();
        assert!(registry.validate_data(&accounts, &misplaced).is_err());
    }

    #[test]
    fn tombstones_are_not_validated() {
        let registry = registry();
        let accounts = EntityKey::new("accounts").unwrap();
        let mut data = EntityKeyData::new();
        data.put("account", "a1", vec![0xff]).unwrap();
        data.delete("account", "a1", crate::types::Timestamp::from_millis(1));
        assert!(registry.validate_data(&accounts, &data).is_ok());
    }
}

//! Payload of one entity key.

use super::record::EntityRecord;
use crate::codec::{from_cbor, to_cbor};
use crate::error::{CoreError, CoreResult};
use crate::metadata::EntityCounts;
use crate::types::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// All records stored under one entity key, grouped by entity name.
///
/// This is the opaque unit the backends move around: a key is always
/// loaded, stored and compared as a whole.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityKeyData {
    #[serde(default)]
    entities: BTreeMap<String, BTreeMap<String, EntityRecord>>,
}

impl EntityKeyData {
    /// Creates an empty payload.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the record stored for `(name, id)`, live or tombstone.
    #[must_use]
    pub fn get(&self, name: &str, id: &str) -> Option<&EntityRecord> {
        self.entities.get(name).and_then(|records| records.get(id))
    }

    /// Returns the body of a live entity.
    #[must_use]
    pub fn body(&self, name: &str, id: &str) -> Option<&[u8]> {
        self.get(name, id).and_then(EntityRecord::body)
    }

    /// Stores a live entity, replacing any previous live record.
    ///
    /// Returns the previous record. A tombstoned id stays retired until
    /// compaction drops it, so the put fails with [`CoreError::Deleted`].
    pub fn put(&mut self, name: &str, id: &str, body: Vec<u8>) -> CoreResult<Option<EntityRecord>> {
        if self.get(name, id).is_some_and(EntityRecord::is_tombstone) {
            return Err(CoreError::Deleted {
                entity: name.to_string(),
                id: id.to_string(),
            });
        }
        Ok(self.insert_record(name, id, EntityRecord::live(body)))
    }

    /// Replaces a live entity with a tombstone.
    ///
    /// Returns false (and changes nothing) if the entity is not live.
    pub fn delete(&mut self, name: &str, id: &str, at: Timestamp) -> bool {
        let live = matches!(self.get(name, id), Some(EntityRecord::Live { .. }));
        if live {
            self.insert_record(name, id, EntityRecord::tombstone(at));
        }
        live
    }

    /// Inserts a record verbatim. Returns the previous record.
    pub fn insert_record(
        &mut self,
        name: &str,
        id: &str,
        record: EntityRecord,
    ) -> Option<EntityRecord> {
        self.entities
            .entry(name.to_string())
            .or_default()
            .insert(id.to_string(), record)
    }

    /// Iterates over every `(name, id, record)` in sorted order.
    pub fn records(&self) -> impl Iterator<Item = (&str, &str, &EntityRecord)> {
        self.entities.iter().flat_map(|(name, records)| {
            records
                .iter()
                .map(move |(id, record)| (name.as_str(), id.as_str(), record))
        })
    }

    /// Iterates over the live entities of one entity name.
    pub fn live(&self, name: &str) -> impl Iterator<Item = (&str, &[u8])> {
        self.entities
            .get(name)
            .into_iter()
            .flat_map(|records| records.iter())
            .filter_map(|(id, record)| record.body().map(|body| (id.as_str(), body)))
    }

    /// Returns the entity names present in this payload.
    pub fn entity_names(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }

    /// Counts live and tombstoned records per entity name.
    #[must_use]
    pub fn counts(&self) -> BTreeMap<String, EntityCounts> {
        self.entities
            .iter()
            .map(|(name, records)| {
                let deleted = records.values().filter(|r| r.is_tombstone()).count() as u64;
                let counts = EntityCounts {
                    count: records.len() as u64 - deleted,
                    deleted_count: deleted,
                };
                (name.clone(), counts)
            })
            .collect()
    }

    /// Total number of records, tombstones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.values().map(BTreeMap::len).sum()
    }

    /// Returns true if there are no records at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops tombstones deleted at or before `horizon`.
    ///
    /// Returns the number of tombstones removed.
    pub fn compact(&mut self, horizon: Timestamp) -> usize {
        let mut removed = 0;
        for records in self.entities.values_mut() {
            let before = records.len();
            records.retain(|_, record| match record {
                EntityRecord::Tombstone { deleted_at } => *deleted_at > horizon,
                EntityRecord::Live { .. } => true,
            });
            removed += before - records.len();
        }
        self.entities.retain(|_, records| !records.is_empty());
        removed
    }

    /// Lists the `(name, id)` pairs whose record differs between `self` and `other`.
    #[must_use]
    pub fn changed_records(&self, other: &EntityKeyData) -> Vec<(String, String)> {
        let mut changed: Vec<(String, String)> = self
            .records()
            .filter(|(name, id, record)| other.get(name, id) != Some(*record))
            .map(|(name, id, _)| (name.to_string(), id.to_string()))
            .collect();
        changed.extend(
            other
                .records()
                .filter(|(name, id, _)| self.get(name, id).is_none())
                .map(|(name, id, _)| (name.to_string(), id.to_string())),
        );
        changed
    }

    /// Encodes to CBOR.
    ///
    /// # Errors
    ///
    /// Returns a codec error if serialization fails.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        to_cbor(self)
    }

    /// Decodes from CBOR.
    ///
    /// # Errors
    ///
    /// Returns a codec error for malformed bytes.
    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        from_cbor(bytes)
    }
}

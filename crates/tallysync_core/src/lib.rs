//! # tallysync core
//!
//! Data model and metadata store of the tallysync entity engine.
//!
//! - **Entities** are identity-bearing records grouped by entity name.
//! - An **entity key** names a tenant-scoped collection; its payload is an
//!   [`EntityKeyData`] holding live records and tombstones.
//! - Each tenant has one [`Metadata`] record holding, per key, an
//!   [`EntityKeyMetadata`]: last-write time, a content fingerprint and
//!   per-entity-name counts.
//! - [`compute_hash`] and [`compare`] decide whether two copies of a key
//!   differ and which side should win, without moving the payload.
//!
//! ## Key Invariants
//!
//! - An entity's id never changes and is unique within (tenant, entity name)
//! - The fingerprint is independent of insertion order
//! - A hash match with a count mismatch is corruption, never equality
//! - Data of one tenant never appears under another tenant's namespace

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
pub mod entity;
mod error;
pub mod metadata;
pub mod schema;
mod types;

pub use entity::{new_id, Entity, EntityKeyData, EntityRecord};
pub use error::{CoreError, CoreResult, ValidationError};
pub use metadata::{
    compare, compute_hash, flattened_count, verify_integrity, Checkpoint, EntityCounts,
    EntityKeyMetadata, Metadata, Side, SyncDirection, METADATA_KEY,
};
pub use schema::{decode_entity, EntitySchema, SchemaRegistry};
pub use types::{EntityKey, TenantId, Timestamp, DEFAULT_TENANT_NAMESPACE};

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

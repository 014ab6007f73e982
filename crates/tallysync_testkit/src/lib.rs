//! # tallysync testkit
//!
//! Test utilities for tallysync.
//!
//! This crate provides:
//! - Sample finance entities (`Account`, `Transaction`, `Budget`) and a
//!   registry wiring them to entity keys
//! - Local/remote store pairs with automatic cleanup
//! - Property-based generators for entity key payloads
//! - Scenario helpers that seed either side with data and metadata
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tallysync_testkit::prelude::*;
//!
//! let stores = TestStores::memory();
//! let tenant = TenantId::new("alice").unwrap();
//! seed_remote(&stores.remote, &tenant, TRANSACTIONS, &ledger(5), Timestamp::from_millis(20));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod scenarios;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::scenarios::*;
    pub use tallysync_core::{EntityKey, TenantId, Timestamp};
}

pub use fixtures::*;
pub use generators::*;
pub use scenarios::*;

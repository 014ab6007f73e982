//! # tallysync storage
//!
//! Persistence backends for the tallysync engine.
//!
//! Backends are **opaque byte stores** addressed by `(tenant, key)`. They do
//! not interpret the blobs they hold; the engine owns the data format,
//! hashing and metadata. Every blob lives at the path `"{tenant}/{key}"` in
//! both the local and the remote store.
//!
//! ## Contract
//!
//! - `load` of a key that was never written returns `Ok(None)`, never an error
//! - `store` fully replaces the previous value; a failed store leaves it intact
//! - `clear` is idempotent
//! - An unreachable medium reports [`StorageError::Unavailable`], which is
//!   distinct from "not found"
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - local, for tests and ephemeral sessions
//! - [`FileBackend`] - local, one file per blob with atomic replacement
//! - [`MemoryRemote`] - simulated remote with availability and auth switches
//!
//! ## Example
//!
//! ```rust
//! use tallysync_storage::{InMemoryBackend, StorageBackend};
//!
//! let backend = InMemoryBackend::new();
//! backend.store("alice", "transactions", b"blob").unwrap();
//! assert_eq!(backend.load("alice", "transactions").unwrap(), Some(b"blob".to_vec()));
//! assert_eq!(backend.load("alice", "accounts").unwrap(), None);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;
mod remote;

pub use backend::{storage_path, validate_segment, StorageBackend};
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
pub use remote::{Authenticator, MemoryRemote, RemoteBackend, RemoteCallStats};

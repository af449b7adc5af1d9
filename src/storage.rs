//! Storage subsystem
//!
//! This module owns everything that is persisted about a bin: the bounded,
//! newest-first list of HTTP captures and the per-connection WebSocket
//! sub-streams.
//!
//! Components:
//! - `storage_trait`: the `BinStorage` trait defining a uniform API.
//! - `types`: shared data types returned by storage backends.
//! - `file_storage`: filesystem-backed implementation.
//! - `bin_locks`: per-identifier mutual exclusion for read-modify-write.

pub mod bin_locks;
pub mod file_storage;
pub mod storage_trait;
pub mod types;

pub use bin_locks::BinLocks;
pub use file_storage::FileBinStore;
pub use storage_trait::BinStorage;
pub use types::{SocketConnection, SweepReport};

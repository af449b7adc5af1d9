//! Storage Trait
//!
//! This module defines the `BinStorage` trait, the interface every bin
//! storage backend implements.
//!
//! Implementors are responsible for:
//! - Keeping each bin's HTTP captures bounded and sorted newest-first
//! - Serializing read-modify-write cycles per bin identifier
//! - Never exposing a partially written record to readers
//! - Deleting bins explicitly or when they expire

use chrono::{DateTime, Duration, Utc};

use crate::data_capture::types::{HttpCapture, SocketEvent};
use crate::error_handling::types::StorageError;
use crate::identifier::{BinId, ConnectionId};
use crate::storage::types::{SocketConnection, SweepReport};

/// The `BinStorage` trait defines the interface for bin storage backends.
///
/// Methods are blocking; async callers should run them on a blocking pool.
pub trait BinStorage: Send + Sync {
    /// Stores an HTTP capture, keeping only the most recent captures.
    ///
    /// Two concurrent appends to the same bin both end up in the stored list
    /// (subject to the retention bound).
    fn append_http_event(&self, id: &BinId, event: HttpCapture) -> Result<(), StorageError>;

    /// Loads a bin's HTTP captures, newest first. A bin with nothing stored
    /// yields an empty list.
    fn load_http_events(&self, id: &BinId) -> Result<Vec<HttpCapture>, StorageError>;

    /// Prepends an event to a connection's sub-stream, minting a connection
    /// id when none is given, and returns the id used.
    fn append_socket_event(
        &self,
        id: &BinId,
        connection: Option<&ConnectionId>,
        event: SocketEvent,
    ) -> Result<ConnectionId, StorageError>;

    /// Loads every non-empty connection of a bin, most recently active first.
    fn load_socket_connections(&self, id: &BinId) -> Result<Vec<SocketConnection>, StorageError>;

    /// Removes everything stored for a bin. Deleting an absent bin succeeds.
    fn delete_bin(&self, id: &BinId) -> Result<(), StorageError>;

    /// Removes every bin whose last access is more than `threshold` before
    /// `now`. Failures are isolated per bin and reported, never propagated.
    fn delete_all_expired(&self, threshold: Duration, now: DateTime<Utc>) -> SweepReport;
}

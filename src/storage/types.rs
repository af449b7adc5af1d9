use chrono::{DateTime, Utc};

use crate::data_capture::types::SocketEvent;
use crate::identifier::ConnectionId;

/// One WebSocket connection of a bin as loaded from storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketConnection {
    pub connection_id: ConnectionId,
    /// Time of the newest event; used to order connections.
    pub time: DateTime<Utc>,
    /// Events newest first.
    pub events: Vec<SocketEvent>,
}

/// Outcome of one retention pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub http_bins_removed: usize,
    pub socket_bins_removed: usize,
    /// Entries that could not be inspected or removed.
    pub failures: usize,
}

impl SweepReport {
    pub fn removed(&self) -> usize {
        self.http_bins_removed + self.socket_bins_removed
    }
}

use std::path::PathBuf;
use std::time::Duration;

/// What the bin store needs to know, taken from [`super::config::Config`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSettings {
    /// Directory holding one file per bin plus the `sockets/` area.
    pub base_path: PathBuf,
    /// HTTP captures kept per bin; older ones are dropped first.
    pub max_events_per_bin: usize,
    /// Events kept per WebSocket connection.
    pub max_socket_events: usize,
}

impl StoreSettings {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            max_events_per_bin: super::config::DEFAULT_MAX_EVENTS_PER_BIN,
            max_socket_events: super::config::DEFAULT_MAX_SOCKET_EVENTS,
        }
    }
}

/// Schedule and threshold of the retention sweeper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionSettings {
    /// Time between two sweeps.
    pub period: Duration,
    /// Bins untouched for longer than this are deleted.
    pub threshold: Duration,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(super::config::DEFAULT_SWEEP_INTERVAL_HOURS * 3600),
            threshold: Duration::from_secs(super::config::DEFAULT_RETENTION_HOURS * 3600),
        }
    }
}

/// Size limits applied while reading a request off a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestLimits {
    pub max_head_bytes: usize,
    pub max_body_bytes: usize,
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            max_head_bytes: super::config::DEFAULT_MAX_HEAD_BYTES,
            max_body_bytes: super::config::DEFAULT_MAX_BODY_BYTES,
        }
    }
}

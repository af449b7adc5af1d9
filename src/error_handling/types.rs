use std::fmt;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    NotInRange(String),
    BadIPFormatting(String),
    PortConflict(u16),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::NotInRange(e) => write!(f, "Value out of range: {}", e),
            ConfigError::BadIPFormatting(e) => write!(f, "IP formatting error: {}", e),
            ConfigError::PortConflict(port) => write!(
                f,
                "Capture listener and web interface cannot share port {}",
                port
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

/// Failures of the bin store.
///
/// A missing record is never an error: loading a bin that has nothing
/// persisted yields an empty list. Everything else is reported here.
#[derive(Debug)]
pub enum StorageError {
    ReadFailed(std::io::Error),
    WriteFailed(std::io::Error),
    Corrupted(String),
    LockPoisoned,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::ReadFailed(e) => write!(f, "Storage read failed: {}", e),
            StorageError::WriteFailed(e) => write!(f, "Storage write failed: {}", e),
            StorageError::Corrupted(e) => write!(f, "Stored record is corrupted: {}", e),
            StorageError::LockPoisoned => write!(f, "Bin lock poisoned"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::ReadFailed(e) | StorageError::WriteFailed(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub enum NetworkError {
    BindFailed(std::io::Error),
    Io(std::io::Error),
    ConnectionClosed,
    MalformedRequest(String),
    HeadTooLarge,
    BodyTooLarge,
    HandshakeFailed(String),
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkError::BindFailed(e) => write!(f, "Bind failed: {}", e),
            NetworkError::Io(e) => write!(f, "Socket error: {}", e),
            NetworkError::ConnectionClosed => write!(f, "Connection closed by peer"),
            NetworkError::MalformedRequest(e) => write!(f, "Malformed request: {}", e),
            NetworkError::HeadTooLarge => write!(f, "Request head too large"),
            NetworkError::BodyTooLarge => write!(f, "Request body too large"),
            NetworkError::HandshakeFailed(e) => write!(f, "WebSocket handshake failed: {}", e),
        }
    }
}

impl std::error::Error for NetworkError {}

impl From<std::io::Error> for NetworkError {
    fn from(err: std::io::Error) -> Self {
        NetworkError::Io(err)
    }
}

/// What the inspection API is allowed to tell a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebError {
    NotFound,
    Internal,
}

impl fmt::Display for WebError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebError::NotFound => write!(f, "Page not found"),
            WebError::Internal => write!(f, "The server encountered an error"),
        }
    }
}

impl std::error::Error for WebError {}

impl From<StorageError> for WebError {
    fn from(_: StorageError) -> Self {
        WebError::Internal
    }
}

#[derive(Debug)]
pub enum ControllerError {
    ConfigurationError(ConfigError),
    NetworkError(NetworkError),
    StorageError(StorageError),
    InitializationFailed(String),
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerError::ConfigurationError(e) => write!(f, "Configuration error: {}", e),
            ControllerError::NetworkError(e) => write!(f, "Network error: {}", e),
            ControllerError::StorageError(e) => write!(f, "Storage error: {}", e),
            ControllerError::InitializationFailed(e) => write!(f, "Initialization failed: {}", e),
        }
    }
}

impl std::error::Error for ControllerError {}

impl From<ConfigError> for ControllerError {
    fn from(err: ConfigError) -> Self {
        ControllerError::ConfigurationError(err)
    }
}

impl From<NetworkError> for ControllerError {
    fn from(err: NetworkError) -> Self {
        ControllerError::NetworkError(err)
    }
}

impl From<StorageError> for ControllerError {
    fn from(err: StorageError) -> Self {
        ControllerError::StorageError(err)
    }
}

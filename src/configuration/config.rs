use super::types::{RequestLimits, RetentionSettings, StoreSettings};
use crate::error_handling::types::ConfigError;
use clap::Parser;
use log::info;
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_WEB_UI_PORT: u16 = 3001;
pub const DEFAULT_STORAGE_PATH: &str = "./bins";
pub const DEFAULT_MAX_EVENTS_PER_BIN: usize = 10;
pub const DEFAULT_MAX_SOCKET_EVENTS: usize = 100;
pub const DEFAULT_RETENTION_HOURS: u64 = 48;
pub const DEFAULT_SWEEP_INTERVAL_HOURS: u64 = 24;
pub const DEFAULT_MAX_HEAD_BYTES: usize = 64 * 1024;
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;
/// Upper bound for `retention_hours` and `sweep_interval_hours` (100 years).
pub const MAX_HOURS: u64 = 24 * 365 * 100;

/// Application configuration structure that defines all runtime parameters.
///
/// Every value can come from the command line, from an environment variable,
/// or from a TOML file given with `--config-file`. When a file is given it is
/// authoritative and keys it omits take their defaults.
///
/// # Examples
///
/// ```no_run
/// use postbin::configuration::Config;
///
/// let config = Config::load().expect("valid configuration");
/// println!("Capturing on port {}", config.port);
/// println!("Storage path: {:?}", config.storage_path);
/// ```
///
/// # Fields Overview
///
/// - `bind_address`: address both the capture listener and the web interface bind to
/// - `port`: port of the capture listener (HTTP and WebSocket intake)
/// - `web_ui_enabled`: if `true`, the inspection API is served on `web_ui_port`
/// - `storage_path`: directory holding the bins
/// - `max_events_per_bin` / `max_socket_events`: retention bounds
/// - `retention_hours` / `sweep_interval_hours`: cleaning policy
/// - `max_head_bytes` / `max_body_bytes`: limits on captured requests
#[derive(Parser, Deserialize, Debug, Clone, PartialEq)]
#[command(name = "postbin")]
#[command(version)]
#[command(about = "Hands out bins that record every request sent to them")]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// TOML configuration file.
    ///
    /// # Command Line
    /// Use `--config-file <FILE>`; other flags are then ignored
    #[arg(long, value_name = "FILE")]
    #[serde(skip)]
    pub config_file: Option<PathBuf>,

    /// Network address to bind the listeners to.
    ///
    /// # Command Line
    /// Use `--bind-address <ADDRESS>` or `POSTBIN_BIND_ADDRESS`
    #[arg(long, env = "POSTBIN_BIND_ADDRESS", default_value = DEFAULT_BIND_ADDRESS)]
    pub bind_address: String,

    /// Port of the capture listener.
    ///
    /// Every request sent to `/<bin id>` on this port is recorded.
    ///
    /// # Command Line
    /// Use `--port <PORT>` or `PORT`
    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Enable or disable the inspection API.
    ///
    /// # Command Line
    /// Use `--web-ui-enabled <true|false>`
    #[arg(long, env = "POSTBIN_WEB_UI_ENABLED", default_value_t = true, action = clap::ArgAction::Set)]
    pub web_ui_enabled: bool,

    /// Port number for the inspection API.
    ///
    /// Must differ from `port` when the web interface is enabled.
    ///
    /// # Command Line
    /// Use `--web-ui-port <PORT>`
    #[arg(long, env = "POSTBIN_WEB_UI_PORT", default_value_t = DEFAULT_WEB_UI_PORT)]
    pub web_ui_port: u16,

    /// File system path for bin storage.
    ///
    /// Created on startup if it does not exist.
    ///
    /// # Command Line
    /// Use `--storage-path <PATH>` or `POSTBIN_STORAGE_PATH`
    #[arg(long, env = "POSTBIN_STORAGE_PATH", default_value = DEFAULT_STORAGE_PATH)]
    pub storage_path: PathBuf,

    /// HTTP captures kept per bin; the least recent are dropped first.
    #[arg(long, default_value_t = DEFAULT_MAX_EVENTS_PER_BIN)]
    pub max_events_per_bin: usize,

    /// Events kept per WebSocket connection.
    #[arg(long, default_value_t = DEFAULT_MAX_SOCKET_EVENTS)]
    pub max_socket_events: usize,

    /// Bins untouched for longer than this many hours are deleted.
    #[arg(long, default_value_t = DEFAULT_RETENTION_HOURS)]
    pub retention_hours: u64,

    /// Hours between two retention sweeps.
    #[arg(long, default_value_t = DEFAULT_SWEEP_INTERVAL_HOURS)]
    pub sweep_interval_hours: u64,

    /// Upper bound on the request line plus headers.
    #[arg(long, default_value_t = DEFAULT_MAX_HEAD_BYTES)]
    pub max_head_bytes: usize,

    /// Upper bound on a captured body.
    #[arg(long, default_value_t = DEFAULT_MAX_BODY_BYTES)]
    pub max_body_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_file: None,
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            web_ui_enabled: true,
            web_ui_port: DEFAULT_WEB_UI_PORT,
            storage_path: PathBuf::from(DEFAULT_STORAGE_PATH),
            max_events_per_bin: DEFAULT_MAX_EVENTS_PER_BIN,
            max_socket_events: DEFAULT_MAX_SOCKET_EVENTS,
            retention_hours: DEFAULT_RETENTION_HOURS,
            sweep_interval_hours: DEFAULT_SWEEP_INTERVAL_HOURS,
            max_head_bytes: DEFAULT_MAX_HEAD_BYTES,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl Config {
    /// Parses the command line (and environment).
    ///
    /// # Panics
    /// Exits the process with clap's usage message when arguments are invalid.
    pub fn from_args() -> Self {
        Config::parse()
    }

    pub fn try_from_args<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Config::try_parse_from(args)
    }

    /// Reads and validates a TOML configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml(&content)?;
        config.config_file = Some(path.to_path_buf());
        info!("Configuration read from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::TomlError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Command line first; a `--config-file` switches to the file.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = Self::from_args();
        match cli.config_file {
            Some(ref path) => Self::from_file(path),
            None => {
                cli.validate()?;
                Ok(cli)
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_ip()?;

        let positive = [
            ("max_events_per_bin", self.max_events_per_bin as u64),
            ("max_socket_events", self.max_socket_events as u64),
            ("retention_hours", self.retention_hours),
            ("sweep_interval_hours", self.sweep_interval_hours),
            ("max_head_bytes", self.max_head_bytes as u64),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::NotInRange(format!("{} must be greater than 0", name)));
        }

        let hours = [
            ("retention_hours", self.retention_hours),
            ("sweep_interval_hours", self.sweep_interval_hours),
        ];
        if let Some((name, _)) = hours.iter().find(|(_, value)| *value > MAX_HOURS) {
            return Err(ConfigError::NotInRange(format!("{} must be at most {}", name, MAX_HOURS)));
        }

        if self.web_ui_enabled && self.port == self.web_ui_port && self.port != 0 {
            return Err(ConfigError::PortConflict(self.port));
        }
        Ok(())
    }

    fn bind_ip(&self) -> Result<IpAddr, ConfigError> {
        self.bind_address
            .parse()
            .map_err(|_| ConfigError::BadIPFormatting(self.bind_address.clone()))
    }

    pub fn capture_addr(&self) -> Result<SocketAddr, ConfigError> {
        Ok(SocketAddr::new(self.bind_ip()?, self.port))
    }

    pub fn web_ui_addr(&self) -> Result<SocketAddr, ConfigError> {
        Ok(SocketAddr::new(self.bind_ip()?, self.web_ui_port))
    }

    pub fn store_settings(&self) -> StoreSettings {
        StoreSettings {
            base_path: self.storage_path.clone(),
            max_events_per_bin: self.max_events_per_bin,
            max_socket_events: self.max_socket_events,
        }
    }

    pub fn retention_settings(&self) -> RetentionSettings {
        RetentionSettings {
            period: Duration::from_secs(self.sweep_interval_hours.saturating_mul(3600)),
            threshold: Duration::from_secs(self.retention_hours.saturating_mul(3600)),
        }
    }

    pub fn request_limits(&self) -> RequestLimits {
        RequestLimits {
            max_head_bytes: self.max_head_bytes,
            max_body_bytes: self.max_body_bytes,
        }
    }
}

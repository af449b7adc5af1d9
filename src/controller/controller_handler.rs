use std::sync::Arc;

use log::{error, info, warn};

use crate::configuration::config::Config;
use crate::data_capture::recorder::CaptureService;
use crate::error_handling::types::ControllerError;
use crate::network::network_listener::NetworkListener;
use crate::retention::sweeper::RetentionSweeper;
use crate::storage::file_storage::FileBinStore;
use crate::storage::storage_trait::BinStorage;
use crate::web_interface::web_server::WebServer;

/// Wires the store, the capture listener, the sweeper and the inspection
/// API together and runs them until Ctrl-C.
pub struct Controller {
    config: Config,
    storage: Arc<dyn BinStorage>,
}

impl Controller {
    /// Validates `config` and opens the bin store.
    pub fn new(config: Config) -> Result<Self, ControllerError> {
        config.validate()?;

        let store = FileBinStore::new(config.store_settings()).map_err(|e| {
            error!(
                "[!] Unable to open bin store at {}: {}",
                config.storage_path.display(),
                e
            );
            e
        })?;
        info!("Bins stored under {}", store.base_path().display());

        Ok(Self {
            config,
            storage: Arc::new(store),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn storage(&self) -> Arc<dyn BinStorage> {
        Arc::clone(&self.storage)
    }

    /// Runs every component. Returns when the capture listener fails or on
    /// Ctrl-C; background tasks are stopped either way.
    pub async fn run(self) -> Result<(), ControllerError> {
        let capture = CaptureService::new(self.storage());
        let listener = NetworkListener::bind(
            self.config.capture_addr()?,
            capture,
            self.config.request_limits(),
        )
        .await?;

        let sweeper =
            RetentionSweeper::new(self.storage(), self.config.retention_settings()).spawn();

        let web_ui = if self.config.web_ui_enabled {
            let addr = self.config.web_ui_addr()?;
            let server = WebServer::new(self.storage());
            Some(tokio::spawn(async move { server.start(addr).await }))
        } else {
            info!("Inspection API disabled");
            None
        };

        let result = tokio::select! {
            served = listener.start_listening() => served.map_err(ControllerError::from),
            signal = tokio::signal::ctrl_c() => match signal {
                Ok(()) => {
                    info!("Shutting down");
                    Ok(())
                }
                Err(e) => {
                    warn!("Unable to listen for Ctrl-C: {}", e);
                    Err(ControllerError::InitializationFailed(e.to_string()))
                }
            },
        };

        sweeper.abort();
        if let Some(web_ui) = web_ui {
            web_ui.abort();
        }
        result
    }
}

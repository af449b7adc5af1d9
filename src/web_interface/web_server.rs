use std::net::SocketAddr;
use std::sync::Arc;

use log::info;

use super::routes::routes;
use crate::storage::storage_trait::BinStorage;

/// Web server for the inspection API and landing page
pub struct WebServer {
    storage: Arc<dyn BinStorage>,
}

impl WebServer {
    pub fn new(storage: Arc<dyn BinStorage>) -> Self {
        Self { storage }
    }

    /// Serves until the task is dropped.
    pub async fn start(&self, addr: SocketAddr) {
        info!("Inspection API on http://{}", addr);
        warp::serve(routes(Arc::clone(&self.storage))).run(addr).await;
    }
}

//! # Network Listener Module
//!
//! Accepts TCP connections on the capture port and hands every request to
//! the [`CaptureService`].
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐    ┌──────────────────┐    ┌─────────────────┐
//! │ Incoming        │───▶│ NetworkListener  │───▶│ CaptureService  │
//! │ Connections     │    │                  │    │ (background     │
//! └─────────────────┘    │ - Request reader │    │  writes)        │
//!                        │ - Bin routing    │    └─────────────────┘
//!                        │ - WS handshake   │
//!                        └──────────────────┘
//! ```
//!
//! Each connection carries exactly one request and is closed after the
//! response, except for WebSocket upgrades which stay open until the peer
//! leaves.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use postbin::configuration::types::{RequestLimits, StoreSettings};
//! use postbin::data_capture::CaptureService;
//! use postbin::error_handling::types::NetworkError;
//! use postbin::network::network_listener::NetworkListener;
//! use postbin::storage::FileBinStore;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), NetworkError> {
//!     let store = FileBinStore::new(StoreSettings::new("./bins")).unwrap();
//!     let capture = CaptureService::new(Arc::new(store));
//!
//!     let listener = NetworkListener::bind(
//!         "0.0.0.0:3000".parse().unwrap(),
//!         capture,
//!         RequestLimits::default(),
//!     )
//!     .await?;
//!     listener.start_listening().await
//! }
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use log::{debug, error, info, trace, warn};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpListener;

use super::http_reader::{read_request, write_response};
use super::websocket::serve_websocket;
use crate::configuration::types::RequestLimits;
use crate::data_capture::recorder::{CaptureOutcome, CaptureService};
use crate::error_handling::types::NetworkError;

/// Pause after a failed `accept`, so descriptor exhaustion does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// The capture endpoint: `ANY /<bin id>` and WebSocket upgrades on the
/// same path.
pub struct NetworkListener {
    listener: TcpListener,
    capture: CaptureService,
    limits: RequestLimits,
}

impl NetworkListener {
    /// Binds the capture port.
    ///
    /// # Errors
    ///
    /// `NetworkError::BindFailed` if the address is in use or not allowed.
    pub async fn bind(
        addr: SocketAddr,
        capture: CaptureService,
        limits: RequestLimits,
    ) -> Result<Self, NetworkError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(NetworkError::BindFailed)?;
        Ok(Self {
            listener,
            capture,
            limits,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetworkError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections forever, one task per connection.
    pub async fn start_listening(self) -> Result<(), NetworkError> {
        info!("Capturing requests on {}", self.local_addr()?);

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("[!] Accept failed: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };
            trace!("Connection from {}", peer);

            let capture = self.capture.clone();
            let limits = self.limits;
            tokio::spawn(async move {
                handle_connection(stream, capture, limits).await;
                trace!("Connection from {} closed", peer);
            });
        }
    }
}

/// Serves a single connection: reads one request, records it against its
/// bin and answers.
pub async fn handle_connection<S>(stream: S, capture: CaptureService, limits: RequestLimits)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut stream = BufReader::new(stream);

    let request = match read_request(&mut stream, &limits).await {
        Ok(request) => request,
        Err(NetworkError::ConnectionClosed) => return,
        Err(e) => {
            debug!("Unreadable request: {}", e);
            let (status, reason) = match e {
                NetworkError::HeadTooLarge => (431, "Request Header Fields Too Large"),
                NetworkError::BodyTooLarge => (413, "Payload Too Large"),
                NetworkError::MalformedRequest(_) => (400, "Bad Request"),
                _ => return,
            };
            let _ = write_response(&mut stream, status, reason, reason).await;
            return;
        }
    };

    let Some(raw_id) = bin_segment(request.path()).map(str::to_string) else {
        let _ = write_response(&mut stream, 404, "Not Found", "Not Found").await;
        return;
    };

    if request.is_websocket_upgrade() {
        if let Err(e) = serve_websocket(stream, &raw_id, request, &capture, &limits).await {
            warn!("[{}] WebSocket ended with error: {}", raw_id, e);
        }
        return;
    }

    let (status, reason) = match capture.capture(&raw_id, request) {
        CaptureOutcome::Accepted(_) => (200, "OK"),
        CaptureOutcome::Rejected(_) => (404, "Not Found"),
    };
    if let Err(e) = write_response(&mut stream, status, reason, reason).await {
        debug!("[{}] response not delivered: {}", raw_id, e);
    }
}

/// The single path segment of `/<segment>`, if that is the path's shape.
fn bin_segment(path: &str) -> Option<&str> {
    path.strip_prefix('/').filter(|segment| !segment.contains('/'))
}

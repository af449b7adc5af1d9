//! Capture orchestration.
//!
//! [`CaptureService`] is the single entry point for inbound traffic. It
//! validates the bin identifier taken from the URL, acknowledges the sender
//! right away and persists the event in the background: the response to the
//! sender never waits on storage, and a storage failure after the
//! acknowledgement is only logged.
//!
//! WebSocket connections get a [`SocketRecorder`], which feeds every event of
//! one connection through a bounded channel to a single writer task so the
//! connection's sub-stream is persisted in arrival order. A full channel makes
//! the connection wait for the writer.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, error, trace};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::data_capture::types::{HttpCapture, RawHttpRequest, SocketEvent};
use crate::identifier::{BinId, ConnectionId};
use crate::storage::storage_trait::BinStorage;

/// Socket events queued per connection before recording waits on storage.
pub const SOCKET_EVENT_BACKLOG: usize = 32;

/// Why a capture was refused. Surfaced as "page not found" at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    NotFound,
}

/// Result of handing a request to [`CaptureService::capture`].
#[derive(Debug)]
pub enum CaptureOutcome {
    /// The sender can be acknowledged; the write is in flight.
    Accepted(PendingWrite),
    Rejected(Rejection),
}

/// Background write started by an accepted capture.
///
/// Dropping it detaches the write, which still runs to completion.
#[derive(Debug)]
pub struct PendingWrite {
    handle: JoinHandle<()>,
}

impl PendingWrite {
    /// Waits for the write to finish (failures have already been logged).
    pub async fn finished(self) {
        if let Err(e) = self.handle.await {
            error!("Capture writer task failed: {}", e);
        }
    }
}

/// Validates, acknowledges and persists inbound traffic for bins.
#[derive(Clone)]
pub struct CaptureService {
    storage: Arc<dyn BinStorage>,
}

impl CaptureService {
    pub fn new(storage: Arc<dyn BinStorage>) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> Arc<dyn BinStorage> {
        Arc::clone(&self.storage)
    }

    /// Records an HTTP request sent to `raw_id`.
    ///
    /// An invalid identifier is rejected without touching storage. Must be
    /// called from within a tokio runtime.
    pub fn capture(&self, raw_id: &str, request: RawHttpRequest) -> CaptureOutcome {
        let Some(id) = BinId::parse(raw_id) else {
            debug!("Rejected capture for invalid bin id {:?}", raw_id);
            return CaptureOutcome::Rejected(Rejection::NotFound);
        };
        let received_at = Utc::now();
        let storage = Arc::clone(&self.storage);

        let handle = tokio::spawn(async move {
            let write_id = id.clone();
            let written = tokio::task::spawn_blocking(move || {
                let event = HttpCapture::new(received_at, request.to_raw());
                trace!("[{}] capturing {} byte(s)", write_id, event.raw.len());
                storage.append_http_event(&write_id, event)
            })
            .await;

            match written {
                Ok(Ok(())) => debug!("[{}] capture stored", id),
                Ok(Err(e)) => error!("[{}] failed to store capture: {}", id, e),
                Err(e) => error!("[{}] capture writer panicked: {}", id, e),
            }
        });

        CaptureOutcome::Accepted(PendingWrite { handle })
    }

    /// Validates the handshake of a WebSocket connection to `raw_id` and, if
    /// valid, records the connection-open event.
    ///
    /// The caller rejects the connection at protocol level on `Err`. Must be
    /// called from within a tokio runtime.
    pub fn open_socket(
        &self,
        raw_id: &str,
        handshake: &RawHttpRequest,
    ) -> Result<SocketRecorder, Rejection> {
        let Some(id) = BinId::parse(raw_id) else {
            debug!("Rejected WebSocket for invalid bin id {:?}", raw_id);
            return Err(Rejection::NotFound);
        };
        let opened_at = Utc::now();
        let recorder = SocketRecorder::spawn(Arc::clone(&self.storage), id, opened_at);
        // first event on a fresh channel, so there is room for it
        if let Err(e) = recorder.events.try_send(SocketEvent::Connection {
            time: opened_at,
            raw: handshake.to_raw(),
        }) {
            error!("[{}/{}] connection event dropped: {}", recorder.bin_id, recorder.connection_id, e);
        }
        Ok(recorder)
    }
}

/// Event sink for one accepted WebSocket connection.
pub struct SocketRecorder {
    bin_id: BinId,
    connection_id: ConnectionId,
    events: mpsc::Sender<SocketEvent>,
    writer: JoinHandle<()>,
}

impl SocketRecorder {
    fn spawn(storage: Arc<dyn BinStorage>, bin_id: BinId, opened_at: DateTime<Utc>) -> Self {
        let connection_id = ConnectionId::mint(opened_at);
        let (events, mut rx) = mpsc::channel::<SocketEvent>(SOCKET_EVENT_BACKLOG);

        let writer = {
            let bin_id = bin_id.clone();
            let connection_id = connection_id.clone();
            tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    let storage = Arc::clone(&storage);
                    let bin = bin_id.clone();
                    let connection = connection_id.clone();
                    let kind = event.kind();
                    let written = tokio::task::spawn_blocking(move || {
                        storage.append_socket_event(&bin, Some(&connection), event)
                    })
                    .await;
                    match written {
                        Ok(Ok(_)) => trace!("[{}/{}] {} event stored", bin_id, connection_id, kind),
                        Ok(Err(e)) => error!(
                            "[{}/{}] failed to store {} event: {}",
                            bin_id, connection_id, kind, e
                        ),
                        Err(e) => error!("[{}/{}] socket writer panicked: {}", bin_id, connection_id, e),
                    }
                }
                debug!("[{}/{}] socket writer finished", bin_id, connection_id);
            })
        };

        Self {
            bin_id,
            connection_id,
            events,
            writer,
        }
    }

    pub fn bin_id(&self) -> &BinId {
        &self.bin_id
    }

    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    /// Queues `event`, waiting while the writer is [`SOCKET_EVENT_BACKLOG`]
    /// events behind.
    async fn push(&self, event: SocketEvent) {
        // the receiver lives until every sender is dropped
        let _ = self.events.send(event).await;
    }

    pub async fn record_message(&self, message: String, binary: bool) {
        self.push(SocketEvent::Message {
            time: Utc::now(),
            message,
            binary,
        })
        .await;
    }

    pub async fn record_close(&self, reason_code: u16, description: String) {
        self.push(SocketEvent::Close {
            time: Utc::now(),
            reason_code,
            description,
        })
        .await;
    }

    /// Stops accepting events; the returned write drains what was queued.
    pub fn finish(self) -> PendingWrite {
        let SocketRecorder { events, writer, .. } = self;
        drop(events);
        PendingWrite { handle: writer }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::types::StoreSettings;
    use crate::storage::file_storage::FileBinStore;
    use tempfile::TempDir;

    fn request(target: &str) -> RawHttpRequest {
        RawHttpRequest {
            method: "POST".into(),
            target: target.into(),
            version: "1.1".into(),
            header_lines: vec!["Host: localhost".into(), "X-Trace: 1".into()],
            body: "payload".into(),
        }
    }

    fn service(dir: &TempDir) -> (CaptureService, Arc<dyn BinStorage>) {
        let storage: Arc<dyn BinStorage> =
            Arc::new(FileBinStore::new(StoreSettings::new(dir.path())).unwrap());
        (CaptureService::new(Arc::clone(&storage)), storage)
    }

    #[tokio::test]
    async fn test_capture_stores_raw_request() {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = TempDir::new().unwrap();
        let (service, storage) = service(&dir);

        let outcome = service.capture("abcdef0123", request("/abcdef0123?x=1"));
        let CaptureOutcome::Accepted(pending) = outcome else {
            panic!("capture rejected");
        };
        pending.finished().await;

        let id = BinId::parse("ABCDEF0123").unwrap();
        let events = storage.load_http_events(&id).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].raw,
            "POST /abcdef0123?x=1 HTTP/1.1\r\nHost: localhost\r\nX-Trace: 1\r\n\r\npayload"
        );
    }

    #[tokio::test]
    async fn test_invalid_id_is_rejected_without_storage() {
        let dir = TempDir::new().unwrap();
        let (service, _) = service(&dir);

        let outcome = service.capture("not-an-id", request("/not-an-id"));
        assert!(matches!(outcome, CaptureOutcome::Rejected(Rejection::NotFound)));
        assert!(service.open_socket("not-an-id", &request("/not-an-id")).is_err());

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("sockets")]);
        assert_eq!(std::fs::read_dir(dir.path().join("sockets")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_socket_events_kept_in_arrival_order() {
        let dir = TempDir::new().unwrap();
        let (service, storage) = service(&dir);

        let recorder = service.open_socket("0123456789", &request("/0123456789")).unwrap();
        let connection_id = recorder.connection_id().clone();
        recorder.record_message("one".into(), false).await;
        recorder.record_message("two".into(), false).await;
        recorder.record_close(1000, "done".into()).await;
        recorder.finish().finished().await;

        let id = BinId::parse("0123456789").unwrap();
        let connections = storage.load_socket_connections(&id).unwrap();
        assert_eq!(connections.len(), 1);
        assert_eq!(connections[0].connection_id, connection_id);
        let kinds: Vec<_> = connections[0].events.iter().map(SocketEvent::kind).collect();
        assert_eq!(kinds, vec!["close", "message", "message", "connection"]);
        match &connections[0].events[1] {
            SocketEvent::Message { message, .. } => assert_eq!(message, "two"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_socket_backlog_waits_for_writer() {
        let dir = TempDir::new().unwrap();
        let (service, storage) = service(&dir);

        let recorder = service.open_socket("0123456789", &request("/0123456789")).unwrap();
        assert_eq!(recorder.events.max_capacity(), SOCKET_EVENT_BACKLOG);
        let total = SOCKET_EVENT_BACKLOG * 3;
        for n in 0..total {
            recorder.record_message(n.to_string(), false).await;
        }
        recorder.finish().finished().await;

        let id = BinId::parse("0123456789").unwrap();
        let connections = storage.load_socket_connections(&id).unwrap();
        // nothing is dropped on the way to storage
        assert_eq!(connections[0].events.len(), total + 1);
        let newest = match &connections[0].events[0] {
            SocketEvent::Message { message, .. } => message.clone(),
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(newest, (total - 1).to_string());
    }
}

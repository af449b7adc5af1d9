//! WebSocket capture.
//!
//! The handshake has already been read as a [`RawHttpRequest`] by the
//! listener. This module answers it, then records every frame of the
//! connection through a [`SocketRecorder`] until the peer goes away.

use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Role, WebSocketConfig};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;

use super::http_reader::write_response;
use crate::configuration::types::RequestLimits;
use crate::data_capture::recorder::{CaptureService, PendingWrite, SocketRecorder};
use crate::data_capture::types::RawHttpRequest;
use crate::error_handling::types::NetworkError;
use crate::identifier::BinId;

/// Close code recorded when the peer sent a close frame without a status.
pub const NO_STATUS_CODE: u16 = 1005;
/// Close code recorded when the connection ended without a close frame.
pub const ABNORMAL_CLOSE_CODE: u16 = 1006;

/// Subprotocol under which text messages are sent back to the peer.
pub const ECHO_PROTOCOL: &str = "echo";

/// Close code recorded, and sent, when a frame or message exceeds the
/// configured body limit.
pub const MESSAGE_TOO_BIG_CODE: u16 = 1009;

/// Completes the handshake for `raw_id` and records the connection.
///
/// Frames and messages are capped at `limits.max_body_bytes`, the same bound
/// HTTP bodies get. Returns `Ok(None)` when the handshake was refused (a
/// response has been written in that case), otherwise the write draining
/// the connection's events once the socket is done.
pub async fn serve_websocket<S>(
    mut stream: S,
    raw_id: &str,
    handshake: RawHttpRequest,
    capture: &CaptureService,
    limits: &RequestLimits,
) -> Result<Option<PendingWrite>, NetworkError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // an unknown bin is refused the same way whatever the handshake looks like
    if BinId::parse(raw_id).is_none() {
        debug!("Rejected WebSocket for invalid bin id {:?}", raw_id);
        write_response(&mut stream, 404, "Not Found", "Not Found").await?;
        return Ok(None);
    }

    let key = match validate_handshake(&handshake) {
        Ok(key) => key.to_string(),
        Err(reason) => {
            debug!("Refusing WebSocket handshake: {}", reason);
            write_response(&mut stream, 400, "Bad Request", "Bad Request").await?;
            return Ok(None);
        }
    };

    let recorder = match capture.open_socket(raw_id, &handshake) {
        Ok(recorder) => recorder,
        Err(_) => {
            write_response(&mut stream, 404, "Not Found", "Not Found").await?;
            return Ok(None);
        }
    };

    let protocol = requested_protocol(&handshake).map(str::to_string);
    let response = switching_protocols(&key, protocol.as_deref());
    if let Err(e) = async {
        stream.write_all(response.as_bytes()).await?;
        stream.flush().await
    }
    .await
    {
        recorder
            .record_close(ABNORMAL_CLOSE_CODE, "handshake not delivered".to_string())
            .await;
        recorder.finish();
        return Err(NetworkError::HandshakeFailed(e.to_string()));
    }

    info!(
        "[{}/{}] WebSocket opened{}",
        recorder.bin_id(),
        recorder.connection_id(),
        protocol
            .as_deref()
            .map(|p| format!(" with protocol {:?}", p))
            .unwrap_or_default()
    );

    let socket =
        WebSocketStream::from_raw_socket(stream, Role::Server, Some(socket_config(limits))).await;
    let echo = protocol.as_deref() == Some(ECHO_PROTOCOL);
    record_frames(socket, &recorder, echo).await;

    debug!("[{}/{}] WebSocket done", recorder.bin_id(), recorder.connection_id());
    Ok(Some(recorder.finish()))
}

fn socket_config(limits: &RequestLimits) -> WebSocketConfig {
    WebSocketConfig::default()
        .max_message_size(Some(limits.max_body_bytes))
        .max_frame_size(Some(limits.max_body_bytes))
}

/// Pumps frames into `recorder` until the stream ends. A connection that
/// ends without a close frame is recorded as an abnormal closure.
///
/// Recording waits when the connection's writer is behind, which stops
/// frames from being read until storage catches up.
async fn record_frames<S>(mut socket: WebSocketStream<S>, recorder: &SocketRecorder, echo: bool)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut closed = false;

    while let Some(frame) = socket.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                recorder.record_message(text.as_str().to_owned(), false).await;
                if echo {
                    if let Err(e) = socket.send(Message::Text(text)).await {
                        debug!("[{}] echo failed: {}", recorder.connection_id(), e);
                        break;
                    }
                }
            }
            Ok(Message::Binary(data)) => {
                recorder
                    .record_message(String::from_utf8_lossy(&data).into_owned(), true)
                    .await;
            }
            Ok(Message::Close(frame)) => {
                let (code, reason) = frame
                    .map(|f| (u16::from(f.code), f.reason.as_str().to_owned()))
                    .unwrap_or((NO_STATUS_CODE, String::new()));
                recorder.record_close(code, reason).await;
                closed = true;
            }
            // pings are answered by the protocol layer
            Ok(_) => {}
            Err(WsError::Capacity(e)) => {
                warn!("[{}] {}", recorder.connection_id(), e);
                recorder
                    .record_close(MESSAGE_TOO_BIG_CODE, "message too big".to_string())
                    .await;
                closed = true;
                let _ = socket
                    .close(Some(CloseFrame {
                        code: CloseCode::Size,
                        reason: "message too big".into(),
                    }))
                    .await;
                break;
            }
            Err(e) => {
                debug!("[{}] socket error: {}", recorder.connection_id(), e);
                break;
            }
        }
    }

    if !closed {
        recorder
            .record_close(ABNORMAL_CLOSE_CODE, "connection dropped".to_string())
            .await;
    }
}

fn validate_handshake(handshake: &RawHttpRequest) -> Result<&str, &'static str> {
    if !handshake.method.eq_ignore_ascii_case("GET") {
        return Err("method is not GET");
    }
    if handshake.header("sec-websocket-version") != Some("13") {
        return Err("unsupported Sec-WebSocket-Version");
    }
    handshake
        .header("sec-websocket-key")
        .filter(|key| !key.is_empty())
        .ok_or("missing Sec-WebSocket-Key")
}

/// First subprotocol the client offered, if any.
fn requested_protocol(handshake: &RawHttpRequest) -> Option<&str> {
    handshake
        .header_values("sec-websocket-protocol")
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .find(|p| !p.is_empty())
}

fn switching_protocols(key: &str, protocol: Option<&str>) -> String {
    let mut response = format!(
        "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {}\r\n",
        derive_accept_key(key.as_bytes())
    );
    if let Some(protocol) = protocol {
        response.push_str(&format!("Sec-WebSocket-Protocol: {}\r\n", protocol));
    }
    response.push_str("\r\n");
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handshake(extra: &[&str]) -> RawHttpRequest {
        let mut header_lines: Vec<String> = vec![
            "Host: localhost".into(),
            "Upgrade: websocket".into(),
            "Connection: Upgrade".into(),
            "Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==".into(),
            "Sec-WebSocket-Version: 13".into(),
        ];
        header_lines.extend(extra.iter().map(|s| s.to_string()));
        RawHttpRequest {
            method: "GET".into(),
            target: "/ABCDEF0123".into(),
            version: "1.1".into(),
            header_lines,
            body: String::new(),
        }
    }

    #[test]
    fn test_accept_key_matches_rfc_sample() {
        let response = switching_protocols("dGhlIHNhbXBsZSBub25jZQ==", None);
        assert!(response.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
        assert!(!response.contains("Sec-WebSocket-Protocol"));
        assert!(response.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_first_offered_protocol_is_selected() {
        let request = handshake(&["Sec-WebSocket-Protocol: echo, chat", "Sec-WebSocket-Protocol: other"]);
        assert_eq!(requested_protocol(&request), Some("echo"));
        assert_eq!(requested_protocol(&handshake(&[])), None);

        let response = switching_protocols("x", Some("echo"));
        assert!(response.contains("Sec-WebSocket-Protocol: echo\r\n"));
    }

    #[test]
    fn test_handshake_validation() {
        assert!(validate_handshake(&handshake(&[])).is_ok());

        let mut post = handshake(&[]);
        post.method = "POST".into();
        assert!(validate_handshake(&post).is_err());

        let mut no_key = handshake(&[]);
        no_key.header_lines.retain(|l| !l.starts_with("Sec-WebSocket-Key"));
        assert!(validate_handshake(&no_key).is_err());

        let mut old_version = handshake(&[]);
        old_version.header_lines.retain(|l| !l.starts_with("Sec-WebSocket-Version"));
        old_version.header_lines.push("Sec-WebSocket-Version: 8".into());
        assert!(validate_handshake(&old_version).is_err());
    }

    #[tokio::test]
    async fn test_invalid_id_is_not_found_before_handshake_checks() {
        use crate::configuration::types::StoreSettings;
        use crate::storage::file_storage::FileBinStore;
        use std::sync::Arc;
        use tempfile::TempDir;
        use tokio::io::AsyncReadExt;

        let dir = TempDir::new().unwrap();
        let capture = CaptureService::new(Arc::new(FileBinStore::new(StoreSettings::new(dir.path())).unwrap()));

        let mut malformed = handshake(&[]);
        malformed.method = "POST".into();
        malformed.header_lines.retain(|l| !l.starts_with("Sec-WebSocket-Key"));

        for (raw_id, expected) in [("nope", "HTTP/1.1 404 "), ("ABCDEF0123", "HTTP/1.1 400 ")] {
            let (server, mut client) = tokio::io::duplex(4096);
            let served = serve_websocket(server, raw_id, malformed.clone(), &capture, &RequestLimits::default())
                .await
                .unwrap();
            assert!(served.is_none());

            let mut response = String::new();
            client.read_to_string(&mut response).await.unwrap();
            assert!(response.starts_with(expected), "{}: {}", raw_id, response);
        }
        assert_eq!(std::fs::read_dir(dir.path().join("sockets")).unwrap().count(), 0);
    }

    #[test]
    fn test_socket_config_follows_body_limit() {
        let limits = RequestLimits {
            max_head_bytes: 512,
            max_body_bytes: 1024,
        };
        let config = socket_config(&limits);
        assert_eq!(config.max_message_size, Some(1024));
        assert_eq!(config.max_frame_size, Some(1024));
    }
}

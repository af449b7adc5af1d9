//! Common data types used across the data_capture subsystem.

use chrono::serde::ts_milliseconds;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::formatting::format_raw_request;

/// A request exactly as it was read off the wire.
///
/// `header_lines` holds `"Name: Value"` strings in arrival order with the
/// original casing, duplicates included. Nothing here is normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawHttpRequest {
    pub method: String,
    /// Request target as sent (path and query).
    pub target: String,
    /// Protocol version without the `HTTP/` prefix, e.g. `1.1`.
    pub version: String,
    pub header_lines: Vec<String>,
    pub body: String,
}

impl RawHttpRequest {
    /// Canonical stored representation of this request.
    pub fn to_raw(&self) -> String {
        format_raw_request(
            &self.method,
            &self.target,
            &self.version,
            &self.header_lines,
            &self.body,
        )
    }

    /// Values of every header named `name`, compared case-insensitively.
    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.header_lines
            .iter()
            .filter_map(move |line| header_value(line, name))
    }

    /// First value of the header named `name`. The result borrows from the
    /// request only, not from `name`.
    pub fn header<'a>(&'a self, name: &str) -> Option<&'a str> {
        self.header_lines
            .iter()
            .find_map(|line| header_value(line, name))
    }

    /// Target path with the query string removed.
    pub fn path(&self) -> &str {
        self.target
            .split_once('?')
            .map(|(path, _)| path)
            .unwrap_or(&self.target)
    }

    pub fn is_websocket_upgrade(&self) -> bool {
        let upgrade = self
            .header_values("upgrade")
            .any(|v| v.eq_ignore_ascii_case("websocket"));
        let connection = self.header_values("connection").any(|v| {
            v.split(',')
                .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
        });
        upgrade && connection
    }
}

fn header_value<'l>(line: &'l str, name: &str) -> Option<&'l str> {
    let (field, value) = line.split_once(':')?;
    field
        .trim()
        .eq_ignore_ascii_case(name)
        .then(|| value.trim())
}

/// One captured HTTP request, as persisted in a bin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpCapture {
    #[serde(with = "ts_milliseconds")]
    pub time: DateTime<Utc>,
    pub raw: String,
}

impl HttpCapture {
    pub fn new(time: DateTime<Utc>, raw: String) -> Self {
        Self { time, raw }
    }
}

/// One event of a WebSocket connection, tagged by `type` when persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SocketEvent {
    /// The handshake request that opened the connection.
    Connection {
        #[serde(with = "ts_milliseconds")]
        time: DateTime<Utc>,
        raw: String,
    },
    Message {
        #[serde(with = "ts_milliseconds")]
        time: DateTime<Utc>,
        message: String,
        /// Binary frames are kept as lossy UTF-8 text.
        #[serde(default)]
        binary: bool,
    },
    Close {
        #[serde(with = "ts_milliseconds")]
        time: DateTime<Utc>,
        #[serde(rename = "reasonCode")]
        reason_code: u16,
        description: String,
    },
}

impl SocketEvent {
    pub fn time(&self) -> DateTime<Utc> {
        match self {
            SocketEvent::Connection { time, .. }
            | SocketEvent::Message { time, .. }
            | SocketEvent::Close { time, .. } => *time,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SocketEvent::Connection { .. } => "connection",
            SocketEvent::Message { .. } => "message",
            SocketEvent::Close { .. } => "close",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn request(header_lines: &[&str]) -> RawHttpRequest {
        RawHttpRequest {
            method: "GET".into(),
            target: "/ABCDEF0123?token=1".into(),
            version: "1.1".into(),
            header_lines: header_lines.iter().map(|l| l.to_string()).collect(),
            body: String::new(),
        }
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let req = request(&["X-Thing: one", "x-thing: two", "Host: a"]);
        assert_eq!(req.header("X-THING"), Some("one"));
        assert_eq!(req.header_values("x-thing").collect::<Vec<_>>(), vec!["one", "two"]);
        assert_eq!(req.header("missing"), None);
        assert_eq!(req.path(), "/ABCDEF0123");
    }

    #[test]
    fn test_header_value_outlives_lookup_name() {
        let req = request(&["Sec-WebSocket-Key: abc==", "Host: a"]);
        let key = {
            let name = String::from("sec-websocket-key");
            req.header(&name)
        };
        assert_eq!(key, Some("abc=="));
    }

    #[test]
    fn test_websocket_upgrade_detection() {
        let req = request(&["Upgrade: WebSocket", "Connection: keep-alive, Upgrade"]);
        assert!(req.is_websocket_upgrade());
        let req = request(&["Upgrade: websocket"]);
        assert!(!req.is_websocket_upgrade());
    }

    #[test]
    fn test_persisted_field_names() {
        let time = Utc.timestamp_millis_opt(1_380_000_000_123).unwrap();
        let http = serde_json::to_value(HttpCapture::new(time, "GET / HTTP/1.1\r\n\r\n".into())).unwrap();
        assert_eq!(http["time"], 1_380_000_000_123i64);
        assert_eq!(http["raw"], "GET / HTTP/1.1\r\n\r\n");

        let close = serde_json::to_value(SocketEvent::Close {
            time,
            reason_code: 1000,
            description: "bye".into(),
        })
        .unwrap();
        assert_eq!(close["type"], "close");
        assert_eq!(close["reasonCode"], 1000);
        assert_eq!(close["time"], 1_380_000_000_123i64);
    }

    #[test]
    fn test_message_without_binary_flag_loads() {
        let event: SocketEvent =
            serde_json::from_str(r#"{"type":"message","time":5,"message":"hi"}"#).unwrap();
        assert_eq!(event.kind(), "message");
        assert_eq!(event.time().timestamp_millis(), 5);
    }
}

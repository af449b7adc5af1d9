use chrono::serde::ts_milliseconds;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::data_capture::types::{HttpCapture, SocketEvent};
use crate::formatting::{absolute_time, time_ago};
use crate::identifier::{BinId, ConnectionId};
use crate::storage::types::SocketConnection;

/// A stored item plus its display times, flattened into one JSON object.
#[derive(Debug, Serialize)]
pub struct Annotated<T> {
    #[serde(flatten)]
    pub item: T,
    pub ago: String,
    pub utc: String,
    /// Milliseconds since the epoch.
    pub ts: i64,
}

impl<T> Annotated<T> {
    pub fn new(item: T, time: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            item,
            ago: time_ago(time, now),
            utc: absolute_time(time),
            ts: time.timestamp_millis(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SocketView {
    pub connection_id: ConnectionId,
    #[serde(with = "ts_milliseconds")]
    pub time: DateTime<Utc>,
    pub ago: String,
    pub utc: String,
    pub ts: i64,
    pub events: Vec<Annotated<SocketEvent>>,
}

impl SocketView {
    pub fn new(connection: SocketConnection, now: DateTime<Utc>) -> Self {
        let SocketConnection {
            connection_id,
            time,
            events,
        } = connection;
        Self {
            connection_id,
            time,
            ago: time_ago(time, now),
            utc: absolute_time(time),
            ts: time.timestamp_millis(),
            events: events
                .into_iter()
                .map(|event| {
                    let at = event.time();
                    Annotated::new(event, at, now)
                })
                .collect(),
        }
    }
}

/// Everything the inspection page shows for one bin.
#[derive(Debug, Serialize)]
pub struct BinView {
    pub bin_id: BinId,
    /// A fresh identifier offered for the next bin.
    pub new_id: BinId,
    pub requests: Vec<Annotated<HttpCapture>>,
    pub sockets: Vec<SocketView>,
}

#[derive(Debug, Serialize)]
pub struct NewBinResponse {
    pub id: BinId,
}

/// API error payload
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub message: String,
}

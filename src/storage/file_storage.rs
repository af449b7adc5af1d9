use std::fs::{self, Metadata};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use log::{debug, error, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::configuration::types::StoreSettings;
use crate::data_capture::types::{HttpCapture, SocketEvent};
use crate::error_handling::types::StorageError;
use crate::identifier::{BinId, ConnectionId};
use crate::storage::bin_locks::BinLocks;
use crate::storage::storage_trait::BinStorage;
use crate::storage::types::{SocketConnection, SweepReport};

const SOCKETS_DIR: &str = "sockets";

/// Filesystem-backed bin store.
///
/// Layout under the base path:
/// - `<ID>`: JSON array of HTTP captures, newest first
/// - `sockets/<ID>/<connection id>`: JSON array of socket events, newest first
///
/// Records are replaced by writing a temporary file in the same directory and
/// renaming it over the old one, so readers see either the old or the new
/// list and never a partial one.
pub struct FileBinStore {
    settings: StoreSettings,
    locks: BinLocks,
}

impl FileBinStore {
    pub fn new(settings: StoreSettings) -> Result<Self, StorageError> {
        let sockets_dir = settings.base_path.join(SOCKETS_DIR);
        fs::create_dir_all(&sockets_dir).map_err(|e| {
            error!("Failed to create storage dir {}: {}", sockets_dir.display(), e);
            StorageError::WriteFailed(e)
        })?;
        info!("FileBinStore initialized at {}", settings.base_path.display());

        Ok(Self {
            settings,
            locks: BinLocks::new(),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.settings.base_path
    }

    fn sockets_root(&self) -> PathBuf {
        self.settings.base_path.join(SOCKETS_DIR)
    }

    fn http_path(&self, id: &BinId) -> PathBuf {
        self.settings.base_path.join(id.as_str())
    }

    fn socket_dir(&self, id: &BinId) -> PathBuf {
        self.sockets_root().join(id.as_str())
    }

    /// Number of per-bin mutexes currently allocated.
    pub fn tracked_locks(&self) -> usize {
        self.locks.len()
    }

    fn sweep_http_area(&self, threshold: Duration, now: DateTime<Utc>, report: &mut SweepReport) {
        let base = &self.settings.base_path;
        let entries = match fs::read_dir(base) {
            Ok(entries) => entries,
            Err(e) => {
                error!("Failed to read bins dir {}: {}", base.display(), e);
                report.failures += 1;
                return;
            }
        };

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    error!("Dir entry error in {}: {}", base.display(), e);
                    report.failures += 1;
                    continue;
                }
            };
            let Some(id) = entry.file_name().to_str().and_then(BinId::parse) else {
                continue;
            };
            let path = entry.path();
            match self.remove_if_expired(&id, &path, false, threshold, now) {
                Ok(true) => {
                    info!("Removing bin {}", id);
                    report.http_bins_removed += 1;
                }
                Ok(false) => {}
                Err(e) => {
                    error!("Failed to sweep bin {}: {}", path.display(), e);
                    report.failures += 1;
                }
            }
        }
    }

    fn sweep_socket_area(&self, threshold: Duration, now: DateTime<Utc>, report: &mut SweepReport) {
        let root = self.sockets_root();
        let entries = match fs::read_dir(&root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No socket area at {}", root.display());
                return;
            }
            Err(e) => {
                error!("Failed to read socket dir {}: {}", root.display(), e);
                report.failures += 1;
                return;
            }
        };

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    error!("Dir entry error in {}: {}", root.display(), e);
                    report.failures += 1;
                    continue;
                }
            };
            let Some(id) = entry.file_name().to_str().and_then(BinId::parse) else {
                continue;
            };
            let path = entry.path();
            match self.remove_if_expired(&id, &path, true, threshold, now) {
                Ok(true) => {
                    info!("Removing socket bin {}", id);
                    report.socket_bins_removed += 1;
                }
                Ok(false) => {}
                Err(e) => {
                    error!("Failed to sweep socket bin {}: {}", path.display(), e);
                    report.failures += 1;
                }
            }
        }
    }

    /// Stats `path` under the bin's lock and deletes it when it is of the
    /// expected kind and has not been touched within `threshold`.
    fn remove_if_expired(
        &self,
        id: &BinId,
        path: &Path,
        expect_dir: bool,
        threshold: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        self.locks.with_lock(id, || {
            let metadata = match fs::metadata(path) {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
                Err(e) => return Err(StorageError::ReadFailed(e)),
            };
            if metadata.is_dir() != expect_dir {
                return Ok(false);
            }
            let last = last_touched(&metadata).map_err(StorageError::ReadFailed)?;
            if now - last <= threshold {
                return Ok(false);
            }
            let removed = if expect_dir {
                fs::remove_dir_all(path)
            } else {
                fs::remove_file(path)
            };
            match removed {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
                Err(e) => Err(StorageError::WriteFailed(e)),
            }
        })
    }
}

impl BinStorage for FileBinStore {
    fn append_http_event(&self, id: &BinId, event: HttpCapture) -> Result<(), StorageError> {
        let path = self.http_path(id);
        self.locks.with_lock(id, || {
            let mut events: Vec<HttpCapture> = read_json_list(&path)?;
            // ties on time keep the newest arrival first
            events.insert(0, event);
            events.sort_by(|a, b| b.time.cmp(&a.time));
            events.truncate(self.settings.max_events_per_bin);
            write_json_atomically(&self.settings.base_path, &path, &events)?;
            debug!("Stored {} capture(s) for bin {}", events.len(), id);
            Ok(())
        })
    }

    fn load_http_events(&self, id: &BinId) -> Result<Vec<HttpCapture>, StorageError> {
        let mut events: Vec<HttpCapture> = read_json_list(&self.http_path(id))?;
        events.sort_by(|a, b| b.time.cmp(&a.time));
        Ok(events)
    }

    fn append_socket_event(
        &self,
        id: &BinId,
        connection: Option<&ConnectionId>,
        event: SocketEvent,
    ) -> Result<ConnectionId, StorageError> {
        let connection = connection
            .cloned()
            .unwrap_or_else(|| ConnectionId::mint(event.time()));
        let dir = self.socket_dir(id);
        let path = dir.join(connection.as_str());

        self.locks.with_lock(id, || {
            fs::create_dir_all(&dir).map_err(|e| {
                error!("Failed to create socket dir {}: {}", dir.display(), e);
                StorageError::WriteFailed(e)
            })?;
            let mut events: Vec<SocketEvent> = read_json_list(&path)?;
            events.insert(0, event);
            events.truncate(self.settings.max_socket_events);
            write_json_atomically(&dir, &path, &events)?;
            debug!("Stored {} event(s) for connection {}/{}", events.len(), id, connection);
            Ok(())
        })?;
        Ok(connection)
    }

    fn load_socket_connections(&self, id: &BinId) -> Result<Vec<SocketConnection>, StorageError> {
        let dir = self.socket_dir(id);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::ReadFailed(e)),
        };

        let mut connections = Vec::new();
        for entry in entries {
            let entry = entry.map_err(StorageError::ReadFailed)?;
            let Some(connection_id) = entry.file_name().to_str().and_then(ConnectionId::parse)
            else {
                continue;
            };
            let events: Vec<SocketEvent> = read_json_list(&entry.path())?;
            let Some(time) = events.iter().map(SocketEvent::time).max() else {
                continue;
            };
            connections.push(SocketConnection {
                connection_id,
                time,
                events,
            });
        }
        connections.sort_by(|a, b| b.time.cmp(&a.time));
        Ok(connections)
    }

    fn delete_bin(&self, id: &BinId) -> Result<(), StorageError> {
        let http_path = self.http_path(id);
        let socket_dir = self.socket_dir(id);
        self.locks.with_lock(id, || {
            ignore_missing(fs::remove_file(&http_path)).map_err(StorageError::WriteFailed)?;
            ignore_missing(fs::remove_dir_all(&socket_dir)).map_err(StorageError::WriteFailed)?;
            info!("Deleted bin {}", id);
            Ok(())
        })
    }

    fn delete_all_expired(&self, threshold: Duration, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();
        self.sweep_http_area(threshold, now, &mut report);
        self.sweep_socket_area(threshold, now, &mut report);
        let pruned = self.locks.prune();
        if report.failures > 0 {
            warn!("Sweep finished with {} failure(s)", report.failures);
        }
        info!(
            "Swept bins: {} http, {} socket removed; {} idle lock(s) released",
            report.http_bins_removed, report.socket_bins_removed, pruned
        );
        report
    }
}

/// Last access of a bin: the later of its access and modification times.
pub(crate) fn last_touched(metadata: &Metadata) -> io::Result<DateTime<Utc>> {
    let modified = metadata.modified()?;
    let last = match metadata.accessed() {
        Ok(accessed) => accessed.max(modified),
        Err(_) => modified,
    };
    Ok(DateTime::<Utc>::from(last))
}

fn ignore_missing(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn read_json_list<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, StorageError> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            error!("Read failed {}: {}", path.display(), e);
            return Err(StorageError::ReadFailed(e));
        }
    };
    serde_json::from_slice(&data).map_err(|e| {
        error!("Invalid record {}: {}", path.display(), e);
        StorageError::Corrupted(format!("{}: {}", path.display(), e))
    })
}

fn write_json_atomically<T: Serialize>(
    dir: &Path,
    target: &Path,
    value: &T,
) -> Result<(), StorageError> {
    let data = serde_json::to_vec(value).map_err(|e| StorageError::WriteFailed(io::Error::other(e)))?;
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| {
        error!("Create temp file in {} failed: {}", dir.display(), e);
        StorageError::WriteFailed(e)
    })?;
    tmp.write_all(&data).map_err(StorageError::WriteFailed)?;
    tmp.as_file().sync_all().map_err(StorageError::WriteFailed)?;
    tmp.persist(target).map_err(|e| {
        error!("Replace {} failed: {}", target.display(), e.error);
        StorageError::WriteFailed(e.error)
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;
    use std::thread;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> FileBinStore {
        FileBinStore::new(StoreSettings::new(dir.path())).unwrap()
    }

    fn bin(s: &str) -> BinId {
        BinId::parse(s).unwrap()
    }

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    #[test]
    fn test_missing_bin_loads_empty() {
        let dir = TempDir::new().unwrap();
        let storage = store(&dir);
        let id = bin("ABCDEF0123");
        assert!(storage.load_http_events(&id).unwrap().is_empty());
        assert!(storage.load_socket_connections(&id).unwrap().is_empty());
    }

    #[test]
    fn test_keeps_ten_most_recent_newest_first() {
        let dir = TempDir::new().unwrap();
        let storage = store(&dir);
        let id = bin("ABCDEF0123");

        // out of order on purpose
        for i in [3, 0, 7, 10, 1, 5, 9, 2, 8, 4, 6] {
            storage
                .append_http_event(&id, HttpCapture::new(at(i), format!("request {}", i)))
                .unwrap();
        }

        let events = storage.load_http_events(&id).unwrap();
        assert_eq!(events.len(), 10);
        let times: Vec<_> = events.iter().map(|e| e.time).collect();
        let expected: Vec<_> = (1..=10).rev().map(at).collect();
        assert_eq!(times, expected);
        assert!(events.iter().all(|e| e.raw != "request 0"));
    }

    #[test]
    fn test_raw_request_survives_storage_byte_for_byte() {
        let dir = TempDir::new().unwrap();
        let storage = store(&dir);
        let id = bin("0123456789");
        let raw = "PUT /0123456789 HTTP/1.1\r\nX-A: 1\r\nx-a: 2\r\nHOST: h\r\n\r\n{\"k\": \"v\u{e9}\"}\r\n".to_string();

        storage.append_http_event(&id, HttpCapture::new(at(0), raw.clone())).unwrap();
        assert_eq!(storage.load_http_events(&id).unwrap()[0].raw, raw);
    }

    #[test]
    fn test_concurrent_appends_are_not_lost() {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(store(&dir));
        let id = bin("FFFFFFFFFF");

        let writers: Vec<_> = (0..8)
            .map(|i| {
                let storage = Arc::clone(&storage);
                let id = id.clone();
                thread::spawn(move || {
                    storage
                        .append_http_event(&id, HttpCapture::new(at(i), format!("writer {}", i)))
                        .unwrap();
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let events = storage.load_http_events(&id).unwrap();
        assert_eq!(events.len(), 8);
        for i in 0..8 {
            assert!(events.iter().any(|e| e.raw == format!("writer {}", i)));
        }
    }

    #[test]
    fn test_corrupted_record_is_an_error() {
        let dir = TempDir::new().unwrap();
        let storage = store(&dir);
        let id = bin("ABCDEF0123");
        fs::write(dir.path().join("ABCDEF0123"), b"{not json").unwrap();

        assert!(matches!(storage.load_http_events(&id), Err(StorageError::Corrupted(_))));
        assert!(storage
            .append_http_event(&id, HttpCapture::new(at(0), "x".into()))
            .is_err());
    }

    #[test]
    fn test_socket_events_grouped_per_connection() {
        let dir = TempDir::new().unwrap();
        let storage = store(&dir);
        let id = bin("ABCDEF0123");

        let first = storage
            .append_socket_event(
                &id,
                None,
                SocketEvent::Connection { time: at(0), raw: "GET /ABCDEF0123 HTTP/1.1\r\n\r\n".into() },
            )
            .unwrap();
        let again = storage
            .append_socket_event(
                &id,
                Some(&first),
                SocketEvent::Message { time: at(1), message: "hello".into(), binary: false },
            )
            .unwrap();
        assert_eq!(again, first);

        let second = storage
            .append_socket_event(
                &id,
                None,
                SocketEvent::Connection { time: at(5), raw: "GET /abcdef0123 HTTP/1.1\r\n\r\n".into() },
            )
            .unwrap();
        assert_ne!(second, first);

        let connections = storage.load_socket_connections(&id).unwrap();
        assert_eq!(connections.len(), 2);
        assert_eq!(connections[0].connection_id, second);
        assert_eq!(connections[0].time, at(5));
        assert_eq!(connections[1].connection_id, first);
        assert_eq!(connections[1].time, at(1));
        assert_eq!(connections[1].events[0].kind(), "message");
        assert_eq!(connections[1].events[1].kind(), "connection");
    }

    #[test]
    fn test_socket_area_skips_empty_and_foreign_files() {
        let dir = TempDir::new().unwrap();
        let storage = store(&dir);
        let id = bin("ABCDEF0123");
        let socket_dir = dir.path().join("sockets").join("ABCDEF0123");
        fs::create_dir_all(&socket_dir).unwrap();
        fs::write(socket_dir.join("1700000000000"), b"[]").unwrap();
        fs::write(socket_dir.join(".tmpXYZ"), b"garbage").unwrap();

        assert!(storage.load_socket_connections(&id).unwrap().is_empty());
    }

    #[test]
    fn test_socket_events_are_bounded() {
        let dir = TempDir::new().unwrap();
        let settings = StoreSettings { max_socket_events: 3, ..StoreSettings::new(dir.path()) };
        let storage = FileBinStore::new(settings).unwrap();
        let id = bin("ABCDEF0123");
        let conn = ConnectionId::mint(at(0));

        for i in 0..5 {
            storage
                .append_socket_event(
                    &id,
                    Some(&conn),
                    SocketEvent::Message { time: at(i), message: i.to_string(), binary: false },
                )
                .unwrap();
        }
        let connections = storage.load_socket_connections(&id).unwrap();
        let messages: Vec<_> = connections[0]
            .events
            .iter()
            .map(|e| match e {
                SocketEvent::Message { message, .. } => message.clone(),
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(messages, vec!["4", "3", "2"]);
    }

    #[test]
    fn test_delete_bin_removes_both_areas() {
        let dir = TempDir::new().unwrap();
        let storage = store(&dir);
        let id = bin("ABCDEF0123");
        storage.append_http_event(&id, HttpCapture::new(at(0), "x".into())).unwrap();
        storage
            .append_socket_event(&id, None, SocketEvent::Connection { time: at(0), raw: "y".into() })
            .unwrap();

        storage.delete_bin(&id).unwrap();
        assert!(storage.load_http_events(&id).unwrap().is_empty());
        assert!(storage.load_socket_connections(&id).unwrap().is_empty());
        // deleting again is not an error
        storage.delete_bin(&id).unwrap();
    }

    #[test]
    fn test_sweep_respects_threshold() {
        let dir = TempDir::new().unwrap();
        let storage = store(&dir);
        let id = bin("ABCDEF0123");
        storage.append_http_event(&id, HttpCapture::new(at(0), "x".into())).unwrap();

        let metadata = fs::metadata(dir.path().join("ABCDEF0123")).unwrap();
        let last = last_touched(&metadata).unwrap();
        let threshold = Duration::hours(48);

        let report = storage.delete_all_expired(threshold, last + Duration::minutes(47 * 60 + 59));
        assert_eq!(report.removed(), 0);
        assert_eq!(storage.load_http_events(&id).unwrap().len(), 1);

        let report = storage.delete_all_expired(threshold, last + Duration::minutes(48 * 60 + 1));
        assert_eq!(report.http_bins_removed, 1);
        assert!(storage.load_http_events(&id).unwrap().is_empty());
        assert_eq!(storage.tracked_locks(), 0);
    }

    #[test]
    fn test_sweep_removes_socket_dirs_and_ignores_foreign_entries() {
        let dir = TempDir::new().unwrap();
        let storage = store(&dir);
        let id = bin("0000000000");
        storage
            .append_socket_event(&id, None, SocketEvent::Connection { time: at(0), raw: "y".into() })
            .unwrap();
        fs::write(dir.path().join("README"), b"not a bin").unwrap();

        let far_future = Utc::now() + Duration::days(30);
        let report = storage.delete_all_expired(Duration::hours(48), far_future);
        assert_eq!(report.socket_bins_removed, 1);
        assert_eq!(report.failures, 0);
        assert!(!dir.path().join("sockets").join("0000000000").exists());
        assert!(dir.path().join("README").exists());
        assert!(dir.path().join("sockets").exists());
    }
}

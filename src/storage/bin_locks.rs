use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error_handling::types::StorageError;
use crate::identifier::BinId;

/// One mutex per bin identifier, created on first use.
///
/// Every read-modify-write of a bin's records runs while holding that bin's
/// mutex, so two writers can never both start from the same snapshot.
#[derive(Debug, Default)]
pub struct BinLocks {
    locks: Mutex<HashMap<BinId, Arc<Mutex<()>>>>,
}

impl BinLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, id: &BinId) -> Result<Arc<Mutex<()>>, StorageError> {
        let mut locks = self.locks.lock().map_err(|_| StorageError::LockPoisoned)?;
        Ok(Arc::clone(locks.entry(id.clone()).or_default()))
    }

    /// Runs `f` while holding the mutex of bin `id`.
    pub fn with_lock<T, F>(&self, id: &BinId, f: F) -> Result<T, StorageError>
    where
        F: FnOnce() -> Result<T, StorageError>,
    {
        let handle = self.handle(id)?;
        // the mutex guards no data, a panic in a previous holder leaves nothing inconsistent
        let _guard = handle.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f()
    }

    /// Drops mutexes nobody currently holds. Returns how many were dropped.
    pub fn prune(&self) -> usize {
        match self.locks.lock() {
            Ok(mut locks) => {
                let before = locks.len();
                locks.retain(|_, handle| Arc::strong_count(handle) > 1);
                before - locks.len()
            }
            Err(_) => 0,
        }
    }

    pub fn len(&self) -> usize {
        self.locks.lock().map(|locks| locks.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_same_bin_is_serialized() {
        let locks = Arc::new(BinLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let id = BinId::parse("ABCDEF0123").unwrap();

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let inside = Arc::clone(&inside);
                let id = id.clone();
                thread::spawn(move || {
                    locks
                        .with_lock(&id, || {
                            assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                            thread::sleep(Duration::from_millis(5));
                            inside.fetch_sub(1, Ordering::SeqCst);
                            Ok(())
                        })
                        .unwrap();
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
    }

    #[test]
    fn test_prune_drops_idle_locks() {
        let locks = BinLocks::new();
        let id = BinId::parse("0000000001").unwrap();
        locks.with_lock(&id, || Ok(())).unwrap();
        assert_eq!(locks.len(), 1);
        assert_eq!(locks.prune(), 1);
        assert!(locks.is_empty());
    }
}

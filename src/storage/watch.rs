//! Cross-process change detection for SQLite-backed areas.
//!
//! Writes made through this process's contexts are dispatched directly by
//! [`super::StorageContext`]. Writes made by another process on the same
//! database file are only visible in the table, so a background task polls
//! the revision column and re-dispatches them as [`Origin::External`].

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{Origin, SqliteStore, StorageArea, StorageEvent};

/// Spawn the external-change watcher. The task runs until aborted.
pub fn spawn_external_watcher(
    store: SqliteStore,
    area: StorageArea,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(instance = %store.instance_id(), ?interval, "storage watcher started");

        let mut mark = match store.current_revision() {
            Ok(rev) => rev,
            Err(e) => {
                warn!(error = %e, "could not read starting revision, watching from zero");
                0
            }
        };

        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            mark = poll_once(&store, &area, mark);
        }
    })
}

/// One watcher step: dispatch foreign changes newer than `mark` and return
/// the new mark. Errors leave the mark unchanged so the next tick retries.
pub fn poll_once(store: &SqliteStore, area: &StorageArea, mark: i64) -> i64 {
    match store.foreign_changes_since(mark) {
        Ok((keys, next)) => {
            for key in keys {
                debug!(%key, "external storage change");
                area.dispatch(&StorageEvent {
                    key,
                    origin: Origin::External,
                });
            }
            next
        }
        Err(e) => {
            warn!(error = %e, "storage watcher poll failed");
            mark
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{open_pool, KeyValueStore};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_poll_once_dispatches_only_foreign_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watch.db");
        let pool = open_pool(path.to_str().unwrap()).unwrap();

        // Two store instances on one file stand in for two processes.
        let local = SqliteStore::new(pool.clone());
        let remote = SqliteStore::new(pool);
        let area = StorageArea::new(Arc::new(local.clone()));
        let ctx = area.context();

        let keys = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&keys);
        let _sub = ctx.subscribe(move |event| {
            if event.origin == Origin::External {
                sink.lock().unwrap().push(event.key.clone());
            }
        });

        let mark = local.current_revision().unwrap();
        area.context().set_item("mine", "1").unwrap();
        remote.set_item("theirs", "2").unwrap();
        assert!(keys.lock().unwrap().is_empty());

        let mark = poll_once(&local, &area, mark);
        assert_eq!(*keys.lock().unwrap(), vec!["theirs".to_string()]);

        // Nothing new on the next poll
        poll_once(&local, &area, mark);
        assert_eq!(keys.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_spawned_watcher_notifies_subscribers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watch.db");
        let pool = open_pool(path.to_str().unwrap()).unwrap();

        let local = SqliteStore::new(pool.clone());
        let remote = SqliteStore::new(pool);
        let area = StorageArea::new(Arc::new(local.clone()));
        let ctx = area.context();

        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let _sub = ctx.subscribe(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        let handle = spawn_external_watcher(local, area, Duration::from_millis(10));
        // Let the watcher record its starting revision
        tokio::time::sleep(Duration::from_millis(30)).await;

        remote.set_item("theirs", "x").unwrap();
        for _ in 0..100 {
            if hits.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.abort();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}

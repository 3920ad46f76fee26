use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use flatfs_store::{Cursor, DeltaKind, RemoteStore};
use tokio::sync::{broadcast, mpsc, Mutex, Notify};
use tracing::{debug, instrument, warn};

use crate::cache::MetadataCache;
use crate::error::FsError;

/// Event delivered to watch subscribers.
///
/// The change feed does not distinguish creations from modifications, so
/// every upsert is reported as `Modified`; subscribers that care can compare
/// against their own last-known state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Created(String),
    Modified(String),
    Deleted(String),
}

impl WatchEvent {
    pub fn path(&self) -> &str {
        match self {
            WatchEvent::Created(p) | WatchEvent::Modified(p) | WatchEvent::Deleted(p) => p,
        }
    }
}

enum WatcherState {
    Uninitialized,
    Primed(Cursor),
    Closed,
}

const EVENT_CAPACITY: usize = 256;

/// Drains the remote change feed on demand, invalidating cached metadata for
/// every changed path and fanning events out to subscribers.
///
/// The watcher never polls on its own. Callers obtain a cursor with
/// [`ChangeWatcher::initialize`] and then drive draining either directly via
/// [`ChangeWatcher::on_signal`] or through the [`ChangeWatcher::run`] loop
/// fed by an external signal source (typically a long-poll notifier).
///
/// The cursor only ever advances past changes whose cache invalidations have
/// been applied; a failed page leaves the cursor where it was, so the next
/// drain re-reads that page.
pub struct ChangeWatcher {
    remote: Arc<dyn RemoteStore>,
    cache: Arc<MetadataCache>,
    state: Mutex<WatcherState>,
    events: broadcast::Sender<WatchEvent>,
    closed: Notify,
    is_closed: AtomicBool,
}

impl ChangeWatcher {
    /// `cache` must be the same instance the session's driver uses.
    pub fn new(remote: Arc<dyn RemoteStore>, cache: Arc<MetadataCache>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        ChangeWatcher {
            remote,
            cache,
            state: Mutex::new(WatcherState::Uninitialized),
            events,
            closed: Notify::new(),
            is_closed: AtomicBool::new(false),
        }
    }

    /// Subscribe to change events. Events emitted before subscribing are not
    /// replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }

    /// Obtain a cursor for "all changes from now on". Changes that happened
    /// before initialization are never reported.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> Result<(), FsError> {
        let mut state = self.state.lock().await;
        match *state {
            WatcherState::Closed => Err(FsError::Fatal("watcher is closed".to_string())),
            _ => {
                let cursor = self.remote.latest_cursor().await?;
                debug!(cursor = cursor.as_str(), "watcher primed");
                *state = WatcherState::Primed(cursor);
                Ok(())
            }
        }
    }

    /// Drain all pending change pages, returning how many changes were
    /// applied. Concurrent calls are serialized; each change is applied
    /// exactly once.
    #[instrument(skip(self))]
    pub async fn on_signal(&self) -> Result<usize, FsError> {
        let mut state = self.state.lock().await;
        let cursor = match &*state {
            WatcherState::Uninitialized => {
                return Err(FsError::Fatal("watcher is not initialized".to_string()))
            }
            WatcherState::Closed => {
                return Err(FsError::Fatal("watcher is closed".to_string()))
            }
            WatcherState::Primed(cursor) => cursor.clone(),
        };

        let mut current = cursor;
        let mut applied = 0;
        loop {
            let page = match self.remote.changes_since(&current).await {
                Ok(page) => page,
                Err(e) => {
                    // Cursor stays put; the next signal re-reads this page.
                    *state = WatcherState::Primed(current);
                    return Err(e.into());
                }
            };
            for delta in &page.deltas {
                self.cache.remove(&delta.path).await;
                let event = match delta.kind {
                    DeltaKind::Removed => WatchEvent::Deleted(delta.path.clone()),
                    DeltaKind::Upsert => WatchEvent::Modified(delta.path.clone()),
                };
                applied += 1;
                // No receivers is fine; events are best-effort fan-out.
                let _ = self.events.send(event);
            }
            current = page.cursor;
            if !page.has_more {
                break;
            }
        }
        debug!(applied, cursor = current.as_str(), "drained change feed");
        *state = WatcherState::Primed(current);
        Ok(applied)
    }

    /// Drive the watcher from an external signal source until the channel
    /// closes or [`ChangeWatcher::close`] is called. Transient feed errors
    /// are logged and the loop keeps going; anything else ends it.
    pub async fn run(&self, mut signals: mpsc::Receiver<()>) -> Result<(), FsError> {
        loop {
            if self.is_closed.load(Ordering::Acquire) {
                return Ok(());
            }
            tokio::select! {
                _ = self.closed.notified() => return Ok(()),
                signal = signals.recv() => match signal {
                    None => return Ok(()),
                    Some(()) => {
                        if let Err(e) = self.on_signal().await {
                            match e {
                                FsError::Transient(_) => {
                                    warn!(error = %e, "transient change-feed failure, will retry on next signal");
                                }
                                other => return Err(other),
                            }
                        }
                    }
                },
            }
        }
    }

    /// Stop the watcher. Idempotent; a running [`ChangeWatcher::run`] loop
    /// exits, and later `initialize`/`on_signal` calls fail.
    pub async fn close(&self) {
        if self.is_closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut state = self.state.lock().await;
        *state = WatcherState::Closed;
        self.closed.notify_waiters();
        self.closed.notify_one();
        debug!("watcher closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flatfs_store::MemoryStore;

    fn watcher_over(store: &MemoryStore) -> (ChangeWatcher, Arc<MetadataCache>) {
        let remote: Arc<dyn RemoteStore> = Arc::new(store.clone());
        let cache = Arc::new(MetadataCache::new(remote.clone(), None));
        (ChangeWatcher::new(remote, cache.clone()), cache)
    }

    #[tokio::test]
    async fn test_signal_before_initialize_fails() {
        let store = MemoryStore::new();
        let (watcher, _) = watcher_over(&store);

        let err = watcher.on_signal().await.unwrap_err();
        assert!(matches!(err, FsError::Fatal(_)));
    }

    #[tokio::test]
    async fn test_changes_before_initialize_are_not_reported() {
        let store = MemoryStore::new();
        store.put_file("/early.txt", b"x");
        let (watcher, _) = watcher_over(&store);

        watcher.initialize().await.unwrap();
        assert_eq!(watcher.on_signal().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_upsert_invalidates_cache_and_emits_modified() {
        let store = MemoryStore::new();
        let entry = store.put_file("/doc.txt", b"v1");
        let (watcher, cache) = watcher_over(&store);
        watcher.initialize().await.unwrap();
        let mut events = watcher.subscribe();

        cache.put("/doc.txt", entry).await;
        store.put_file("/doc.txt", b"v2 longer");

        assert_eq!(watcher.on_signal().await.unwrap(), 1);
        assert!(cache.cached("/doc.txt").await.is_none());
        assert_eq!(
            events.recv().await.unwrap(),
            WatchEvent::Modified("/doc.txt".to_string())
        );

        // The next lookup refetches the authoritative entry.
        assert_eq!(cache.get("/doc.txt").await.unwrap().size, 9);
    }

    #[tokio::test]
    async fn test_removal_invalidates_cache_and_emits_deleted() {
        let store = MemoryStore::new();
        let entry = store.put_file("/gone.txt", b"x");
        let (watcher, cache) = watcher_over(&store);
        watcher.initialize().await.unwrap();
        let mut events = watcher.subscribe();
        cache.put("/gone.txt", entry).await;

        store.delete("/gone.txt").await.unwrap();

        assert_eq!(watcher.on_signal().await.unwrap(), 1);
        assert!(cache.cached("/gone.txt").await.is_none());
        assert_eq!(
            events.recv().await.unwrap(),
            WatchEvent::Deleted("/gone.txt".to_string())
        );
    }

    #[tokio::test]
    async fn test_drains_multiple_pages_in_one_signal() {
        let store = MemoryStore::with_page_size(2);
        let (watcher, _) = watcher_over(&store);
        watcher.initialize().await.unwrap();

        for i in 0..5 {
            store.put_file(&format!("/f{}.txt", i), b"x");
        }

        assert_eq!(watcher.on_signal().await.unwrap(), 5);
        // Fully drained; nothing left for the next signal.
        assert_eq!(watcher.on_signal().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_transient_failure_keeps_cursor() {
        let store = MemoryStore::new();
        let (watcher, _) = watcher_over(&store);
        watcher.initialize().await.unwrap();

        store.put_file("/a.txt", b"x");
        store.fail_next_changes();

        let err = watcher.on_signal().await.unwrap_err();
        assert!(matches!(err, FsError::Transient(_)));

        // Same change is re-read and applied on the next signal.
        assert_eq!(watcher.on_signal().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_events_are_ordered() {
        let store = MemoryStore::new();
        let (watcher, _) = watcher_over(&store);
        watcher.initialize().await.unwrap();
        let mut events = watcher.subscribe();

        store.put_file("/1.txt", b"x");
        store.put_file("/2.txt", b"x");
        store.delete("/1.txt").await.unwrap();

        watcher.on_signal().await.unwrap();
        assert_eq!(events.recv().await.unwrap().path(), "/1.txt");
        assert_eq!(events.recv().await.unwrap().path(), "/2.txt");
        assert_eq!(
            events.recv().await.unwrap(),
            WatchEvent::Deleted("/1.txt".to_string())
        );
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_final() {
        let store = MemoryStore::new();
        let (watcher, _) = watcher_over(&store);
        watcher.initialize().await.unwrap();

        watcher.close().await;
        watcher.close().await;

        assert!(matches!(
            watcher.on_signal().await.unwrap_err(),
            FsError::Fatal(_)
        ));
        assert!(matches!(
            watcher.initialize().await.unwrap_err(),
            FsError::Fatal(_)
        ));
    }

    #[tokio::test]
    async fn test_run_loop_applies_signals_and_stops_on_close() {
        let store = MemoryStore::new();
        let (watcher, cache) = watcher_over(&store);
        watcher.initialize().await.unwrap();
        let entry = store.put_file("/live.txt", b"x");
        watcher.on_signal().await.unwrap();
        cache.put("/live.txt", entry).await;

        let watcher = Arc::new(watcher);
        let (tx, rx) = mpsc::channel(4);
        let runner = {
            let watcher = watcher.clone();
            tokio::spawn(async move { watcher.run(rx).await })
        };

        store.put_file("/live.txt", b"updated");
        tx.send(()).await.unwrap();

        // The signal is processed asynchronously; wait for the invalidation.
        for _ in 0..100 {
            if cache.cached("/live.txt").await.is_none() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(cache.cached("/live.txt").await.is_none());

        watcher.close().await;
        runner.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_run_loop_survives_transient_errors() {
        let store = MemoryStore::new();
        let (watcher, _) = watcher_over(&store);
        watcher.initialize().await.unwrap();
        let watcher = Arc::new(watcher);

        let (tx, rx) = mpsc::channel(4);
        let runner = {
            let watcher = watcher.clone();
            tokio::spawn(async move { watcher.run(rx).await })
        };

        store.put_file("/a.txt", b"x");
        store.fail_next_changes();
        tx.send(()).await.unwrap();
        tx.send(()).await.unwrap();
        drop(tx);

        // Loop exits cleanly once the signal channel closes.
        runner.await.unwrap().unwrap();
        // Both signals were consumed; the second one applied the change.
        assert_eq!(watcher.on_signal().await.unwrap(), 0);
    }
}

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::change::{ChangePage, Cursor, Delta};
use crate::error::RemoteError;
use crate::traits::{Download, RemoteStore, Upload};
use crate::types::{EntryKind, RemoteEntry};

const DEFAULT_PAGE_SIZE: usize = 16;

/// In-memory remote store for testing.
///
/// Models the provider's actual behavior, not a filesystem's: the namespace
/// is a flat path→object map, delete/copy/rename are recursive with no
/// emptiness checks, uploads create missing parent folders on commit, and
/// every mutation is recorded in a change log that `changes_since` pages
/// through.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

struct Inner {
    state: RwLock<State>,
    page_size: usize,
    metadata_calls: AtomicU64,
    list_calls: AtomicU64,
    fail_next_changes: AtomicBool,
}

struct State {
    objects: HashMap<String, Object>,
    log: Vec<Delta>,
    next_id: u64,
}

#[derive(Clone)]
struct Object {
    id: String,
    kind: EntryKind,
    data: Vec<u8>,
    modified: DateTime<Utc>,
}

/// Normalize to the store's internal key form: no leading or trailing
/// slashes; the account root is the empty string.
fn normalize(path: &str) -> String {
    path.trim_matches('/').to_string()
}

fn display_path(key: &str) -> String {
    format!("/{}", key)
}

fn parent_key(key: &str) -> Option<&str> {
    if key.is_empty() {
        return None;
    }
    Some(key.rsplit_once('/').map_or("", |(parent, _)| parent))
}

impl State {
    fn fresh_id(&mut self) -> String {
        self.next_id += 1;
        format!("obj:{}", self.next_id)
    }

    fn entry_for(&self, key: &str) -> Option<RemoteEntry> {
        self.objects.get(key).map(|obj| RemoteEntry {
            path: display_path(key),
            kind: obj.kind,
            id: obj.id.clone(),
            size: if obj.kind == EntryKind::File {
                obj.data.len() as u64
            } else {
                0
            },
            modified: Some(obj.modified),
        })
    }

    /// Insert or replace the object at `key`, log the upsert, and return the
    /// resulting entry.
    fn insert_object(&mut self, key: &str, kind: EntryKind, data: Vec<u8>) -> RemoteEntry {
        let id = self.fresh_id();
        let modified = Utc::now();
        let size = if kind == EntryKind::File {
            data.len() as u64
        } else {
            0
        };
        self.objects.insert(
            key.to_string(),
            Object {
                id: id.clone(),
                kind,
                data,
                modified,
            },
        );
        self.log.push(Delta::upsert(display_path(key)));
        RemoteEntry {
            path: display_path(key),
            kind,
            id,
            size,
            modified: Some(modified),
        }
    }

    /// Insert folder markers for any missing ancestors of `key`.
    fn ensure_parents(&mut self, key: &str) {
        let mut prefix = String::new();
        let Some((ancestors, _)) = key.rsplit_once('/') else {
            return;
        };
        for segment in ancestors.split('/') {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(segment);
            if !self.objects.contains_key(&prefix) {
                self.insert_object(&prefix, EntryKind::Folder, Vec::new());
            }
        }
    }

    /// Keys equal to `key` or strictly below it, deepest first.
    fn subtree_keys(&self, key: &str) -> Vec<String> {
        let prefix = format!("{}/", key);
        let mut keys: Vec<String> = self
            .objects
            .keys()
            .filter(|k| *k == key || k.starts_with(&prefix))
            .cloned()
            .collect();
        keys.sort_by_key(|k| std::cmp::Reverse(k.len()));
        keys
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    /// A store whose change feed returns at most `page_size` deltas per page.
    pub fn with_page_size(page_size: usize) -> Self {
        MemoryStore {
            inner: Arc::new(Inner {
                state: RwLock::new(State {
                    objects: HashMap::new(),
                    log: Vec::new(),
                    next_id: 0,
                }),
                page_size: page_size.max(1),
                metadata_calls: AtomicU64::new(0),
                list_calls: AtomicU64::new(0),
                fail_next_changes: AtomicBool::new(false),
            }),
        }
    }

    /// Number of `metadata` calls served so far.
    pub fn metadata_calls(&self) -> u64 {
        self.inner.metadata_calls.load(Ordering::Relaxed)
    }

    /// Number of `list_folder` calls served so far.
    pub fn list_calls(&self) -> u64 {
        self.inner.list_calls.load(Ordering::Relaxed)
    }

    /// Arm a one-shot transient failure for the next `changes_since` call.
    pub fn fail_next_changes(&self) {
        self.inner.fail_next_changes.store(true, Ordering::Relaxed);
    }

    /// Create or replace a file directly, bypassing the upload protocol.
    ///
    /// Used by tests to simulate out-of-band remote mutation; the change is
    /// still recorded in the feed.
    pub fn put_file(&self, path: &str, data: &[u8]) -> RemoteEntry {
        let key = normalize(path);
        let mut state = self.write_state();
        state.ensure_parents(&key);
        state.insert_object(&key, EntryKind::File, data.to_vec())
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, State> {
        self.inner.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, State> {
        self.inner.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn metadata(&self, path: &str) -> Result<RemoteEntry, RemoteError> {
        self.inner.metadata_calls.fetch_add(1, Ordering::Relaxed);
        let key = normalize(path);
        if key.is_empty() {
            // The account root is not itself a queryable object.
            return Err(RemoteError::NotFound(path.to_string()));
        }
        self.read_state()
            .entry_for(&key)
            .ok_or_else(|| RemoteError::NotFound(path.to_string()))
    }

    async fn list_folder(&self, path: &str) -> Result<Vec<RemoteEntry>, RemoteError> {
        self.inner.list_calls.fetch_add(1, Ordering::Relaxed);
        let key = normalize(path);
        let state = self.read_state();

        if !key.is_empty() {
            match state.objects.get(&key) {
                None => return Err(RemoteError::NotFound(path.to_string())),
                Some(obj) if obj.kind == EntryKind::File => {
                    return Err(RemoteError::Protocol(format!(
                        "cannot list a file: {}",
                        path
                    )));
                }
                Some(_) => {}
            }
        }

        let mut children: Vec<RemoteEntry> = state
            .objects
            .keys()
            .filter(|k| parent_key(k) == Some(key.as_str()))
            .filter_map(|k| state.entry_for(k))
            .collect();
        children.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(children)
    }

    async fn create_folder(&self, path: &str) -> Result<RemoteEntry, RemoteError> {
        let key = normalize(path);
        if key.is_empty() {
            return Err(RemoteError::Conflict(path.to_string()));
        }
        let mut state = self.write_state();
        if state.objects.contains_key(&key) {
            return Err(RemoteError::Conflict(path.to_string()));
        }
        state.ensure_parents(&key);
        let entry = state.insert_object(&key, EntryKind::Folder, Vec::new());
        debug!(path = %path, "created folder");
        Ok(entry)
    }

    async fn delete(&self, path: &str) -> Result<(), RemoteError> {
        let key = normalize(path);
        let mut state = self.write_state();
        if !state.objects.contains_key(&key) {
            return Err(RemoteError::NotFound(path.to_string()));
        }
        for k in state.subtree_keys(&key) {
            state.objects.remove(&k);
            state.log.push(Delta::removed(display_path(&k)));
        }
        debug!(path = %path, "deleted");
        Ok(())
    }

    async fn copy(&self, from: &str, to: &str) -> Result<RemoteEntry, RemoteError> {
        let from_key = normalize(from);
        let to_key = normalize(to);
        let mut state = self.write_state();
        if !state.objects.contains_key(&from_key) {
            return Err(RemoteError::NotFound(from.to_string()));
        }
        if state.objects.contains_key(&to_key) {
            return Err(RemoteError::Conflict(to.to_string()));
        }
        state.ensure_parents(&to_key);
        let mut keys = state.subtree_keys(&from_key);
        keys.reverse(); // parents before children
        for k in keys {
            let Some(obj) = state.objects.get(&k).cloned() else {
                continue;
            };
            let new_key = format!("{}{}", to_key, &k[from_key.len()..]);
            state.insert_object(&new_key, obj.kind, obj.data);
        }
        state
            .entry_for(&to_key)
            .ok_or_else(|| RemoteError::Protocol(format!("copy left nothing at: {}", to)))
    }

    async fn rename(&self, from: &str, to: &str) -> Result<RemoteEntry, RemoteError> {
        let from_key = normalize(from);
        let to_key = normalize(to);
        let mut state = self.write_state();
        if !state.objects.contains_key(&from_key) {
            return Err(RemoteError::NotFound(from.to_string()));
        }
        if state.objects.contains_key(&to_key) {
            return Err(RemoteError::Conflict(to.to_string()));
        }
        state.ensure_parents(&to_key);
        let mut keys = state.subtree_keys(&from_key);
        keys.reverse();
        for k in keys {
            let Some(obj) = state.objects.remove(&k) else {
                continue;
            };
            let new_key = format!("{}{}", to_key, &k[from_key.len()..]);
            state.log.push(Delta::removed(display_path(&k)));
            state.insert_object(&new_key, obj.kind, obj.data);
        }
        debug!(from = %from, to = %to, "renamed");
        state
            .entry_for(&to_key)
            .ok_or_else(|| RemoteError::Protocol(format!("rename left nothing at: {}", to)))
    }

    async fn open_download(&self, path: &str) -> Result<Box<dyn Download>, RemoteError> {
        let key = normalize(path);
        let state = self.read_state();
        match state.objects.get(&key) {
            None => Err(RemoteError::NotFound(path.to_string())),
            Some(obj) if obj.kind == EntryKind::Folder => Err(RemoteError::Protocol(format!(
                "cannot download a folder: {}",
                path
            ))),
            Some(obj) => Ok(Box::new(MemoryDownload {
                remaining: Some(obj.data.clone()),
            })),
        }
    }

    async fn open_upload(&self, path: &str) -> Result<Box<dyn Upload>, RemoteError> {
        Ok(Box::new(MemoryUpload {
            store: self.clone(),
            path: path.to_string(),
            buf: Vec::new(),
            done: false,
        }))
    }

    async fn latest_cursor(&self) -> Result<Cursor, RemoteError> {
        let state = self.read_state();
        Ok(Cursor::new(state.log.len().to_string()))
    }

    async fn changes_since(&self, cursor: &Cursor) -> Result<ChangePage, RemoteError> {
        if self.inner.fail_next_changes.swap(false, Ordering::Relaxed) {
            return Err(RemoteError::transient(
                "changes_since",
                std::io::Error::other("injected fault"),
            ));
        }
        let start: usize = cursor
            .as_str()
            .parse()
            .map_err(|_| RemoteError::Protocol(format!("bad cursor: {}", cursor.as_str())))?;
        let state = self.read_state();
        let start = start.min(state.log.len());
        let end = (start + self.inner.page_size).min(state.log.len());
        Ok(ChangePage {
            deltas: state.log[start..end].to_vec(),
            cursor: Cursor::new(end.to_string()),
            has_more: end < state.log.len(),
        })
    }
}

struct MemoryDownload {
    remaining: Option<Vec<u8>>,
}

#[async_trait]
impl Download for MemoryDownload {
    async fn chunk(&mut self) -> Result<Option<Vec<u8>>, RemoteError> {
        Ok(self.remaining.take().filter(|d| !d.is_empty()))
    }

    async fn close(&mut self) -> Result<(), RemoteError> {
        self.remaining = None;
        Ok(())
    }
}

struct MemoryUpload {
    store: MemoryStore,
    path: String,
    buf: Vec<u8>,
    done: bool,
}

#[async_trait]
impl Upload for MemoryUpload {
    async fn push(&mut self, data: &[u8]) -> Result<(), RemoteError> {
        if self.done {
            return Err(RemoteError::Protocol("upload already finished".to_string()));
        }
        self.buf.extend_from_slice(data);
        Ok(())
    }

    async fn finish(&mut self) -> Result<RemoteEntry, RemoteError> {
        if self.done {
            return Err(RemoteError::Protocol("upload already finished".to_string()));
        }
        self.done = true;
        let key = normalize(&self.path);
        let mut state = self.store.write_state();
        if let Some(existing) = state.objects.get(&key) {
            if existing.kind == EntryKind::Folder {
                // A folder appeared at this path while the upload was open.
                return Err(RemoteError::Conflict(self.path.clone()));
            }
        }
        state.ensure_parents(&key);
        Ok(state.insert_object(&key, EntryKind::File, std::mem::take(&mut self.buf)))
    }

    async fn abort(&mut self) -> Result<(), RemoteError> {
        self.done = true;
        self.buf.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::DeltaKind;

    async fn upload(store: &MemoryStore, path: &str, data: &[u8]) -> RemoteEntry {
        let mut up = store.open_upload(path).await.unwrap();
        up.push(data).await.unwrap();
        up.finish().await.unwrap()
    }

    async fn download(store: &MemoryStore, path: &str) -> Vec<u8> {
        let mut down = store.open_download(path).await.unwrap();
        let mut out = Vec::new();
        while let Some(chunk) = down.chunk().await.unwrap() {
            out.extend_from_slice(&chunk);
        }
        down.close().await.unwrap();
        out
    }

    #[tokio::test]
    async fn test_upload_and_download() {
        let store = MemoryStore::new();
        let entry = upload(&store, "/a.txt", b"hello").await;
        assert_eq!(entry.size, 5);
        assert!(entry.is_file());
        assert_eq!(download(&store, "/a.txt").await, b"hello");
    }

    #[tokio::test]
    async fn test_metadata_not_found() {
        let store = MemoryStore::new();
        let err = store.metadata("/missing").await.unwrap_err();
        assert!(matches!(err, RemoteError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_root_metadata_not_queryable() {
        let store = MemoryStore::new();
        let err = store.metadata("/").await.unwrap_err();
        assert!(matches!(err, RemoteError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_upload_creates_parent_folders() {
        let store = MemoryStore::new();
        upload(&store, "/a/b/c.txt", b"x").await;

        let entry = store.metadata("/a").await.unwrap();
        assert!(entry.is_folder());
        let entry = store.metadata("/a/b").await.unwrap();
        assert!(entry.is_folder());
    }

    #[tokio::test]
    async fn test_list_folder_direct_children_only() {
        let store = MemoryStore::new();
        upload(&store, "/dir/one.txt", b"1").await;
        upload(&store, "/dir/sub/two.txt", b"2").await;

        let children = store.list_folder("/dir").await.unwrap();
        let paths: Vec<_> = children.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["/dir/one.txt", "/dir/sub"]);
    }

    #[tokio::test]
    async fn test_list_root() {
        let store = MemoryStore::new();
        upload(&store, "/top.txt", b"t").await;
        store.create_folder("/dir").await.unwrap();

        let children = store.list_folder("/").await.unwrap();
        assert_eq!(children.len(), 2);
    }

    #[tokio::test]
    async fn test_create_folder_conflict() {
        let store = MemoryStore::new();
        store.create_folder("/dir").await.unwrap();
        let err = store.create_folder("/dir").await.unwrap_err();
        assert!(matches!(err, RemoteError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_delete_is_recursive() {
        let store = MemoryStore::new();
        upload(&store, "/dir/inner/file.txt", b"x").await;

        store.delete("/dir").await.unwrap();
        assert!(store.metadata("/dir").await.is_err());
        assert!(store.metadata("/dir/inner/file.txt").await.is_err());
    }

    #[tokio::test]
    async fn test_rename_moves_subtree() {
        let store = MemoryStore::new();
        upload(&store, "/old/deep/file.txt", b"x").await;

        store.rename("/old", "/new").await.unwrap();
        assert!(store.metadata("/old").await.is_err());
        assert_eq!(download(&store, "/new/deep/file.txt").await, b"x");
    }

    #[tokio::test]
    async fn test_copy_keeps_source() {
        let store = MemoryStore::new();
        upload(&store, "/src.txt", b"data").await;

        let entry = store.copy("/src.txt", "/dst.txt").await.unwrap();
        assert_eq!(entry.path, "/dst.txt");
        assert_eq!(download(&store, "/src.txt").await, b"data");
        assert_eq!(download(&store, "/dst.txt").await, b"data");
    }

    #[tokio::test]
    async fn test_change_feed_pages() {
        let store = MemoryStore::with_page_size(2);
        let cursor = store.latest_cursor().await.unwrap();

        upload(&store, "/a.txt", b"a").await;
        upload(&store, "/b.txt", b"b").await;
        upload(&store, "/c.txt", b"c").await;

        let page = store.changes_since(&cursor).await.unwrap();
        assert_eq!(page.deltas.len(), 2);
        assert!(page.has_more);

        let page = store.changes_since(&page.cursor).await.unwrap();
        assert_eq!(page.deltas.len(), 1);
        assert!(!page.has_more);
        assert_eq!(page.deltas[0].path, "/c.txt");
        assert_eq!(page.deltas[0].kind, DeltaKind::Upsert);
    }

    #[tokio::test]
    async fn test_change_feed_reports_removal() {
        let store = MemoryStore::new();
        upload(&store, "/gone.txt", b"x").await;
        let cursor = store.latest_cursor().await.unwrap();

        store.delete("/gone.txt").await.unwrap();
        let page = store.changes_since(&cursor).await.unwrap();
        assert_eq!(page.deltas.len(), 1);
        assert_eq!(page.deltas[0].kind, DeltaKind::Removed);
    }

    #[tokio::test]
    async fn test_injected_transient_fault_is_one_shot() {
        let store = MemoryStore::new();
        let cursor = store.latest_cursor().await.unwrap();

        store.fail_next_changes();
        let err = store.changes_since(&cursor).await.unwrap_err();
        assert!(err.is_transient());

        store.changes_since(&cursor).await.unwrap();
    }

    #[tokio::test]
    async fn test_upload_conflicts_with_folder() {
        let store = MemoryStore::new();
        let mut up = store.open_upload("/taken").await.unwrap();
        store.create_folder("/taken").await.unwrap();
        up.push(b"x").await.unwrap();
        let err = up.finish().await.unwrap_err();
        assert!(matches!(err, RemoteError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_call_counters() {
        let store = MemoryStore::new();
        upload(&store, "/a.txt", b"a").await;
        assert_eq!(store.metadata_calls(), 0);
        store.metadata("/a.txt").await.unwrap();
        store.metadata("/a.txt").await.unwrap();
        assert_eq!(store.metadata_calls(), 2);
    }
}

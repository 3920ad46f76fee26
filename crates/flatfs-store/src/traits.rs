use async_trait::async_trait;

use crate::change::{ChangePage, Cursor};
use crate::error::RemoteError;
use crate::types::RemoteEntry;

/// Capability interface to a remote object-storage account.
///
/// The store is a flat path→metadata namespace: no real directory entries, no
/// atomic rename guarantees beyond what `rename` provides, no append. Every
/// mutating call returns the authoritative new entry so callers can update
/// their view from the response instead of guessing.
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    /// Get metadata for a single path.
    async fn metadata(&self, path: &str) -> Result<RemoteEntry, RemoteError>;

    /// List the direct children of a folder in one atomic snapshot.
    async fn list_folder(&self, path: &str) -> Result<Vec<RemoteEntry>, RemoteError>;

    /// Create a folder marker. Fails with `Conflict` if the path is taken.
    async fn create_folder(&self, path: &str) -> Result<RemoteEntry, RemoteError>;

    /// Delete the object at `path`. The remote deletes recursively; callers
    /// that need emptiness semantics must enforce them before calling.
    async fn delete(&self, path: &str) -> Result<(), RemoteError>;

    /// Copy `from` to `to`, returning the entry created at `to`.
    async fn copy(&self, from: &str, to: &str) -> Result<RemoteEntry, RemoteError>;

    /// Move `from` to the full destination path `to`, returning the entry now
    /// at `to`. Covers both same-parent renames and cross-parent moves.
    async fn rename(&self, from: &str, to: &str) -> Result<RemoteEntry, RemoteError>;

    /// Open a streaming download of a file's content.
    async fn open_download(&self, path: &str) -> Result<Box<dyn Download>, RemoteError>;

    /// Open a streaming upload. Nothing is visible at `path` until
    /// [`Upload::finish`] commits.
    async fn open_upload(&self, path: &str) -> Result<Box<dyn Upload>, RemoteError>;

    /// Cursor representing "all changes up to now".
    async fn latest_cursor(&self) -> Result<Cursor, RemoteError>;

    /// One page of changes recorded after `cursor`.
    async fn changes_since(&self, cursor: &Cursor) -> Result<ChangePage, RemoteError>;
}

/// A remote download in progress.
///
/// `close` must be called on every exit path, including after partial
/// consumption, so the remote-side handle is released.
#[async_trait]
pub trait Download: Send {
    /// Next chunk of content, or `None` at end of stream.
    async fn chunk(&mut self) -> Result<Option<Vec<u8>>, RemoteError>;

    /// Release the remote handle.
    async fn close(&mut self) -> Result<(), RemoteError>;
}

/// A remote upload in progress.
#[async_trait]
pub trait Upload: Send {
    /// Stage more content.
    async fn push(&mut self, data: &[u8]) -> Result<(), RemoteError>;

    /// Commit the upload. The returned entry is the authoritative metadata
    /// for the new object. Commit failures surface here, never silently.
    async fn finish(&mut self) -> Result<RemoteEntry, RemoteError>;

    /// Discard staged content and release the remote handle.
    async fn abort(&mut self) -> Result<(), RemoteError>;
}

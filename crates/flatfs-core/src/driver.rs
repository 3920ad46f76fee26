use std::sync::Arc;

use flatfs_store::{Download, RemoteEntry, RemoteStore, Upload};
use tracing::{debug, instrument};

use crate::cache::MetadataCache;
use crate::config::SessionOptions;
use crate::error::FsError;
use crate::path;

/// Access mode checked by [`FsDriver::check_access`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
    Execute,
}

/// Translates POSIX-shaped filesystem operations into remote-store calls,
/// keeping the metadata cache coherent as it goes.
///
/// Existence and type checks consult the cache first; every mutation updates
/// the cache from the remote's authoritative response. Check-and-act races
/// against concurrent remote mutations are resolved by the remote itself,
/// whose conflict response is surfaced as `AlreadyExists` or `Conflict`.
pub struct FsDriver {
    remote: Arc<dyn RemoteStore>,
    cache: Arc<MetadataCache>,
    options: SessionOptions,
}

impl FsDriver {
    pub fn new(remote: Arc<dyn RemoteStore>, options: SessionOptions) -> Self {
        let cache = Arc::new(MetadataCache::new(remote.clone(), options.hidden.clone()));
        FsDriver {
            remote,
            cache,
            options,
        }
    }

    /// The cache shared with this driver. A change watcher for the same
    /// session must be wired to this exact instance.
    pub fn cache(&self) -> &Arc<MetadataCache> {
        &self.cache
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    fn replace(&self, replace: Option<bool>) -> bool {
        replace.unwrap_or(self.options.replace_on_conflict)
    }

    /// Resolve a path to its current metadata.
    #[instrument(skip(self))]
    pub async fn metadata(&self, path: &str) -> Result<RemoteEntry, FsError> {
        self.cache.get(&path::normalize(path)).await
    }

    /// Open a file for streaming reads.
    #[instrument(skip(self))]
    pub async fn read(&self, path: &str) -> Result<FileReader, FsError> {
        let p = path::normalize(path);
        let entry = self.cache.get(&p).await?;
        if entry.is_folder() {
            return Err(FsError::IsADirectory(p));
        }
        let download = self.remote.open_download(&p).await?;
        Ok(FileReader { inner: download })
    }

    /// Read a whole file into memory.
    pub async fn read_all(&self, path: &str) -> Result<Vec<u8>, FsError> {
        self.read(path).await?.read_to_end().await
    }

    /// Open a file for streaming writes, using the session's replace policy.
    pub async fn write(&self, path: &str) -> Result<FileWriter, FsError> {
        self.write_with(path, None).await
    }

    /// Open a file for streaming writes. `replace: None` uses the session
    /// default. Nothing is visible at the path until [`FileWriter::close`]
    /// commits; readers racing the upload see the old content or nothing.
    #[instrument(skip(self))]
    pub async fn write_with(
        &self,
        path: &str,
        replace: Option<bool>,
    ) -> Result<FileWriter, FsError> {
        let p = path::normalize(path);
        match self.cache.get(&p).await {
            Ok(entry) if entry.is_folder() => return Err(FsError::IsADirectory(p)),
            Ok(_) if !self.replace(replace) => return Err(FsError::AlreadyExists(p)),
            Ok(_) | Err(FsError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        let upload = self.remote.open_upload(&p).await?;
        Ok(FileWriter {
            upload,
            cache: self.cache.clone(),
            path: p,
        })
    }

    /// Write a whole buffer as one file, using the session's replace policy.
    pub async fn write_all(&self, path: &str, data: &[u8]) -> Result<RemoteEntry, FsError> {
        let mut writer = self.write(path).await?;
        writer.write(data).await?;
        writer.close().await
    }

    /// Create a folder. Fails if anything already exists at the path.
    #[instrument(skip(self))]
    pub async fn mkdir(&self, path: &str) -> Result<RemoteEntry, FsError> {
        let p = path::normalize(path);
        match self.cache.get(&p).await {
            Ok(_) => return Err(FsError::AlreadyExists(p)),
            Err(FsError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        let entry = self
            .remote
            .create_folder(&p)
            .await
            .map_err(|e| FsError::conflict_as_exists(e, &p))?;
        self.cache.put(&p, entry.clone()).await;
        Ok(entry)
    }

    /// Child paths of a folder.
    #[instrument(skip(self))]
    pub async fn read_dir(&self, path: &str) -> Result<Vec<String>, FsError> {
        self.cache.list_children(&path::normalize(path)).await
    }

    /// Delete a file or an empty folder.
    #[instrument(skip(self))]
    pub async fn delete(&self, path: &str) -> Result<(), FsError> {
        let p = path::normalize(path);
        let entry = self.cache.get(&p).await?;
        if entry.is_folder() && !self.cache.list_children(&p).await?.is_empty() {
            return Err(FsError::DirectoryNotEmpty(p));
        }
        match self.remote.delete(&p).await {
            Ok(()) => {
                self.cache.remove(&p).await;
                debug!(path = %p, "deleted");
                Ok(())
            }
            Err(flatfs_store::RemoteError::NotFound(_)) => {
                // Someone else won the race; the entry was stale.
                self.cache.remove(&p).await;
                Err(FsError::NotFound(p))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Copy a file. Folders are rejected; copy contents entry by entry
    /// instead. `replace: None` uses the session default.
    #[instrument(skip(self))]
    pub async fn copy(
        &self,
        src: &str,
        dst: &str,
        replace: Option<bool>,
    ) -> Result<RemoteEntry, FsError> {
        let src = path::normalize(src);
        let dst = path::normalize(dst);
        let src_entry = self.cache.get(&src).await?;
        if src_entry.is_folder() {
            return Err(FsError::IsADirectory(src));
        }
        match self.cache.get(&dst).await {
            Ok(_) if !self.replace(replace) => return Err(FsError::AlreadyExists(dst)),
            Ok(existing) => {
                if existing.is_folder() && !self.cache.list_children(&dst).await?.is_empty() {
                    return Err(FsError::DirectoryNotEmpty(dst));
                }
                self.remote.delete(&dst).await?;
                self.cache.remove(&dst).await;
            }
            Err(FsError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        let entry = self
            .remote
            .copy(&src, &dst)
            .await
            .map_err(|e| FsError::conflict_as_exists(e, &dst))?;
        self.cache.put(&dst, entry.clone()).await;
        Ok(entry)
    }

    /// Move or rename. When the destination is an existing folder and replace
    /// was not requested, the source moves INTO it, keeping its basename.
    /// Returns the entry at its final location.
    #[instrument(skip(self))]
    pub async fn rename(
        &self,
        src: &str,
        dst: &str,
        replace: Option<bool>,
    ) -> Result<RemoteEntry, FsError> {
        let src = path::normalize(src);
        let dst = path::normalize(dst);
        self.cache.get(&src).await?;

        match self.cache.get(&dst).await {
            Ok(dst_entry) if dst_entry.is_folder() && !self.replace(replace) => {
                let target = path::join(&dst, path::basename(&src));
                let entry = self
                    .remote
                    .rename(&src, &target)
                    .await
                    .map_err(|e| FsError::conflict_as_exists(e, &target))?;
                debug!(src = %src, dst = %target, "moved into folder");
                self.cache.move_entry(&src, &target, entry.clone()).await;
                Ok(entry)
            }
            Ok(dst_entry) if self.replace(replace) => {
                if dst_entry.is_folder() && !self.cache.list_children(&dst).await?.is_empty() {
                    return Err(FsError::DirectoryNotEmpty(dst));
                }
                self.remote.delete(&dst).await?;
                self.cache.remove(&dst).await;
                let entry = self.remote.rename(&src, &dst).await?;
                debug!(src = %src, dst = %dst, "replaced destination");
                self.cache.move_entry(&src, &dst, entry.clone()).await;
                Ok(entry)
            }
            Ok(_) => Err(FsError::AlreadyExists(dst)),
            Err(FsError::NotFound(_)) => {
                let entry = self
                    .remote
                    .rename(&src, &dst)
                    .await
                    .map_err(|e| FsError::conflict_as_exists(e, &dst))?;
                debug!(src = %src, dst = %dst, "renamed");
                self.cache.move_entry(&src, &dst, entry.clone()).await;
                Ok(entry)
            }
            Err(e) => Err(e),
        }
    }

    /// Verify that every requested access mode is available. Files are never
    /// executable; folders allow all modes.
    #[instrument(skip(self))]
    pub async fn check_access(&self, path: &str, modes: &[AccessMode]) -> Result<(), FsError> {
        let p = path::normalize(path);
        let entry = self.cache.get(&p).await?;
        if entry.is_file() && modes.contains(&AccessMode::Execute) {
            return Err(FsError::AccessDenied(p));
        }
        Ok(())
    }

    /// Close the session: all cached state is dropped.
    pub async fn close(&self) {
        self.cache.clear().await;
    }
}

/// Streaming read handle. Call [`FileReader::close`] on every exit path.
pub struct FileReader {
    inner: Box<dyn Download>,
}

impl std::fmt::Debug for FileReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileReader").finish_non_exhaustive()
    }
}

impl FileReader {
    /// Next chunk of content, or `None` at end of stream.
    pub async fn chunk(&mut self) -> Result<Option<Vec<u8>>, FsError> {
        Ok(self.inner.chunk().await?)
    }

    /// Release the remote handle.
    pub async fn close(mut self) -> Result<(), FsError> {
        self.inner.close().await?;
        Ok(())
    }

    /// Drain the stream into one buffer, releasing the handle on every exit
    /// path.
    pub async fn read_to_end(mut self) -> Result<Vec<u8>, FsError> {
        let mut out = Vec::new();
        loop {
            match self.inner.chunk().await {
                Ok(Some(chunk)) => out.extend_from_slice(&chunk),
                Ok(None) => break,
                Err(e) => {
                    let _ = self.inner.close().await;
                    return Err(e.into());
                }
            }
        }
        self.inner.close().await?;
        Ok(out)
    }
}

/// Streaming write handle. Content is staged until [`FileWriter::close`]
/// commits; [`FileWriter::abort`] discards it.
pub struct FileWriter {
    upload: Box<dyn Upload>,
    cache: Arc<MetadataCache>,
    path: String,
}

impl std::fmt::Debug for FileWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWriter")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl FileWriter {
    /// Stage more content. A failed push aborts the upload before the error
    /// propagates, so the remote handle is never leaked.
    pub async fn write(&mut self, data: &[u8]) -> Result<(), FsError> {
        if let Err(e) = self.upload.push(data).await {
            let _ = self.upload.abort().await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Commit the upload. The remote's authoritative entry for the new
    /// content is cached and returned; commit failures surface here.
    pub async fn close(mut self) -> Result<RemoteEntry, FsError> {
        let entry = self.upload.finish().await?;
        debug!(path = %self.path, size = entry.size, "upload committed");
        self.cache.put(&self.path, entry.clone()).await;
        Ok(entry)
    }

    /// Discard staged content.
    pub async fn abort(mut self) -> Result<(), FsError> {
        self.upload.abort().await?;
        Ok(())
    }
}

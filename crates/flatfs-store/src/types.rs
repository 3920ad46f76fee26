use chrono::{DateTime, Utc};

/// Whether an entry is a plain file or a folder.
///
/// The remote namespace is flat; folders are markers, not containers, but the
/// distinction still drives every filesystem contract above this layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Folder,
}

/// Metadata for one remote object as last observed.
#[derive(Debug, Clone)]
pub struct RemoteEntry {
    /// Normalized absolute path ("/a/b"; "/" only for the synthesized root).
    pub path: String,
    /// File or folder.
    pub kind: EntryKind,
    /// Opaque provider identifier. Diagnostics only; never a cache key.
    pub id: String,
    /// Size in bytes. Always 0 for folders.
    pub size: u64,
    /// Best-available modification time, if the provider reports one.
    pub modified: Option<DateTime<Utc>>,
}

impl RemoteEntry {
    /// Create a file entry.
    pub fn file(
        path: impl Into<String>,
        id: impl Into<String>,
        size: u64,
        modified: Option<DateTime<Utc>>,
    ) -> Self {
        RemoteEntry {
            path: path.into(),
            kind: EntryKind::File,
            id: id.into(),
            size,
            modified,
        }
    }

    /// Create a folder entry.
    pub fn folder(
        path: impl Into<String>,
        id: impl Into<String>,
        modified: Option<DateTime<Utc>>,
    ) -> Self {
        RemoteEntry {
            path: path.into(),
            kind: EntryKind::Folder,
            id: id.into(),
            size: 0,
            modified,
        }
    }

    /// Basename of the entry's path.
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    pub fn is_folder(&self) -> bool {
        self.kind == EntryKind::Folder
    }
}

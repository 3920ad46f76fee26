use flatfs_store::RemoteError;

/// Errors surfaced by filesystem operations.
///
/// Every public operation returns exactly one of these kinds; underlying
/// remote causes are normalized to the closest filesystem-contract kind
/// before reaching the caller.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum FsError {
    /// Path does not exist.
    #[error("path not found: {0}")]
    NotFound(String),

    /// Destination already exists and replacing was not requested.
    #[error("path already exists: {0}")]
    AlreadyExists(String),

    /// Operation requires a file but the path is a folder.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// Operation requires a folder but the path is a file.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Folder must be empty for this operation.
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    /// The requested access mode is not available.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// A racing remote mutation won.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Safe to retry the whole operation. The driver never retries on its
    /// own; the calling layer owns retry policy.
    #[error("transient failure")]
    Transient(#[source] RemoteError),

    /// Unexpected provider response shape.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl From<RemoteError> for FsError {
    fn from(e: RemoteError) -> Self {
        match e {
            RemoteError::NotFound(path) => FsError::NotFound(path),
            RemoteError::Conflict(path) => FsError::Conflict(path),
            RemoteError::Permission(path) => FsError::AccessDenied(path),
            RemoteError::Protocol(msg) => FsError::Fatal(msg),
            transient @ RemoteError::Transient { .. } => FsError::Transient(transient),
            other => FsError::Fatal(other.to_string()),
        }
    }
}

impl FsError {
    /// Normalize a remote conflict into `AlreadyExists`, for create-shaped
    /// operations where the remote's conflict response is the tie-breaker
    /// between racing creators.
    pub(crate) fn conflict_as_exists(e: RemoteError, path: &str) -> Self {
        match e {
            RemoteError::Conflict(_) => FsError::AlreadyExists(path.to_string()),
            other => other.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_remote_not_found() {
        let err: FsError = RemoteError::NotFound("/x".to_string()).into();
        assert!(matches!(err, FsError::NotFound(p) if p == "/x"));
    }

    #[test]
    fn test_from_remote_permission() {
        let err: FsError = RemoteError::Permission("/x".to_string()).into();
        assert!(matches!(err, FsError::AccessDenied(_)));
    }

    #[test]
    fn test_from_remote_transient_keeps_source() {
        let remote = RemoteError::transient("metadata", std::io::Error::other("reset"));
        let err: FsError = remote.into();
        assert!(matches!(err, FsError::Transient(_)));
    }

    #[test]
    fn test_from_remote_protocol_is_fatal() {
        let err: FsError = RemoteError::Protocol("weird payload".to_string()).into();
        assert!(matches!(err, FsError::Fatal(_)));
    }

    #[test]
    fn test_conflict_as_exists() {
        let err = FsError::conflict_as_exists(RemoteError::Conflict("/d".to_string()), "/d");
        assert!(matches!(err, FsError::AlreadyExists(p) if p == "/d"));
    }

    #[test]
    fn test_conflict_as_exists_passes_others_through() {
        let err = FsError::conflict_as_exists(RemoteError::NotFound("/d".to_string()), "/d");
        assert!(matches!(err, FsError::NotFound(_)));
    }
}

/// Errors reported by a remote object store.
///
/// Provider SDKs map their specific error codes into this taxonomy so the
/// layers above stay provider-agnostic.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum RemoteError {
    /// No object exists at the path.
    #[error("remote path not found: {0}")]
    NotFound(String),

    /// A racing mutation won; the remote rejected this one.
    #[error("remote conflict at: {0}")]
    Conflict(String),

    /// The account is not allowed to perform the operation.
    #[error("remote permission denied: {0}")]
    Permission(String),

    /// Network failure, rate limit, or other condition where retrying the
    /// whole operation is safe.
    #[error("transient remote failure during '{operation}'")]
    Transient {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The provider returned a response shape this client does not understand.
    #[error("unexpected remote response: {0}")]
    Protocol(String),
}

impl RemoteError {
    /// Returns true if the operation may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Transient { .. })
    }

    /// Convenience constructor for transient transport failures.
    pub fn transient(
        operation: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        RemoteError::Transient {
            operation: operation.into(),
            source: Box::new(source),
        }
    }
}

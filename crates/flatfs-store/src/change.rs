/// Opaque position in the remote change-delta feed.
///
/// Only ever produced by the remote store and handed back to it; lives for
/// one filesystem session, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(token: impl Into<String>) -> Self {
        Cursor(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// What a single delta reports about a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaKind {
    /// Created or modified. Payload metadata is not trusted for correctness;
    /// consumers invalidate and refetch.
    Upsert,
    /// Deleted remotely.
    Removed,
}

/// One reported remote change since a cursor.
#[derive(Debug, Clone)]
pub struct Delta {
    pub path: String,
    pub kind: DeltaKind,
}

impl Delta {
    pub fn upsert(path: impl Into<String>) -> Self {
        Delta {
            path: path.into(),
            kind: DeltaKind::Upsert,
        }
    }

    pub fn removed(path: impl Into<String>) -> Self {
        Delta {
            path: path.into(),
            kind: DeltaKind::Removed,
        }
    }
}

/// One page of the change feed.
#[derive(Debug, Clone)]
pub struct ChangePage {
    /// Deltas in the order the remote reported them.
    pub deltas: Vec<Delta>,
    /// Cursor covering everything up to and including this page.
    pub cursor: Cursor,
    /// Whether another page is immediately available.
    pub has_more: bool,
}

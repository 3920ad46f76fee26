use std::collections::HashMap;
use std::sync::Arc;

use flatfs_store::{RemoteEntry, RemoteError, RemoteStore};
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::config::HiddenFilter;
use crate::error::FsError;
use crate::path;

/// Cache statistics.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Entry lookups answered from the cache.
    pub hits: u64,
    /// Entry lookups that went to the remote.
    pub misses: u64,
    /// Entries currently cached.
    pub entries: usize,
    /// Directory listings currently cached.
    pub listings: usize,
}

struct CacheState {
    entries: HashMap<String, RemoteEntry>,
    listings: HashMap<String, Vec<String>>,
    stats: CacheStats,
}

/// In-memory mapping of normalized path → last-observed remote entry, plus
/// per-folder child listings.
///
/// This is the single source of truth for what the driver currently believes
/// about a path. Absence means "unknown", never "does not exist"; an absent
/// path forces a remote lookup. A cached listing is always fetched as one
/// atomic snapshot and every child in it is also cached under its own path.
///
/// One coarse `RwLock` guards the whole cache. The lock is never held across
/// a remote call, so two concurrent misses for the same path may both fetch;
/// the second insert simply replaces the first (a path maps to at most one
/// entry at a time).
pub struct MetadataCache {
    remote: Arc<dyn RemoteStore>,
    hidden: Option<HiddenFilter>,
    state: RwLock<CacheState>,
}

fn root_entry() -> RemoteEntry {
    // The account root may not be a queryable remote object; it is
    // synthesized locally and never fetched.
    RemoteEntry::folder("/", "root", None)
}

impl MetadataCache {
    pub fn new(remote: Arc<dyn RemoteStore>, hidden: Option<HiddenFilter>) -> Self {
        MetadataCache {
            remote,
            hidden,
            state: RwLock::new(CacheState {
                entries: HashMap::new(),
                listings: HashMap::new(),
                stats: CacheStats::default(),
            }),
        }
    }

    fn is_hidden(&self, p: &str) -> bool {
        match &self.hidden {
            Some(filter) => filter(path::basename(p)),
            None => false,
        }
    }

    /// Resolve a path to its entry, fetching from the remote on a miss.
    ///
    /// A remote not-found clears any stale state for the path before the
    /// error propagates, so a wrong belief never outlives the lookup that
    /// disproved it.
    pub async fn get(&self, p: &str) -> Result<RemoteEntry, FsError> {
        if path::segment_count(p) == 0 {
            return Ok(root_entry());
        }
        if self.is_hidden(p) {
            trace!(path = %p, "hidden path, skipping remote lookup");
            return Err(FsError::NotFound(p.to_string()));
        }

        {
            let mut state = self.state.write().await;
            if let Some(entry) = state.entries.get(p) {
                let entry = entry.clone();
                state.stats.hits += 1;
                trace!(path = %p, "cache hit");
                return Ok(entry);
            }
            state.stats.misses += 1;
        }

        match self.remote.metadata(p).await {
            Ok(entry) => {
                let mut state = self.state.write().await;
                debug!(path = %p, "cached entry from remote");
                state.entries.insert(p.to_string(), entry.clone());
                state.stats.entries = state.entries.len();
                Ok(entry)
            }
            Err(RemoteError::NotFound(_)) => {
                self.evict(p).await;
                Err(FsError::NotFound(p.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Entry currently cached for `p`, if any. Never touches the remote.
    pub async fn cached(&self, p: &str) -> Option<RemoteEntry> {
        self.state.read().await.entries.get(p).cloned()
    }

    /// Install an entry at `p`, replacing any previous one. The parent's
    /// listing is invalidated: its child set may have changed.
    pub async fn put(&self, p: &str, entry: RemoteEntry) {
        let mut state = self.state.write().await;
        state.entries.insert(p.to_string(), entry);
        if let Some(parent) = path::parent(p) {
            state.listings.remove(&parent);
        }
        state.stats.entries = state.entries.len();
        state.stats.listings = state.listings.len();
    }

    /// Forget everything about `p`: its entry, its own listing, and the
    /// parent's listing (the parent's child set changed).
    pub async fn remove(&self, p: &str) {
        let mut state = self.state.write().await;
        state.entries.remove(p);
        state.listings.remove(p);
        if let Some(parent) = path::parent(p) {
            state.listings.remove(&parent);
        }
        state.stats.entries = state.entries.len();
        state.stats.listings = state.listings.len();
    }

    /// Like `remove`, but keeps parents' listings intact. Used when a lookup
    /// disproved a stale entry without implying the parent changed.
    async fn evict(&self, p: &str) {
        let mut state = self.state.write().await;
        if state.entries.remove(p).is_some() {
            debug!(path = %p, "evicted stale entry");
        }
        state.listings.remove(p);
        state.stats.entries = state.entries.len();
        state.stats.listings = state.listings.len();
    }

    /// Child paths of a folder, from the cached listing or one atomic remote
    /// listing. Every child entry is cached individually alongside the
    /// listing itself.
    pub async fn list_children(&self, p: &str) -> Result<Vec<String>, FsError> {
        let entry = self.get(p).await?;
        if entry.is_file() {
            return Err(FsError::NotADirectory(p.to_string()));
        }

        {
            let state = self.state.read().await;
            if let Some(listing) = state.listings.get(p) {
                trace!(path = %p, "listing hit");
                return Ok(listing.clone());
            }
        }

        match self.remote.list_folder(p).await {
            Ok(children) => {
                let mut state = self.state.write().await;
                let mut listing = Vec::with_capacity(children.len());
                for child in children {
                    if self.is_hidden(&child.path) {
                        continue;
                    }
                    listing.push(child.path.clone());
                    state.entries.insert(child.path.clone(), child);
                }
                debug!(path = %p, children = listing.len(), "cached directory listing");
                state.listings.insert(p.to_string(), listing.clone());
                state.stats.entries = state.entries.len();
                state.stats.listings = state.listings.len();
                Ok(listing)
            }
            Err(RemoteError::NotFound(_)) => {
                self.evict(p).await;
                Err(FsError::NotFound(p.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Atomically (with respect to this cache's lock) retarget `src` to
    /// `dst`: `src` is forgotten, `new_entry` is installed at `dst`, and both
    /// parents' listings are invalidated.
    ///
    /// Anything cached below either path is evicted too. Moving a folder
    /// relocates its whole subtree remotely, and a replaced destination's
    /// subtree is gone, so stale descendants under either prefix must not
    /// outlive the move.
    pub async fn move_entry(&self, src: &str, dst: &str, new_entry: RemoteEntry) {
        let mut state = self.state.write().await;
        state.entries.remove(src);
        state.listings.remove(src);
        state.listings.remove(dst);
        let src_prefix = format!("{}/", src);
        let dst_prefix = format!("{}/", dst);
        let below = |k: &String| k.starts_with(&src_prefix) || k.starts_with(&dst_prefix);
        state.entries.retain(|k, _| !below(k));
        state.listings.retain(|k, _| !below(k));
        state.entries.insert(dst.to_string(), new_entry);
        for p in [src, dst] {
            if let Some(parent) = path::parent(p) {
                state.listings.remove(&parent);
            }
        }
        state.stats.entries = state.entries.len();
        state.stats.listings = state.listings.len();
    }

    /// Drop the cached listing for a folder, if any.
    pub async fn invalidate_listing(&self, p: &str) {
        let mut state = self.state.write().await;
        state.listings.remove(p);
        state.stats.listings = state.listings.len();
    }

    /// Drop all cached state. Called when the owning session closes.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.entries.clear();
        state.listings.clear();
        state.stats.entries = 0;
        state.stats.listings = 0;
    }

    pub async fn stats(&self) -> CacheStats {
        self.state.read().await.stats.clone()
    }
}

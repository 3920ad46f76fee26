//! Hierarchical-filesystem semantics over a flat remote object store.
//!
//! Three pieces cooperate per session: a [`MetadataCache`] holding the
//! last-observed entry for each path, an [`FsDriver`] translating
//! POSIX-shaped operations into remote calls while keeping the cache
//! coherent, and a [`ChangeWatcher`] that drains the remote change feed to
//! invalidate cached state and notify subscribers.

mod cache;
mod config;
mod driver;
mod error;
pub mod path;
mod watcher;

pub use cache::{CacheStats, MetadataCache};
pub use config::{apple_double, HiddenFilter, SessionOptions};
pub use driver::{AccessMode, FileReader, FileWriter, FsDriver};
pub use error::FsError;
pub use watcher::{ChangeWatcher, WatchEvent};

//! Remote object-store boundary for flatfs.
//!
//! The store is a flat path→metadata namespace with cursor-based delta
//! notifications. This crate defines the capability trait the core consumes,
//! the provider-agnostic error taxonomy, the change-feed types, and an
//! in-memory provider used as the test double.

mod change;
mod error;
mod memory;
mod traits;
mod types;

pub use change::{ChangePage, Cursor, Delta, DeltaKind};
pub use error::RemoteError;
pub use memory::MemoryStore;
pub use traits::{Download, RemoteStore, Upload};
pub use types::{EntryKind, RemoteEntry};

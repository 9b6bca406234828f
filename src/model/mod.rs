//! Core data model types

mod hash;
mod item;
mod snapshot;

pub use hash::Hash;
pub use item::{mod_time_nanos, normalize_path, ItemInfo, ItemKind};
pub use snapshot::{Snapshot, SnapshotList};

//! Cached event documents: the read-side model, the patch engine, and the
//! synchronizer that keeps them current.

pub mod document;
pub mod patch;
pub mod sync;

pub use document::{Action, Half, Occurrence, Snapshot, SubEvent, VersionToken};
pub use patch::{apply_patch, PatchError, PatchOp, PatchOpKind, PatchStats};
pub use sync::{RefreshPolicy, Synchronizer};

pub mod config;
pub mod loc;

mod conflict;
mod error;
mod metadata;

pub use crate::{
    config::{Config, PatternList},
    conflict::Conflict,
    error::*,
    metadata::Metadata,
    queue::{Method, QueueEntry, SyncEvent},
};

pub mod path;
pub mod queue;

/// Suffix of the creation marker sidecar in the work tree.
/// `<name>.rqcf` present means: created by a client, not yet confirmed on
/// the remote.
pub const MARKER_SUFFIX: &str = ".rqcf";

/// Work-tree path of the creation marker for a logical name.
pub fn marker_path(path: &path::Path) -> path::PathBuf {
    path::PathBuf::from(format!("{path}{MARKER_SUFFIX}"))
}

use serde::{Deserialize, Serialize};

use crate::{
    path::{Path, PathBuf},
    queue::Method,
};

/// A local file that disappeared from the remote but cannot be safely
/// removed from the cache. Conflicts are reported, never merged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Conflict {
    /// A client still holds the file open.
    OrphanInUse { path: PathBuf },
    /// A queued mutation still refers to the file.
    OrphanQueued { path: PathBuf, method: Method },
    /// A creation marker still exists for the file.
    OrphanMarked { path: PathBuf },
    /// An orphaned directory still has entries.
    OrphanNotEmpty { path: PathBuf },
}

impl Conflict {
    pub fn path(&self) -> &Path {
        match self {
            Self::OrphanInUse { path } => path,
            Self::OrphanQueued { path, .. } => path,
            Self::OrphanMarked { path } => path,
            Self::OrphanNotEmpty { path } => path,
        }
    }
}

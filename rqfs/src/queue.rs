use std::fmt;

use serde::{Deserialize, Serialize};

use crate::path::{FsPathBuf, Path, PathBuf};

/// HTTP method a queued mutation replays with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Method {
    Put,
    Post,
    Delete,
    Move,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Put => f.write_str("PUT"),
            Method::Post => f.write_str("POST"),
            Method::Delete => f.write_str("DELETE"),
            Method::Move => f.write_str("MOVE"),
        }
    }
}

/// A pending mutation, durable across restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub method: Method,
    /// Logical source name.
    pub path: PathBuf,
    /// Logical destination name, for MOVE.
    pub dest_path: Option<PathBuf>,
    /// Absolute remote root to resolve the upload target at replay time.
    pub remote_prefix: String,
    /// Absolute local root to resolve the bytes at replay time.
    pub local_prefix: FsPathBuf,
}

impl QueueEntry {
    /// The queue key this entry files under.
    pub fn parent(&self) -> &Path {
        self.path.parent().unwrap_or(Path::root())
    }

    pub fn name(&self) -> &str {
        self.path.file_name().unwrap_or("")
    }
}

/// Lifecycle events emitted by the sync processor.
/// Processor failures never propagate to clients; they surface here.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    Start(QueueEntry),
    End(QueueEntry),
    Error(QueueEntry, crate::Error),
    /// Entries abandoned after exhausting the retry limit.
    Purged(Vec<QueueEntry>),
}

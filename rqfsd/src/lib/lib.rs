use futures::{future, Future};
use rqfs::path::Path;

pub mod overlay;
pub mod processor;
pub mod queue;
pub mod storage;

mod error {
    /// Maps error to rqfs::Error::Remote (to be used in `map_err`)
    pub fn remote(err: reqwest::Error) -> rqfs::Error {
        rqfs::Error::Remote {
            status: err.status().map(|s| s.as_u16()),
            msg: err.to_string(),
        }
    }

    /// Maps error to rqfs::Error::Queue (to be used in `map_err`)
    pub fn queue<E: std::error::Error>(err: E) -> rqfs::Error {
        rqfs::Error::Queue(err.to_string())
    }
}

/// The content cache held by the share. The overlay invalidates it on
/// mutation; the implementation belongs to the share front end.
pub trait ContentCache: Send + Sync + 'static {
    fn invalidate(&self, parent: &Path, recursive: bool);
}

/// Cache of a share front end that does not cache.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCache;

impl ContentCache for NoCache {
    fn invalidate(&self, _parent: &Path, _recursive: bool) {}
}

/// Graceful-termination hook, fanned out over the queue and the storage
/// trees when the service stops.
pub trait Shutdown {
    fn shutdown(&self) -> impl Future<Output = anyhow::Result<()>> + Send {
        future::ready(Ok(()))
    }
}

use futures::{Future, Stream};
use rqfs::{
    path::{Path, PathBuf},
    Metadata,
};
use tokio::io;
use url::Url;

use crate::Shutdown;

pub mod fs;
pub mod http;

pub trait Exists {
    fn exists(&self, path: &Path) -> impl Future<Output = rqfs::Result<bool>> + Send;
}

pub trait Stat {
    /// Metadata of `path`, or `None` if the tree has no such entry.
    fn metadata(
        &self,
        path: &Path,
    ) -> impl Future<Output = rqfs::Result<Option<Metadata>>> + Send;
}

pub trait DirEntries {
    fn dir_entries(
        &self,
        parent_path: &Path,
    ) -> impl Stream<Item = rqfs::Result<Metadata>> + Send;
}

pub trait ReadFile {
    fn read_file(
        &self,
        path: PathBuf,
    ) -> impl Future<Output = rqfs::Result<impl io::AsyncRead + Send>> + Send;
}

/// A trait to create a file that must not exist yet
pub trait CreateFile {
    /// Creates the file at `path` with the given content.
    /// Fails with [rqfs::Error::AlreadyExists] if `path` is taken.
    fn create_file(
        &self,
        path: &Path,
        data: impl io::AsyncRead + Send,
    ) -> impl Future<Output = rqfs::Result<Metadata>> + Send;
}

/// A trait to upload or overwrite file content
pub trait WriteFile {
    /// Writes the file at `path`, creating it if needed.
    fn write_file(
        &self,
        path: &Path,
        data: impl io::AsyncRead + Send,
    ) -> impl Future<Output = rqfs::Result<Metadata>> + Send;
}

pub trait MkDir {
    fn mkdir(
        &self,
        path: &Path,
        parents: bool,
    ) -> impl Future<Output = rqfs::Result<()>> + Send;
}

/// A trait to move or rename files or directories within the storage
pub trait MoveEntry {
    /// Moves the file or directory from `src` to `dest`.
    fn move_entry(
        &self,
        src: &Path,
        dest: &Path,
    ) -> impl Future<Output = rqfs::Result<Metadata>> + Send;
}

/// A trait to delete files or folders
pub trait Delete {
    /// Deletes the file or folder pointed to by `path`.
    /// Only empty folders can be deleted.
    fn delete(&self, path: &Path) -> impl Future<Output = rqfs::Result<()>> + Send;
}

/// A trait to delete a whole subtree
pub trait DeleteAll {
    /// Deletes `path` and everything below it.
    fn delete_all(&self, path: &Path) -> impl Future<Output = rqfs::Result<()>> + Send;
}

pub trait ResourceUrl {
    /// Absolute URL of the resource backing `path`.
    fn resource_url(&self, path: &Path) -> rqfs::Result<Url>;
}

/// A trait for path-based storage
pub trait Storage:
    Clone
    + Exists
    + Stat
    + DirEntries
    + ReadFile
    + WriteFile
    + MkDir
    + MoveEntry
    + Delete
    + Shutdown
    + Send
    + Sync
    + 'static
{
}

/// A trait for the local content and work trees
pub trait LocalStorage: Storage + CreateFile + DeleteAll {}

/// A trait for the remote content repository
pub trait RemoteStorage: Storage + ResourceUrl {}

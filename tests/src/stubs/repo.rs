use async_stream::try_stream;
use futures::{Future, Stream, TryStreamExt};
use rqfs::{
    path::{FsPath, Path, PathBuf},
    Metadata,
};
use rqfsd::storage;
use rqfsd::storage::fs::FileSystem;
use rqfsd::storage::{
    Delete as _, DirEntries as _, Exists as _, MkDir as _, MoveEntry as _, ReadFile as _,
    Stat as _, WriteFile as _,
};
use tokio::{fs, io};
use url::Url;

/// Content repository stub backed by a plain directory.
/// Mirrors the HTTP adapter's error mapping where the overlay depends on
/// it: deleting or moving something that is gone reports a 404.
#[derive(Debug, Clone)]
pub struct Stub {
    inner: FileSystem,
}

impl Stub {
    pub fn new(path: &FsPath) -> anyhow::Result<Self> {
        let inner = FileSystem::new(path)?;
        Ok(Self { inner })
    }

    pub fn root(&self) -> &FsPath {
        self.inner.root()
    }
}

impl storage::Exists for Stub {
    fn exists(&self, path: &Path) -> impl Future<Output = rqfs::Result<bool>> + Send {
        self.inner.exists(path)
    }
}

impl storage::Stat for Stub {
    fn metadata(
        &self,
        path: &Path,
    ) -> impl Future<Output = rqfs::Result<Option<Metadata>>> + Send {
        self.inner.metadata(path)
    }
}

impl storage::DirEntries for Stub {
    /// Repository listings come back in server order; the stub uses name
    /// order so merges are reproducible.
    fn dir_entries(
        &self,
        parent_path: &Path,
    ) -> impl Stream<Item = rqfs::Result<Metadata>> + Send {
        let inner = self.inner.clone();
        let parent_path = parent_path.to_owned();
        try_stream! {
            let mut entries: Vec<Metadata> =
                inner.dir_entries(&parent_path).try_collect().await?;
            entries.sort_unstable_by(|a, b| a.name().cmp(b.name()));
            for entry in entries {
                yield entry;
            }
        }
    }
}

impl storage::ReadFile for Stub {
    fn read_file(
        &self,
        path: PathBuf,
    ) -> impl Future<Output = rqfs::Result<impl io::AsyncRead + Send>> + Send {
        self.inner.read_file(path)
    }
}

impl storage::WriteFile for Stub {
    fn write_file(
        &self,
        path: &Path,
        data: impl io::AsyncRead + Send,
    ) -> impl Future<Output = rqfs::Result<Metadata>> + Send {
        self.inner.write_file(path, data)
    }
}

impl storage::MkDir for Stub {
    fn mkdir(
        &self,
        path: &Path,
        parents: bool,
    ) -> impl Future<Output = rqfs::Result<()>> + Send {
        self.inner.mkdir(path, parents)
    }
}

impl storage::MoveEntry for Stub {
    fn move_entry(
        &self,
        src: &Path,
        dest: &Path,
    ) -> impl Future<Output = rqfs::Result<Metadata>> + Send {
        self.inner.move_entry(src, dest)
    }
}

impl storage::Delete for Stub {
    async fn delete(&self, path: &Path) -> rqfs::Result<()> {
        if !self.inner.exists(path).await? {
            return Err(rqfs::Error::remote(Some(404), path.as_str().to_string()));
        }
        self.inner.delete(path).await
    }
}

impl storage::ResourceUrl for Stub {
    fn resource_url(&self, path: &Path) -> rqfs::Result<Url> {
        let fs_path = self.root().join(path.without_root().as_str());
        Url::from_file_path(fs_path.as_std_path())
            .map_err(|()| rqfs::remote_error!(None, "no resource URL for {path}"))
    }
}

impl rqfsd::Shutdown for Stub {
    async fn shutdown(&self) -> anyhow::Result<()> {
        let _ = fs::remove_dir_all(self.root()).await;
        Ok(())
    }
}

impl storage::Storage for Stub {}

impl storage::RemoteStorage for Stub {}

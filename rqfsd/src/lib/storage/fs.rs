use async_stream::try_stream;
use futures::Stream;
use rqfs::{
    path::{FsPath, FsPathBuf, Path, PathBuf},
    Metadata,
};
use tokio::{
    fs::{self, DirEntry},
    io,
};

use crate::Shutdown;

/// A storage tree rooted in a local directory.
/// Serves both as the content tree and, at a sibling root, as the work
/// tree holding sidecar metadata.
#[derive(Debug, Clone)]
pub struct FileSystem {
    root: FsPathBuf,
}

impl FileSystem {
    /// Build a new filesystem storage.
    /// Panics if [root] is not an absolute path.
    pub fn new<P>(root: P) -> anyhow::Result<Self>
    where
        P: AsRef<FsPath>,
    {
        let root = root.as_ref();
        assert!(root.is_absolute());
        let root = root.canonicalize_utf8()?;
        log::info!("Initializing FS storage in {root}");

        Ok(FileSystem { root })
    }

    pub fn root(&self) -> &FsPath {
        &self.root
    }

    fn fs_path(&self, path: &Path) -> FsPathBuf {
        debug_assert!(path.is_absolute());
        self.root.join(path.without_root().as_str())
    }
}

impl super::Exists for FileSystem {
    async fn exists(&self, path: &Path) -> rqfs::Result<bool> {
        let fs_path = self.fs_path(path);
        Ok(fs::try_exists(&fs_path).await?)
    }
}

impl super::Stat for FileSystem {
    async fn metadata(&self, path: &Path) -> rqfs::Result<Option<Metadata>> {
        let fs_path = self.fs_path(path);
        match fs::metadata(&fs_path).await {
            Ok(md) => Ok(Some(map_metadata(path.to_owned(), &md)?)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

impl super::DirEntries for FileSystem {
    fn dir_entries(
        &self,
        parent_path: &Path,
    ) -> impl Stream<Item = rqfs::Result<Metadata>> + Send {
        let parent_path = parent_path.to_owned();
        let fs_base = self.fs_path(&parent_path);
        log::trace!("listing entries of {fs_base}");
        try_stream! {
            let mut read_dir = fs::read_dir(&fs_base).await.map_err(|err| {
                match err.kind() {
                    io::ErrorKind::NotFound => rqfs::Error::NotFound(parent_path.clone()),
                    _ => rqfs::Error::from(err),
                }
            })?;
            loop {
                match read_dir.next_entry().await? {
                    None => break,
                    Some(direntry) => {
                        yield map_direntry(&parent_path, &direntry).await?;
                    }
                }
            }
        }
    }
}

impl super::ReadFile for FileSystem {
    async fn read_file(&self, path: PathBuf) -> rqfs::Result<impl io::AsyncRead + Send> {
        let fs_path = self.fs_path(&path);
        log::trace!("reading {fs_path}");
        tokio::fs::File::open(&fs_path).await.map_err(|err| {
            match err.kind() {
                io::ErrorKind::NotFound => rqfs::Error::NotFound(path.clone()),
                _ => rqfs::Error::from(err),
            }
        })
    }
}

impl super::CreateFile for FileSystem {
    async fn create_file(
        &self,
        path: &Path,
        data: impl io::AsyncRead + Send,
    ) -> rqfs::Result<Metadata> {
        let fs_path = self.fs_path(path);
        log::info!("creating {fs_path}");
        if fs_path.exists() {
            return Err(rqfs::Error::AlreadyExists(path.to_owned()));
        }
        do_write(path, &fs_path, data).await
    }
}

impl super::WriteFile for FileSystem {
    async fn write_file(
        &self,
        path: &Path,
        data: impl io::AsyncRead + Send,
    ) -> rqfs::Result<Metadata> {
        let fs_path = self.fs_path(path);
        log::info!("writing {fs_path}");
        if fs_path.is_dir() {
            rqfs::io_bail!("{path} is a directory: {fs_path}");
        }
        do_write(path, &fs_path, data).await
    }
}

impl super::MkDir for FileSystem {
    async fn mkdir(&self, path: &Path, parents: bool) -> rqfs::Result<()> {
        let fs_path = self.fs_path(path);
        log::info!("mkdir {}{}", if parents { "-p " } else { "" }, fs_path);
        if parents {
            fs::create_dir_all(&fs_path).await?;
        } else {
            fs::create_dir(&fs_path).await.map_err(|err| {
                match err.kind() {
                    io::ErrorKind::AlreadyExists => rqfs::Error::AlreadyExists(path.to_owned()),
                    _ => rqfs::Error::from(err),
                }
            })?;
        }
        Ok(())
    }
}

impl super::MoveEntry for FileSystem {
    async fn move_entry(&self, src: &Path, dest: &Path) -> rqfs::Result<Metadata> {
        let fs_src = self.fs_path(src);
        let fs_dest = self.fs_path(dest);
        log::info!("moving {fs_src} to {fs_dest}");
        fs::rename(&fs_src, &fs_dest).await.map_err(|err| {
            match err.kind() {
                io::ErrorKind::NotFound => rqfs::Error::NotFound(src.to_owned()),
                _ => rqfs::Error::from(err),
            }
        })?;
        let md = fs::metadata(&fs_dest).await?;
        map_metadata(dest.to_owned(), &md)
    }
}

impl super::Delete for FileSystem {
    async fn delete(&self, path: &Path) -> rqfs::Result<()> {
        let fs_path = self.fs_path(path);
        log::info!("deleting {fs_path}");
        let md = fs::metadata(&fs_path).await;
        if md.is_err() {
            return Ok(());
        }
        let md = md.unwrap();
        if md.is_dir() {
            let mut entries = fs::read_dir(&fs_path).await?;
            let entry = entries.next_entry().await?;
            if entry.is_some() {
                return Err(rqfs::Error::NotEmpty(path.to_owned()));
            }
            fs::remove_dir(&fs_path).await?;
        } else {
            fs::remove_file(&fs_path).await?;
        }
        Ok(())
    }
}

impl super::DeleteAll for FileSystem {
    async fn delete_all(&self, path: &Path) -> rqfs::Result<()> {
        let fs_path = self.fs_path(path);
        log::info!("deleting subtree {fs_path}");
        let md = fs::metadata(&fs_path).await;
        if md.is_err() {
            return Ok(());
        }
        if md.unwrap().is_dir() {
            fs::remove_dir_all(&fs_path).await?;
        } else {
            fs::remove_file(&fs_path).await?;
        }
        Ok(())
    }
}

impl Shutdown for FileSystem {}

impl super::Storage for FileSystem {}

impl super::LocalStorage for FileSystem {}

async fn do_write(
    path: &Path,
    fs_path: &FsPath,
    data: impl io::AsyncRead + Send,
) -> rqfs::Result<Metadata> {
    {
        tokio::pin!(data);
        let mut f = tokio::fs::File::create(&fs_path).await?;
        tokio::io::copy(&mut data, &mut f).await?;
    }
    let fs_metadata = tokio::fs::metadata(&fs_path).await?;
    map_metadata(path.to_owned(), &fs_metadata)
}

async fn map_direntry(parent_path: &Path, direntry: &DirEntry) -> rqfs::Result<Metadata> {
    let file_name = String::from_utf8(direntry.file_name().into_encoded_bytes())
        .map_err(|err| rqfs::io_error!("Non UTF-8 file name: {err}"))?;
    let path = parent_path.join(&file_name);
    let metadata = direntry.metadata().await?;
    map_metadata(path, &metadata)
}

fn map_metadata(path: PathBuf, metadata: &std::fs::Metadata) -> rqfs::Result<Metadata> {
    let metadata = if metadata.is_file() {
        Metadata::Regular {
            path,
            size: metadata.len(),
            mtime: metadata.modified().map(|mt| mt.into())?,
        }
    } else if metadata.is_dir() {
        Metadata::Directory { path }
    } else {
        Metadata::Special { path }
    };

    Ok(metadata)
}

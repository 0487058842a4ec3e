#![cfg(test)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rqfs::{
    path::{FsPathBuf, Path, PathBuf},
    PatternList, QueueEntry,
};
use rqfsd::{
    overlay::{OverlayTree, Share},
    processor::{SyncOptions, SyncProcessor},
    queue::{QueuePersist, RequestQueue},
    storage::fs::FileSystem,
    storage::{Exists as _, ReadFile as _},
    ContentCache, Shutdown as _,
};
use tokio::sync::watch;

mod dataset;
mod tests;
mod utils;
pub mod stubs {
    pub mod repo;
}

use dataset::Dataset;
use stubs::repo;

/// Content cache stub recording every invalidation.
#[derive(Debug, Default)]
pub struct RecordingCache {
    invalidations: Mutex<Vec<(PathBuf, bool)>>,
}

impl RecordingCache {
    pub fn invalidated(&self, parent: &Path) -> bool {
        self.invalidations
            .lock()
            .unwrap()
            .iter()
            .any(|(p, _)| p.as_path() == parent)
    }
}

impl ContentCache for RecordingCache {
    fn invalidate(&self, parent: &Path, recursive: bool) {
        self.invalidations
            .lock()
            .unwrap()
            .push((parent.to_owned(), recursive));
    }
}

pub struct Harness {
    pub tree: OverlayTree<FileSystem, repo::Stub>,
    pub processor: SyncProcessor<FileSystem, repo::Stub>,
    pub queue: Arc<RequestQueue>,
    pub local: FileSystem,
    pub work: FileSystem,
    pub remote: repo::Stub,
    pub cache: Arc<RecordingCache>,
    root: FsPathBuf,
}

pub async fn harness(dataset: Dataset) -> Harness {
    let root = utils::temp_path(Some("rqfs-test"));
    tokio::fs::create_dir_all(&root).await.unwrap();
    dataset.create_fs(&root).await;

    let local = FileSystem::new(root.join("local")).unwrap();
    let work = FileSystem::new(root.join("work")).unwrap();
    let remote = repo::Stub::new(&root.join("remote")).unwrap();

    let queue = Arc::new(RequestQueue::new(QueuePersist::OnDisk(
        root.join("requests.bin"),
    )));
    let cache = Arc::new(RecordingCache::default());

    let share = Share {
        local_prefix: local.root().to_owned(),
        remote_prefix: format!("file://{}", remote.root()),
        tmp: PatternList::new(["~*", ".smbdelete*"]).unwrap(),
    };

    let tree = OverlayTree::new(
        local.clone(),
        work.clone(),
        remote.clone(),
        queue.clone(),
        share,
    )
    .with_cache(cache.clone());

    let processor = SyncProcessor::new(
        queue.clone(),
        Arc::new(work.clone()),
        Arc::new(remote.clone()),
        SyncOptions {
            retry_limit: 2,
            backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(50),
            ..Default::default()
        },
    );

    Harness {
        tree,
        processor,
        queue,
        local,
        work,
        remote,
        cache,
        root,
    }
}

impl Harness {
    pub async fn local_has(&self, path: &Path) -> bool {
        self.local.exists(path).await.unwrap()
    }

    pub async fn work_has(&self, path: &Path) -> bool {
        self.work.exists(path).await.unwrap()
    }

    pub async fn remote_has(&self, path: &Path) -> bool {
        self.remote.exists(path).await.unwrap()
    }

    pub async fn local_content(&self, path: &Path) -> anyhow::Result<String> {
        let r = self.local.read_file(path.to_owned()).await?;
        utils::file_content(r).await
    }

    pub async fn remote_content(&self, path: &Path) -> anyhow::Result<String> {
        let r = self.remote.read_file(path.to_owned()).await?;
        utils::file_content(r).await
    }

    pub fn queued(&self, parent: &Path) -> Vec<QueueEntry> {
        self.queue.requests(parent)
    }

    /// Runs the processor until the queue is empty, then stops it at the
    /// next entry boundary.
    pub async fn drain(&self) {
        let (stop_tx, stop_rx) = watch::channel(false);
        let run = tokio::spawn(self.processor.clone().run(stop_rx));
        let wait = async {
            while !self.queue.is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), wait)
            .await
            .expect("queue did not drain in time");
        stop_tx.send(true).unwrap();
        run.await.unwrap();
    }

    pub async fn dispose(self) {
        let _ = self.queue.shutdown().await;
        let _ = self.remote.shutdown().await;
        let _ = tokio::fs::remove_dir_all(&self.root).await;
    }
}

#[tokio::test]
async fn exists_prefers_local() {
    let ds = Dataset {
        local: vec![dataset::dir("a", vec![dataset::file("cached.txt", "bytes")])],
        work: vec![],
        remote: vec![dataset::dir("a", vec![])],
    };
    let h = harness(ds).await;
    assert!(h.tree.exists(Path::new("/a/cached.txt")).await.unwrap());
    assert!(!h.tree.exists(Path::new("/a/none.txt")).await.unwrap());
    h.dispose().await;
}

#[tokio::test]
async fn open_missing_fails() {
    let h = harness(Dataset::dir_a()).await;
    let res = h.tree.open(Path::new("/a/none.txt")).await;
    assert!(matches!(res, Err(rqfs::Error::NotFound(_))));
    h.dispose().await;
}

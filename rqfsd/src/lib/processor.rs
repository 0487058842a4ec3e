use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use rqfs::{
    marker_path,
    path::{Path, PathBuf},
    Method, QueueEntry, SyncEvent,
};
use tokio::{
    io,
    sync::{broadcast, watch, Mutex, Semaphore},
    task::JoinSet,
    time,
};

use crate::{
    queue::RequestQueue,
    storage::{LocalStorage, RemoteStorage},
};

#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// How many parent directories may replay at the same time.
    pub concurrency: usize,
    /// How many failed attempts before an entry is purged.
    pub retry_limit: u32,
    pub backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            retry_limit: 5,
            backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(32),
        }
    }
}

impl From<&rqfs::Config> for SyncOptions {
    fn from(config: &rqfs::Config) -> Self {
        Self {
            concurrency: config.sync_concurrency,
            retry_limit: config.retry_limit,
            backoff: Duration::from_secs(config.backoff_secs),
            max_backoff: Duration::from_secs(config.max_backoff_secs),
        }
    }
}

/// Background drainer of the request queue against the remote repository.
///
/// Entries replay in FIFO order within a parent directory; across parents
/// replay is concurrent, bounded by [SyncOptions::concurrency]. Failures
/// never reach clients, they surface as [SyncEvent]s.
pub struct SyncProcessor<W, R> {
    queue: Arc<RequestQueue>,
    work: Arc<W>,
    remote: Arc<R>,
    opts: SyncOptions,
    semaphore: Arc<Semaphore>,
    parent_locks: Arc<DashMap<PathBuf, Arc<Mutex<()>>>>,
    events: broadcast::Sender<SyncEvent>,
}

impl<W, R> Clone for SyncProcessor<W, R> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            work: self.work.clone(),
            remote: self.remote.clone(),
            opts: self.opts.clone(),
            semaphore: self.semaphore.clone(),
            parent_locks: self.parent_locks.clone(),
            events: self.events.clone(),
        }
    }
}

enum Outcome {
    Done,
    Purge(rqfs::Error),
    Stopped,
}

impl<W, R> SyncProcessor<W, R>
where
    W: LocalStorage,
    R: RemoteStorage,
{
    pub fn new(queue: Arc<RequestQueue>, work: Arc<W>, remote: Arc<R>, opts: SyncOptions) -> Self {
        let (events, _) = broadcast::channel(64);
        let semaphore = Arc::new(Semaphore::new(opts.concurrency.max(1)));
        Self {
            queue,
            work,
            remote,
            opts,
            semaphore,
            parent_locks: Arc::new(DashMap::new()),
            events,
        }
    }

    /// Lifecycle events: start, end, error and purge of queue entries.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Runs until `stop` turns true. Stops at entry boundaries only.
    pub async fn run(self, mut stop: watch::Receiver<bool>) {
        log::info!("sync processor started");
        loop {
            if *stop.borrow() {
                break;
            }
            if self.queue.is_empty() {
                tokio::select! {
                    _ = self.queue.notified() => {}
                    res = stop.changed() => {
                        if res.is_err() {
                            break;
                        }
                    }
                }
                continue;
            }
            self.drain_round(&stop).await;
        }
        log::info!("sync processor stopped");
    }

    /// Drains everything currently pending, one task per parent directory.
    async fn drain_round(&self, stop: &watch::Receiver<bool>) {
        let parents = self.queue.parents();
        let mut set = JoinSet::new();
        for parent in parents {
            let this = self.clone();
            let stop = stop.clone();
            set.spawn(async move { this.drain_parent(parent, stop).await });
        }
        while let Some(res) = set.join_next().await {
            if let Err(err) = res {
                log::error!("sync task panicked: {err}");
            }
        }
    }

    async fn drain_parent(&self, parent: PathBuf, mut stop: watch::Receiver<bool>) {
        let Ok(_permit) = self.semaphore.clone().acquire_owned().await else {
            return;
        };
        loop {
            if *stop.borrow() {
                break;
            }
            let Some(entry) = self.queue.front(&parent) else {
                break;
            };

            // a MOVE that changes parents serializes against both
            let mut keys = vec![parent.clone()];
            if let Some(dest_parent) = entry
                .dest_path
                .as_ref()
                .and_then(|dest| dest.parent())
                .filter(|p| *p != parent.as_path())
            {
                keys.push(dest_parent.to_owned());
            }
            keys.sort();
            let locks: Vec<Arc<Mutex<()>>> = keys.iter().map(|k| self.parent_lock(k)).collect();
            let mut guards = Vec::with_capacity(locks.len());
            for lock in &locks {
                guards.push(lock.lock().await);
            }

            match self.process(&entry, &mut stop).await {
                Outcome::Done => {
                    let _ = self.events.send(SyncEvent::End(entry.clone()));
                    if let Err(err) = self.queue.confirm(&parent, &entry).await {
                        log::error!("failed to persist queue after {}: {err}", entry.path);
                    }
                }
                Outcome::Purge(err) => {
                    log::error!("purging {} for {}: {err}", entry.method, entry.path);
                    if let Err(err) = self.queue.confirm(&parent, &entry).await {
                        log::error!("failed to persist queue after {}: {err}", entry.path);
                    }
                    let _ = self.events.send(SyncEvent::Purged(vec![entry]));
                }
                // the entry stays queued for the next run
                Outcome::Stopped => break,
            }
        }
    }

    async fn process(&self, entry: &QueueEntry, stop: &mut watch::Receiver<bool>) -> Outcome {
        let _ = self.events.send(SyncEvent::Start(entry.clone()));
        let mut failures = 0u32;
        let mut delay = self.opts.backoff;
        loop {
            if *stop.borrow() {
                return Outcome::Stopped;
            }
            match self.replay(entry).await {
                Ok(()) => return Outcome::Done,
                Err(err) => {
                    let _ = self
                        .events
                        .send(SyncEvent::Error(entry.clone(), err.clone()));
                    if is_transient(&err) {
                        log::warn!(
                            "{} for {} failed, will retry: {err}",
                            entry.method,
                            entry.path
                        );
                    } else {
                        failures += 1;
                        log::error!(
                            "{} for {} failed ({failures}/{}): {err}",
                            entry.method,
                            entry.path,
                            self.opts.retry_limit
                        );
                        if failures >= self.opts.retry_limit {
                            return Outcome::Purge(err);
                        }
                    }
                    tokio::select! {
                        _ = time::sleep(delay) => {}
                        res = stop.changed() => {
                            if res.is_err() {
                                return Outcome::Stopped;
                            }
                        }
                    }
                    delay = (delay * 2).min(self.opts.max_backoff);
                }
            }
        }
    }

    async fn replay(&self, entry: &QueueEntry) -> rqfs::Result<()> {
        match entry.method {
            Method::Put | Method::Post => {
                let fs_path = entry.local_prefix.join(entry.path.without_root().as_str());
                let data = tokio::fs::File::open(&fs_path).await.map_err(|err| {
                    match err.kind() {
                        io::ErrorKind::NotFound => rqfs::Error::NotFound(entry.path.clone()),
                        _ => rqfs::Error::from(err),
                    }
                })?;
                self.remote.write_file(&entry.path, data).await?;
                if entry.method == Method::Put {
                    // upload confirmed, the creation marker can go
                    self.work.delete(&marker_path(&entry.path)).await?;
                }
                Ok(())
            }
            Method::Delete => match self.remote.delete(&entry.path).await {
                Ok(()) => Ok(()),
                // already gone on the remote
                Err(err) if err.status() == Some(404) => Ok(()),
                Err(err) => Err(err),
            },
            Method::Move => {
                let dest = entry.dest_path.as_ref().ok_or_else(|| {
                    rqfs::queue_error!("MOVE entry without destination: {}", entry.path)
                })?;
                self.remote.move_entry(&entry.path, dest).await?;
                Ok(())
            }
        }
    }

    fn parent_lock(&self, parent: &Path) -> Arc<Mutex<()>> {
        self.parent_locks
            .entry(parent.to_owned())
            .or_default()
            .clone()
    }
}

/// Whether replay may eventually succeed without operator intervention.
fn is_transient(err: &rqfs::Error) -> bool {
    match err {
        rqfs::Error::Remote {
            status: Some(status),
            ..
        } => *status >= 500 || *status == 429 || *status == 408,
        // transport-level failure, typically the remote being unreachable
        rqfs::Error::Remote { status: None, .. } => true,
        _ => false,
    }
}

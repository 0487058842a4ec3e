use std::{collections::HashMap, sync::Arc};

use dashmap::{DashMap, DashSet};
use futures::{future, TryStreamExt};
use glob::Pattern;
use rqfs::{
    marker_path,
    path::{self, FsPathBuf, Path, PathBuf},
    Conflict, Metadata, Method, PatternList, QueueEntry,
};
use tokio::{io, sync::broadcast};

use crate::{
    queue::RequestQueue,
    storage::{LocalStorage, RemoteStorage},
    ContentCache, NoCache,
};

/// State of a name in the merged view.
#[derive(Debug, Clone)]
pub enum Entry {
    /// Only the local cache has it. A creation marker in the work tree
    /// means a client created it and the remote has not confirmed yet.
    Local(Metadata),
    /// Only the remote repository has it.
    Remote(Metadata),
    /// Present on both sides. The local copy may be modified.
    Both {
        local: Metadata,
        remote: Metadata,
    },
    /// Name matches the temporary-file pattern. Never queued.
    Temp(Metadata),
}

impl Entry {
    /// Metadata of the entry, preferring the local side.
    pub fn metadata(&self) -> &Metadata {
        match self {
            Entry::Local(md) => md,
            Entry::Remote(md) => md,
            Entry::Both { local, .. } => local,
            Entry::Temp(md) => md,
        }
    }

    pub fn path(&self) -> &Path {
        self.metadata().path()
    }

    pub fn name(&self) -> &str {
        self.metadata().name()
    }

    pub fn is_local_only(&self) -> bool {
        matches!(self, Entry::Local(..))
    }

    pub fn is_remote_only(&self) -> bool {
        matches!(self, Entry::Remote(..))
    }

    pub fn is_synced(&self) -> bool {
        matches!(self, Entry::Both { .. })
    }

    pub fn is_temp(&self) -> bool {
        matches!(self, Entry::Temp(..))
    }
}

/// Share-level parameters the overlay resolves queue entries with.
#[derive(Debug, Clone)]
pub struct Share {
    /// Absolute root of the local content tree.
    pub local_prefix: FsPathBuf,
    /// Absolute root of the remote repository.
    pub remote_prefix: String,
    /// The temporary-file predicate.
    pub tmp: PatternList,
}

/// The merged local ∪ remote view exposed to share clients.
///
/// Reads consult the local tree first; mutations land locally, invalidate
/// the share content cache and leave a deferred request in the queue. The
/// sync processor replays those requests independently.
pub struct OverlayTree<L, R> {
    local: Arc<L>,
    work: Arc<L>,
    remote: Arc<R>,
    queue: Arc<RequestQueue>,
    share: Arc<Share>,
    cache: Arc<dyn ContentCache>,
    created: Arc<DashSet<PathBuf>>,
    open_handles: Arc<DashMap<PathBuf, usize>>,
    events: broadcast::Sender<Conflict>,
}

impl<L, R> Clone for OverlayTree<L, R> {
    fn clone(&self) -> Self {
        Self {
            local: self.local.clone(),
            work: self.work.clone(),
            remote: self.remote.clone(),
            queue: self.queue.clone(),
            share: self.share.clone(),
            cache: self.cache.clone(),
            created: self.created.clone(),
            open_handles: self.open_handles.clone(),
            events: self.events.clone(),
        }
    }
}

impl<L, R> OverlayTree<L, R>
where
    L: LocalStorage,
    R: RemoteStorage,
{
    pub fn new(local: L, work: L, remote: R, queue: Arc<RequestQueue>, share: Share) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            local: Arc::new(local),
            work: Arc::new(work),
            remote: Arc::new(remote),
            queue,
            share: Arc::new(share),
            cache: Arc::new(NoCache),
            created: Arc::new(DashSet::new()),
            open_handles: Arc::new(DashMap::new()),
            events,
        }
    }

    /// Installs the share front end's content cache.
    pub fn with_cache(mut self, cache: Arc<dyn ContentCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Conflict reports from the list merge.
    pub fn subscribe(&self) -> broadcast::Receiver<Conflict> {
        self.events.subscribe()
    }

    pub fn local(&self) -> &L {
        &self.local
    }

    pub fn work(&self) -> &L {
        &self.work
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn resource_url(&self, name: &Path) -> rqfs::Result<url::Url> {
        self.remote.resource_url(name)
    }

    /// A locally present file is visible to the client even when the
    /// remote is unreachable; everything else is up to the remote.
    pub async fn exists(&self, name: &Path) -> rqfs::Result<bool> {
        if self.local.exists(name).await? {
            return Ok(true);
        }
        self.remote.exists(name).await
    }

    pub async fn open(&self, name: &Path) -> rqfs::Result<OverlayFile<L, R>> {
        let (remote, local) = tokio::join!(self.remote.metadata(name), self.local.metadata(name));
        let entry = match (remote?, local?) {
            (Some(remote), None) => Entry::Remote(remote),
            (Some(remote), Some(local)) => Entry::Both { local, remote },
            (None, Some(local)) if self.share.tmp.matches(name) => Entry::Temp(local),
            (None, Some(local)) => Entry::Local(local),
            (None, None) => return Err(rqfs::Error::NotFound(name.to_owned())),
        };
        Ok(OverlayFile::new(self.clone(), entry))
    }

    /// Merge of the remote and local listings for `pattern`.
    ///
    /// The result is a snapshot: neither side is assumed stable across the
    /// internal fetches, and entries may be stale the moment they return.
    /// Remote order is preserved; local-only entries follow in local order.
    pub async fn list(&self, pattern: &Path) -> rqfs::Result<Vec<Entry>> {
        let parent = pattern.parent().unwrap_or(Path::root()).to_owned();
        let glob = Pattern::new(pattern.file_name().unwrap_or("*"))
            .map_err(|err| rqfs::io_error!("Invalid pattern {pattern}: {err}"))?;

        let remote_files: Vec<Metadata> = self
            .remote
            .dir_entries(&parent)
            .try_filter(|md| future::ready(glob.matches(md.name())))
            .try_collect()
            .await?;

        if !self.local.exists(&parent).await? {
            // no cached state to merge
            return Ok(remote_files.into_iter().map(Entry::Remote).collect());
        }

        let local_files: Vec<Metadata> = self
            .local
            .dir_entries(&parent)
            .try_filter(|md| future::ready(glob.matches(md.name())))
            .try_collect()
            .await?;
        let pending = self.queue.get_requests(&parent);

        let mut entries: Vec<Entry> = Vec::new();
        let mut lookup: HashMap<String, usize> = HashMap::new();

        for remote in remote_files {
            let key = path::normal_form(remote.name());
            if pending.get(&key) == Some(&Method::Delete) {
                // a queued delete hides the remote entry
                log::trace!("hiding {} behind a queued DELETE", remote.path());
                continue;
            }
            lookup.insert(key, entries.len());
            entries.push(Entry::Remote(remote));
        }

        for local in local_files {
            if self.share.tmp.matches(local.path()) {
                entries.push(Entry::Temp(local));
                continue;
            }
            let key = path::normal_form(local.name());
            if let Some(&idx) = lookup.get(&key) {
                if let Entry::Remote(remote) = entries[idx].clone() {
                    entries[idx] = Entry::Both { local, remote };
                }
                continue;
            }
            let marker = marker_path(local.path());
            if self.work.exists(&marker).await? {
                // client-created, upload not confirmed yet
                entries.push(Entry::Local(local));
                continue;
            }
            // orphaned: previously synced, gone from the remote since
            match self.deletion_blocker(local.path()).await? {
                None => match self.remove_local(local.path()).await {
                    Ok(()) => {
                        log::info!("removed orphaned entry {}", local.path());
                    }
                    Err(rqfs::Error::NotEmpty(path)) => {
                        log::warn!("orphaned directory {path} is not empty");
                        let _ = self.events.send(Conflict::OrphanNotEmpty { path });
                        entries.push(Entry::Local(local));
                    }
                    Err(err) => return Err(err),
                },
                Some(conflict) => {
                    log::warn!("conflicting local entry {}", local.path());
                    let _ = self.events.send(conflict);
                    entries.push(Entry::Local(local));
                }
            }
        }

        Ok(entries)
    }

    pub async fn create_file(&self, name: &Path) -> rqfs::Result<OverlayFile<L, R>> {
        let parent = name.parent().unwrap_or(Path::root());
        if !parent.is_root() {
            self.local.mkdir(parent, true).await?;
        }
        let md = self.local.create_file(name, io::empty()).await?;
        if self.share.tmp.matches(name) {
            self.cache.invalidate(parent, false);
            return Ok(OverlayFile::new(self.clone(), Entry::Temp(md)));
        }
        self.create_marker(name).await?;
        self.created.insert(name.to_owned());
        self.cache.invalidate(parent, false);
        Ok(OverlayFile::new(self.clone(), Entry::Local(md)))
    }

    /// Directory creation is eager on the remote: empty directories are
    /// cheap there and the queue key scheme relies on them existing.
    pub async fn create_dir(&self, name: &Path) -> rqfs::Result<()> {
        self.local.mkdir(name, false).await?;
        match self.remote.mkdir(name, false).await {
            Ok(()) | Err(rqfs::Error::AlreadyExists(_)) => (),
            Err(err) => return Err(err),
        }
        self.cache.invalidate(name.parent().unwrap_or(Path::root()), false);
        Ok(())
    }

    pub async fn delete(&self, name: &Path) -> rqfs::Result<()> {
        if !self.local.exists(name).await? {
            return self.remote.delete(name).await.map_err(|err| {
                if err.is_not_found() {
                    rqfs::Error::NotFound(name.to_owned())
                } else {
                    err
                }
            });
        }
        self.local.delete(name).await?;
        self.created.remove(name);
        self.cache.invalidate(name.parent().unwrap_or(Path::root()), false);
        self.queue_data(name, Method::Delete, None).await;
        self.work.delete(&marker_path(name)).await?;
        self.work.delete_all(name).await?;
        Ok(())
    }

    pub async fn delete_dir(&self, name: &Path) -> rqfs::Result<()> {
        if !self.local.exists(name).await? {
            return self.remote.delete(name).await.map_err(|err| {
                if err.is_not_found() {
                    rqfs::Error::NotFound(name.to_owned())
                } else {
                    err
                }
            });
        }
        self.local.delete(name).await?;
        match self.remote.delete(name).await {
            Ok(()) => (),
            Err(err) if err.is_not_found() => (),
            Err(err) => return Err(err),
        }
        if let Err(err) = self.queue.remove_path(name).await {
            log::error!("failed to drop pending requests under {name}: {err}");
        }
        self.work.delete_all(name).await?;
        self.cache.invalidate(name, true);
        Ok(())
    }

    pub async fn rename(&self, old_name: &Path, new_name: &Path) -> rqfs::Result<()> {
        if !self.local.exists(old_name).await? {
            self.remote.move_entry(old_name, new_name).await?;
            return Ok(());
        }
        let md = self.local.move_entry(old_name, new_name).await?;
        self.cache
            .invalidate(old_name.parent().unwrap_or(Path::root()), false);
        self.cache
            .invalidate(new_name.parent().unwrap_or(Path::root()), false);

        let old_marker = marker_path(old_name);
        if self.work.exists(&old_marker).await? {
            let new_marker = marker_path(new_name);
            if let Some(p) = new_marker.parent() {
                self.work.mkdir(p, true).await?;
            }
            self.work.move_entry(&old_marker, &new_marker).await?;
        }
        if self.work.exists(old_name).await? {
            if let Some(p) = new_name.parent() {
                self.work.mkdir(p, true).await?;
            }
            self.work.move_entry(old_name, new_name).await?;
        }
        if self.created.remove(old_name).is_some() {
            self.created.insert(new_name.to_owned());
        }

        if md.is_dir() {
            // directory renames are eager, pending requests re-parent
            self.remote.move_entry(old_name, new_name).await?;
            if let Err(err) = self.queue.update_path(old_name, new_name).await {
                log::error!(
                    "failed to re-parent pending requests {old_name} -> {new_name}: {err}"
                );
            }
        } else {
            if self.share.tmp.matches(old_name) && !self.share.tmp.matches(new_name) {
                // a temp file renamed into the persistent namespace is a
                // fresh client creation
                self.create_marker(new_name).await?;
                self.created.insert(new_name.to_owned());
            }
            self.queue_data(old_name, Method::Move, Some(new_name)).await;
        }
        Ok(())
    }

    /// Leaves a deferred mutation in the request queue.
    ///
    /// Temp names never reach the queue. A MOVE with a temp end is
    /// translated so neither `path` nor `dest_path` of the stored entry is
    /// ever temp: entering the persistent namespace queues a PUT of the
    /// destination, leaving it queues a DELETE of the source.
    ///
    /// Queue failures are logged and do not fail the client mutation: the
    /// local state is already authoritative.
    pub async fn queue_data(&self, name: &Path, method: Method, dest: Option<&Path>) {
        let name_tmp = self.share.tmp.matches(name);
        let (method, path, dest_path) = match (method, dest) {
            (Method::Move, Some(dest)) => {
                let dest_tmp = self.share.tmp.matches(dest);
                match (name_tmp, dest_tmp) {
                    (true, true) => return,
                    (false, false) => (Method::Move, name, Some(dest.to_owned())),
                    (true, false) => (Method::Put, dest, None),
                    (false, true) => (Method::Delete, name, None),
                }
            }
            _ if name_tmp => return,
            (method, dest) => (method, name, dest.map(|d| d.to_owned())),
        };
        let entry = QueueEntry {
            method,
            path: path.to_owned(),
            dest_path,
            remote_prefix: self.share.remote_prefix.clone(),
            local_prefix: self.share.local_prefix.clone(),
        };
        if let Err(err) = self.queue.queue_request(entry).await {
            log::error!("failed to queue {method} for {path}: {err}");
        }
    }

    /// Whether an orphaned local file may be removed from the cache:
    /// no client holds it open, no pending request refers to it, and no
    /// creation marker exists for it.
    pub async fn can_delete(&self, name: &Path) -> rqfs::Result<bool> {
        Ok(self.deletion_blocker(name).await?.is_none())
    }

    async fn deletion_blocker(&self, name: &Path) -> rqfs::Result<Option<Conflict>> {
        let in_use = self
            .open_handles
            .get(name)
            .map(|count| *count > 0)
            .unwrap_or(false);
        if in_use {
            return Ok(Some(Conflict::OrphanInUse {
                path: name.to_owned(),
            }));
        }
        if let Some(method) = self.queue.pending_for(name) {
            return Ok(Some(Conflict::OrphanQueued {
                path: name.to_owned(),
                method,
            }));
        }
        if self.work.exists(&marker_path(name)).await? {
            return Ok(Some(Conflict::OrphanMarked {
                path: name.to_owned(),
            }));
        }
        Ok(None)
    }

    async fn create_marker(&self, name: &Path) -> rqfs::Result<()> {
        let marker = marker_path(name);
        if let Some(parent) = marker.parent() {
            self.work.mkdir(parent, true).await?;
        }
        match self.work.create_file(&marker, io::empty()).await {
            Ok(_) | Err(rqfs::Error::AlreadyExists(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn remove_local(&self, name: &Path) -> rqfs::Result<()> {
        self.local.delete(name).await?;
        self.work.delete(&marker_path(name)).await?;
        self.work.delete_all(name).await?;
        Ok(())
    }
}

/// A handle on a name of the overlay, as served to a share client.
///
/// Reads prefer the local copy, materializing remote bytes on first
/// access; writes land locally. Closing the handle queues the deferred
/// upload for created or modified files.
pub struct OverlayFile<L, R> {
    tree: OverlayTree<L, R>,
    entry: Entry,
    written: bool,
    _guard: HandleGuard,
}

impl<L, R> OverlayFile<L, R>
where
    L: LocalStorage,
    R: RemoteStorage,
{
    fn new(tree: OverlayTree<L, R>, entry: Entry) -> Self {
        let guard = HandleGuard::new(tree.open_handles.clone(), entry.path().to_owned());
        Self {
            tree,
            entry,
            written: false,
            _guard: guard,
        }
    }

    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    pub fn path(&self) -> &Path {
        self.entry.path()
    }

    pub async fn read(&mut self) -> rqfs::Result<impl io::AsyncRead + Send + use<'_, L, R>> {
        let remote = match &self.entry {
            Entry::Remote(remote) => Some(remote.clone()),
            _ => None,
        };
        if let Some(remote) = remote {
            // first read materializes the bytes locally
            let path = remote.path().to_owned();
            let data = self.tree.remote.read_file(path.clone()).await?;
            if let Some(parent) = path.parent() {
                self.tree.local.mkdir(parent, true).await?;
            }
            let local = self.tree.local.write_file(&path, data).await?;
            self.entry = Entry::Both { local, remote };
        }
        self.tree.local.read_file(self.path().to_owned()).await
    }

    pub async fn write(&mut self, data: impl io::AsyncRead + Send) -> rqfs::Result<()> {
        let path = self.path().to_owned();
        if let Some(parent) = path.parent() {
            self.tree.local.mkdir(parent, true).await?;
        }
        let local = self.tree.local.write_file(&path, data).await?;
        self.entry = match self.entry.clone() {
            Entry::Remote(remote) | Entry::Both { remote, .. } => Entry::Both { local, remote },
            Entry::Local(..) => Entry::Local(local),
            Entry::Temp(..) => Entry::Temp(local),
        };
        self.written = true;
        Ok(())
    }

    /// Releases the handle. A file created through the overlay queues its
    /// initial PUT here; a modified file queues a POST.
    pub async fn close(self) -> rqfs::Result<()> {
        let path = self.path().to_owned();
        if self.tree.created.remove(&path).is_some() {
            self.tree.queue_data(&path, Method::Put, None).await;
        } else if self.written {
            self.tree.queue_data(&path, Method::Post, None).await;
        }
        Ok(())
    }
}

#[derive(Debug)]
struct HandleGuard {
    handles: Arc<DashMap<PathBuf, usize>>,
    path: PathBuf,
}

impl HandleGuard {
    fn new(handles: Arc<DashMap<PathBuf, usize>>, path: PathBuf) -> Self {
        *handles.entry(path.clone()).or_insert(0) += 1;
        Self { handles, path }
    }
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        if let Some(mut count) = self.handles.get_mut(&self.path) {
            *count = count.saturating_sub(1);
        }
        self.handles.remove_if(&self.path, |_, count| *count == 0);
    }
}

use std::collections::HashMap;

use bincode::Options;
use dashmap::DashMap;
use rqfs::{
    path::{self, FsPathBuf, Path, PathBuf},
    Method, QueueEntry,
};
use tokio::sync::Notify;

/// Where the queue keeps its durable state.
#[derive(Debug, Clone)]
pub enum QueuePersist {
    Memory,
    OnDisk(FsPathBuf),
}

/// The durable request queue: pending mutations keyed by parent directory,
/// FIFO within each key.
///
/// The in-memory map is authoritative; the on-disk copy follows every
/// mutation so that pending requests survive a restart.
#[derive(Debug)]
pub struct RequestQueue {
    entries: DashMap<PathBuf, Vec<QueueEntry>>,
    persist: QueuePersist,
    notify: Notify,
}

impl RequestQueue {
    pub fn new(persist: QueuePersist) -> Self {
        Self {
            entries: DashMap::new(),
            persist,
            notify: Notify::new(),
        }
    }

    pub async fn load_from_disk(&self) -> rqfs::Result<()> {
        use std::fs;
        use std::io::BufReader;

        let path = match &self.persist {
            QueuePersist::Memory => return Ok(()),
            QueuePersist::OnDisk(path) => path.clone(),
        };
        if !path.exists() {
            return Ok(());
        }
        log::info!("loading pending requests from {path}");

        let handle = tokio::task::spawn_blocking(move || {
            let reader = fs::File::open(path).map_err(crate::error::queue)?;
            let reader = BufReader::new(reader);
            let opts = bincode_options();
            let entries: HashMap<PathBuf, Vec<QueueEntry>> = opts
                .deserialize_from(reader)
                .map_err(crate::error::queue)?;
            Ok::<_, rqfs::Error>(entries)
        });

        let entries = handle.await.unwrap()?;
        log::trace!("loaded requests for {} directories", entries.len());
        self.entries.clear();
        for (key, reqs) in entries {
            self.entries.insert(key, reqs);
        }
        if !self.entries.is_empty() {
            self.notify.notify_one();
        }
        Ok(())
    }

    pub async fn save_to_disk(&self) -> rqfs::Result<()> {
        use std::fs;
        use std::io::BufWriter;

        let path = match &self.persist {
            QueuePersist::Memory => return Ok(()),
            QueuePersist::OnDisk(path) => path.clone(),
        };

        let snapshot: HashMap<PathBuf, Vec<QueueEntry>> = self
            .entries
            .iter()
            .map(|kv| (kv.key().clone(), kv.value().clone()))
            .collect();
        log::trace!("saving requests for {} directories to {path}", snapshot.len());

        let handle = tokio::task::spawn_blocking(move || {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(crate::error::queue)?;
            }
            let writer = fs::File::create(&path).map_err(crate::error::queue)?;
            let writer = BufWriter::new(writer);
            let opts = bincode_options();
            opts.serialize_into(writer, &snapshot)
                .map_err(crate::error::queue)?;
            Ok::<_, rqfs::Error>(())
        });

        handle.await.unwrap()
    }

    /// Future resolving when new entries may be available.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }

    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|kv| kv.value().is_empty())
    }

    /// Appends `entry` under its parent directory key.
    ///
    /// A DELETE directly following a DELETE for the same name is dropped:
    /// replay must never see two deletions without a create in between.
    pub async fn queue_request(&self, entry: QueueEntry) -> rqfs::Result<()> {
        let key = entry.parent().to_owned();
        {
            let mut reqs = self.entries.entry(key).or_default();
            if entry.method == Method::Delete {
                let dup = reqs
                    .iter()
                    .rev()
                    .find(|e| path::eq_normalized(e.path.as_str(), entry.path.as_str()))
                    .map(|e| e.method == Method::Delete)
                    .unwrap_or(false);
                if dup {
                    log::debug!("dropping duplicate DELETE for {}", entry.path);
                    return Ok(());
                }
            }
            log::info!("queueing {} for {}", entry.method, entry.path);
            reqs.push(entry);
        }
        let res = self.save_to_disk().await;
        self.notify.notify_one();
        res
    }

    /// Pending methods in `parent`, keyed by NFKD-normalized base name.
    /// The newest entry wins for a name that appears several times.
    pub fn get_requests(&self, parent: &Path) -> HashMap<String, Method> {
        let mut map = HashMap::new();
        if let Some(reqs) = self.entries.get(parent) {
            for req in reqs.iter() {
                map.insert(path::normal_form(req.name()), req.method);
            }
        }
        map
    }

    /// The method of a pending request referring to `path`, either as
    /// source or as MOVE destination.
    pub fn pending_for(&self, path: &Path) -> Option<Method> {
        for kv in self.entries.iter() {
            for req in kv.value().iter() {
                if path::eq_normalized(req.path.as_str(), path.as_str()) {
                    return Some(req.method);
                }
                if let Some(dest) = &req.dest_path {
                    if path::eq_normalized(dest.as_str(), path.as_str()) {
                        return Some(req.method);
                    }
                }
            }
        }
        None
    }

    /// Removes every key equal to or below `prefix`.
    pub async fn remove_path(&self, prefix: &Path) -> rqfs::Result<()> {
        self.entries.retain(|key, _| !key.starts_with(prefix));
        self.save_to_disk().await
    }

    /// Re-parents every key and entry path below `old_prefix` to
    /// `new_prefix`. Used when a directory is renamed.
    pub async fn update_path(&self, old_prefix: &Path, new_prefix: &Path) -> rqfs::Result<()> {
        let moved: Vec<PathBuf> = self
            .entries
            .iter()
            .filter(|kv| kv.key().starts_with(old_prefix))
            .map(|kv| kv.key().clone())
            .collect();

        for key in moved {
            if let Some((_, reqs)) = self.entries.remove(&key) {
                let new_key = reparent(&key, old_prefix, new_prefix);
                let reqs: Vec<QueueEntry> = reqs
                    .into_iter()
                    .map(|mut req| {
                        req.path = reparent(&req.path, old_prefix, new_prefix);
                        req.dest_path = req
                            .dest_path
                            .map(|dest| reparent(&dest, old_prefix, new_prefix));
                        req
                    })
                    .collect();
                self.entries.entry(new_key).or_default().extend(reqs);
            }
        }
        self.save_to_disk().await
    }

    /// Keys that currently hold pending entries.
    pub fn parents(&self) -> Vec<PathBuf> {
        self.entries
            .iter()
            .filter(|kv| !kv.value().is_empty())
            .map(|kv| kv.key().clone())
            .collect()
    }

    /// The oldest pending entry of `parent`.
    pub fn front(&self, parent: &Path) -> Option<QueueEntry> {
        self.entries
            .get(parent)
            .and_then(|reqs| reqs.first().cloned())
    }

    /// Pending entries of `parent`, oldest first.
    pub fn requests(&self, parent: &Path) -> Vec<QueueEntry> {
        self.entries
            .get(parent)
            .map(|reqs| reqs.clone())
            .unwrap_or_default()
    }

    /// Removes `entry` from the front of `parent`, if it is still there.
    pub async fn confirm(&self, parent: &Path, entry: &QueueEntry) -> rqfs::Result<()> {
        let mut emptied = false;
        if let Some(mut reqs) = self.entries.get_mut(parent) {
            if reqs.first() == Some(entry) {
                reqs.remove(0);
            }
            emptied = reqs.is_empty();
        }
        if emptied {
            self.entries.remove_if(parent, |_, reqs| reqs.is_empty());
        }
        self.save_to_disk().await
    }
}

impl crate::Shutdown for RequestQueue {
    /// Pending requests must survive the restart.
    async fn shutdown(&self) -> anyhow::Result<()> {
        self.save_to_disk().await?;
        Ok(())
    }
}

fn reparent(path: &Path, old_prefix: &Path, new_prefix: &Path) -> PathBuf {
    match path.strip_prefix(old_prefix) {
        Some(rest) if rest.as_str().is_empty() => new_prefix.to_owned(),
        Some(rest) => new_prefix.join(rest),
        None => path.to_owned(),
    }
}

fn bincode_options() -> impl bincode::Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .allow_trailing_bytes()
}

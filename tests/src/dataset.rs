use futures::future::BoxFuture;
use rqfs::path::FsPath;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone)]
pub enum Entry {
    Dir {
        /// Name of the directory
        name: String,
        /// Entries of the directory
        entries: Vec<Entry>,
    },
    File {
        /// Name of the file
        name: String,
        /// Content of the file
        content: String,
    },
}

pub fn dir(name: &str, entries: Vec<Entry>) -> Entry {
    Entry::Dir {
        name: name.into(),
        entries,
    }
}

pub fn file(name: &str, content: &str) -> Entry {
    Entry::File {
        name: name.into(),
        content: content.into(),
    }
}

impl Entry {
    pub fn create_fs<'a>(&'a self, path: &'a FsPath) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            match self {
                Entry::Dir { name, entries } => {
                    let path = path.join(name);
                    tokio::fs::create_dir(&path).await.unwrap();
                    for entry in entries.iter() {
                        entry.create_fs(&path).await;
                    }
                }
                Entry::File { name, content } => {
                    let path = path.join(name);
                    let mut f = tokio::fs::File::create(&path).await.unwrap();
                    f.write_all(content.as_bytes()).await.unwrap();
                }
            }
        })
    }
}

/// Seed trees for the three sibling roots of a harness.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub local: Vec<Entry>,
    pub work: Vec<Entry>,
    pub remote: Vec<Entry>,
}

impl Dataset {
    /// A directory `/a` present on both sides, nothing in it.
    pub fn dir_a() -> Self {
        Self {
            local: vec![dir("a", vec![])],
            work: vec![],
            remote: vec![dir("a", vec![])],
        }
    }

    pub async fn create_fs(&self, root: &FsPath) {
        for (sub, entries) in [
            ("local", &self.local),
            ("work", &self.work),
            ("remote", &self.remote),
        ] {
            let sub_root = root.join(sub);
            tokio::fs::create_dir_all(&sub_root).await.unwrap();
            for entry in entries.iter() {
                entry.create_fs(&sub_root).await;
            }
        }
    }
}

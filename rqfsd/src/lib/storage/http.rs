//! Remote content repository over HTTP.
//!
//! The repository is resource-oriented: every logical name maps to a URL
//! below the configured base. Directory listings are JSON (`GET` with
//! `Accept: application/json`), existence is probed with `HEAD`, uploads
//! use `PUT`, directories are created with `MKCOL` and entries are moved
//! with `MOVE` plus a `Destination` header. Directories are reported with
//! `Content-Type: application/x-directory`.

use async_stream::try_stream;
use chrono::{DateTime, Utc};
use futures::{Stream, TryStreamExt};
use rqfs::{
    path::{Path, PathBuf},
    Metadata,
};
use tokio::io::{self, AsyncReadExt};
use url::Url;

use crate::Shutdown;

const DIRECTORY_MIMETYPE: &str = "application/x-directory";

#[derive(Debug, Clone)]
pub struct ContentRepo {
    client: reqwest::Client,
    base_url: Url,
    user_agent: String,
}

impl ContentRepo {
    pub fn new(base_url: Url) -> anyhow::Result<Self> {
        if base_url.cannot_be_a_base() {
            anyhow::bail!("Not a usable repository URL: {base_url}");
        }
        let user_agent = format!("rqfsd/{}", env!("CARGO_PKG_VERSION"));
        let client = reqwest::Client::builder()
            .user_agent(user_agent.clone())
            .build()?;
        log::info!("Initializing content repository at {base_url}");
        Ok(Self {
            client,
            base_url,
            user_agent,
        })
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    fn url(&self, path: &Path) -> rqfs::Result<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| rqfs::remote_error!(None, "repository URL has no path: {path}"))?;
            segments.pop_if_empty();
            segments.extend(path.components());
        }
        Ok(url)
    }

    async fn check(&self, resp: reqwest::Response) -> rqfs::Result<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let msg = resp.text().await.unwrap_or_default();
        Err(rqfs::Error::remote(Some(status.as_u16()), msg))
    }

    async fn head(&self, path: &Path) -> rqfs::Result<Option<reqwest::Response>> {
        let url = self.url(path)?;
        let resp = self
            .client
            .head(url)
            .send()
            .await
            .map_err(crate::error::remote)?;
        if resp.status() == http::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(self.check(resp).await?))
    }
}

impl super::Exists for ContentRepo {
    async fn exists(&self, path: &Path) -> rqfs::Result<bool> {
        Ok(self.head(path).await?.is_some())
    }
}

impl super::Stat for ContentRepo {
    async fn metadata(&self, path: &Path) -> rqfs::Result<Option<Metadata>> {
        let resp = match self.head(path).await? {
            Some(resp) => resp,
            None => return Ok(None),
        };
        Ok(Some(map_head(path, &resp)?))
    }
}

impl super::DirEntries for ContentRepo {
    fn dir_entries(
        &self,
        parent_path: &Path,
    ) -> impl Stream<Item = rqfs::Result<Metadata>> + Send {
        let parent_path = parent_path.to_owned();
        log::trace!("listing remote entries of {parent_path}");
        try_stream! {
            let url = self.url(&parent_path)?;
            let resp = self
                .client
                .get(url)
                .header(http::header::ACCEPT, "application/json")
                .send()
                .await
                .map_err(crate::error::remote)?;
            let resp = self.check(resp).await?;
            let listing: api::Listing = resp.json().await.map_err(crate::error::remote)?;
            for entry in listing.entries {
                yield map_entry(&parent_path, entry)?;
            }
        }
    }
}

impl super::ReadFile for ContentRepo {
    async fn read_file(&self, path: PathBuf) -> rqfs::Result<impl io::AsyncRead + Send> {
        let url = self.url(&path)?;
        log::trace!("fetching {url}");
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(crate::error::remote)?;
        if resp.status() == http::StatusCode::NOT_FOUND {
            return Err(rqfs::Error::NotFound(path));
        }
        let resp = self.check(resp).await?;
        let stream = resp
            .bytes_stream()
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err));
        Ok(tokio_util::io::StreamReader::new(stream))
    }
}

impl super::WriteFile for ContentRepo {
    async fn write_file(
        &self,
        path: &Path,
        data: impl io::AsyncRead + Send,
    ) -> rqfs::Result<Metadata> {
        let url = self.url(path)?;
        log::info!("uploading {url}");

        tokio::pin!(data);
        let mut body = Vec::new();
        data.read_to_end(&mut body).await?;
        let size = body.len() as u64;

        let resp = self
            .client
            .put(url)
            .body(body)
            .send()
            .await
            .map_err(crate::error::remote)?;
        self.check(resp).await?;
        Ok(Metadata::Regular {
            path: path.to_owned(),
            size,
            mtime: Utc::now(),
        })
    }
}

impl super::MkDir for ContentRepo {
    async fn mkdir(&self, path: &Path, parents: bool) -> rqfs::Result<()> {
        let mkcol = reqwest::Method::from_bytes(b"MKCOL").unwrap();
        let mut pending = Vec::new();
        if parents {
            let mut cur = Some(path);
            while let Some(p) = cur {
                if p.is_root() {
                    break;
                }
                pending.push(p.to_owned());
                cur = p.parent();
            }
            pending.reverse();
        } else {
            pending.push(path.to_owned());
        }

        for p in pending {
            let url = self.url(&p)?;
            log::info!("mkcol {url}");
            let resp = self
                .client
                .request(mkcol.clone(), url)
                .send()
                .await
                .map_err(crate::error::remote)?;
            match resp.status().as_u16() {
                // directory already there
                405 | 409 if parents => (),
                405 => return Err(rqfs::Error::AlreadyExists(p)),
                _ => {
                    self.check(resp).await?;
                }
            }
        }
        Ok(())
    }
}

impl super::MoveEntry for ContentRepo {
    async fn move_entry(&self, src: &Path, dest: &Path) -> rqfs::Result<Metadata> {
        let mv = reqwest::Method::from_bytes(b"MOVE").unwrap();
        let url = self.url(src)?;
        let dest_url = self.url(dest)?;
        log::info!("moving {url} to {dest_url}");
        let resp = self
            .client
            .request(mv, url)
            .header("Destination", dest_url.as_str())
            .header("Overwrite", "T")
            .send()
            .await
            .map_err(crate::error::remote)?;
        if resp.status() == http::StatusCode::NOT_FOUND {
            return Err(rqfs::Error::NotFound(src.to_owned()));
        }
        self.check(resp).await?;

        use super::Stat;
        match self.metadata(dest).await? {
            Some(md) => Ok(md),
            None => Err(rqfs::remote_error!(
                None,
                "moved entry is gone on the repository: {dest}"
            )),
        }
    }
}

impl super::Delete for ContentRepo {
    async fn delete(&self, path: &Path) -> rqfs::Result<()> {
        let url = self.url(path)?;
        log::info!("deleting {url}");
        let resp = self
            .client
            .delete(url)
            .send()
            .await
            .map_err(crate::error::remote)?;
        if resp.status() == http::StatusCode::NOT_FOUND {
            return Err(rqfs::Error::remote(Some(404), format!("{path}")));
        }
        self.check(resp).await?;
        Ok(())
    }
}

impl super::ResourceUrl for ContentRepo {
    fn resource_url(&self, path: &Path) -> rqfs::Result<Url> {
        self.url(path)
    }
}

impl Shutdown for ContentRepo {}

impl super::Storage for ContentRepo {}

impl super::RemoteStorage for ContentRepo {}

fn map_head(path: &Path, resp: &reqwest::Response) -> rqfs::Result<Metadata> {
    let headers = resp.headers();
    let is_dir = headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with(DIRECTORY_MIMETYPE))
        .unwrap_or(false);
    if is_dir {
        return Ok(Metadata::Directory {
            path: path.to_owned(),
        });
    }
    let size = headers
        .get(http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let mtime = headers
        .get(http::header::LAST_MODIFIED)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);
    Ok(Metadata::Regular {
        path: path.to_owned(),
        size,
        mtime,
    })
}

fn map_entry(parent_path: &Path, entry: api::Entry) -> rqfs::Result<Metadata> {
    let path = parent_path.join(&entry.name);
    let metadata = match entry.kind {
        api::Kind::Directory => Metadata::Directory { path },
        api::Kind::File => {
            let mtime = entry.mtime.ok_or_else(|| {
                rqfs::remote_error!(None, "Expected a modification time for {path}")
            })?;
            let size = entry
                .size
                .ok_or_else(|| rqfs::remote_error!(None, "Expected a size for {path}"))?;
            Metadata::Regular { path, size, mtime }
        }
        api::Kind::Other => Metadata::Special { path },
    };
    Ok(metadata)
}

mod api {
    use chrono::{DateTime, Utc};
    use serde::Deserialize;

    #[derive(Debug, Clone, Copy, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub enum Kind {
        Directory,
        File,
        #[serde(other)]
        Other,
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Entry {
        pub name: String,
        pub kind: Kind,
        pub size: Option<u64>,
        pub mtime: Option<DateTime<Utc>>,
    }

    #[derive(Debug, Clone, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Listing {
        #[serde(default)]
        pub entries: Vec<Entry>,
    }
}

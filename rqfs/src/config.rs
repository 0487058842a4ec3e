use anyhow::Context;
use glob::{MatchOptions, Pattern, PatternError};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::path::{FsPath, FsPathBuf, Path};

/// Predicate over file names, built from glob patterns.
/// Used for the temporary-file pattern of the share: names matching it are
/// served but never queued against the remote.
#[derive(Debug, Default, Clone)]
pub struct PatternList(Vec<Pattern>, MatchOptions);

impl PatternList {
    pub fn new<I>(patterns: I) -> Result<PatternList, PatternError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let patterns: Result<Vec<_>, _> = patterns
            .into_iter()
            .map(|p| Pattern::new(p.as_ref()))
            .collect();
        Ok(PatternList(patterns?, MatchOptions::new()))
    }

    /// Whether the final component of `path` matches any pattern.
    pub fn matches<P: AsRef<Path>>(&self, path: P) -> bool {
        let name = path.as_ref().file_name().unwrap_or("");
        self.0.iter().any(|p| p.matches_with(name, self.1))
    }
}

fn default_tmp_patterns() -> Vec<String> {
    vec!["~*".to_string(), ".smbdelete*".to_string(), "*.tmp".to_string()]
}

fn default_concurrency() -> usize {
    4
}

fn default_retry_limit() -> u32 {
    5
}

fn default_backoff_secs() -> u64 {
    1
}

fn default_max_backoff_secs() -> u64 {
    32
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root of the local content tree.
    pub local_dir: FsPathBuf,
    /// Root of the sibling work tree holding sidecar metadata.
    pub work_dir: FsPathBuf,
    /// Base URL of the remote content repository.
    pub remote_url: Url,
    #[serde(default = "default_tmp_patterns")]
    pub tmp_patterns: Vec<String>,
    #[serde(default = "default_concurrency")]
    pub sync_concurrency: usize,
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: u64,
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
}

impl Config {
    pub async fn load_from_file(path: &FsPath) -> anyhow::Result<Self> {
        let config_json = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read config from {path}"))?;
        let config_json = std::str::from_utf8(&config_json)?;
        Ok(serde_json::from_str(config_json)?)
    }

    pub fn tmp_pattern_list(&self) -> anyhow::Result<PatternList> {
        Ok(PatternList::new(self.tmp_patterns.iter())?)
    }
}

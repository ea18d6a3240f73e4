use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::retry::FetchError;

/// A file produced by a fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedFile {
    pub path: PathBuf,
    pub bytes: u64,
}

/// Fetches one media URL to a destination path.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Download `url` to `dest`, optionally through `proxy`.
    ///
    /// On success the file exists at `dest` with its full content; on
    /// failure nothing is left at `dest`.
    async fn fetch(
        &self,
        url: &str,
        proxy: Option<&str>,
        dest: &Path,
    ) -> Result<FetchedFile, FetchError>;
}

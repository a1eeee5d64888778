//! Support to serve PDFs from the local upload directory.
//!
//! This is mostly useful for development against a backend that stores uploads on local disk,
//! and for tests.

use std::path::{Component, Path, PathBuf};

use futures::future::BoxFuture;
use futures::{StreamExt, TryStreamExt};
use tokio_util::io::ReaderStream;

use super::{FetchResponse, Fetcher};
use crate::caching::{CacheContents, CacheError};
use crate::types::ResourcePath;

/// Fetcher implementation that reads files below a root directory.
#[derive(Debug, Clone)]
pub struct FilesystemFetcher {
    root: PathBuf,
}

impl FilesystemFetcher {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Maps a logical path to a file below the root.
    ///
    /// Absolute URLs and paths escaping the root are rejected.
    pub fn file_path(&self, path: &ResourcePath) -> CacheContents<PathBuf> {
        if path.is_absolute_url() {
            return Err(CacheError::InvalidPath(path.to_string()));
        }

        let relative = Path::new(path.relative());
        let escapes_root = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes_root {
            return Err(CacheError::InvalidPath(path.to_string()));
        }

        Ok(self.root.join(relative))
    }

    async fn open(&self, path: &ResourcePath) -> CacheContents<FetchResponse> {
        let file_path = self.file_path(path)?;
        tracing::debug!("Fetching pdf from `{}`", file_path.display());

        let file = tokio::fs::File::open(&file_path).await?;
        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return Err(CacheError::status(404, "Not Found"));
        }

        let body = ReaderStream::new(file).map_err(CacheError::from).boxed();
        Ok(FetchResponse {
            content_length: Some(metadata.len()),
            body,
        })
    }
}

impl Fetcher for FilesystemFetcher {
    fn fetch<'a>(&'a self, path: &'a ResourcePath) -> BoxFuture<'a, CacheContents<FetchResponse>> {
        Box::pin(self.open(path))
    }

    fn name(&self) -> &'static str {
        "filesystem"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::download;

    fn path(p: &str) -> ResourcePath {
        ResourcePath::new(p).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_file() {
        let dir = shala_test::tempdir();
        std::fs::create_dir_all(dir.path().join("pdfs")).unwrap();
        std::fs::write(dir.path().join("pdfs/a.pdf"), shala_test::pdf_bytes(20_000)).unwrap();

        let fetcher = FilesystemFetcher::new(dir.path().to_path_buf());
        let handle = download(&fetcher, &path("/pdfs/a.pdf"), None, true)
            .await
            .unwrap();

        assert_eq!(handle.len(), 20_000);
    }

    #[tokio::test]
    async fn test_missing_file() {
        let dir = shala_test::tempdir();
        let fetcher = FilesystemFetcher::new(dir.path().to_path_buf());

        let result = download(&fetcher, &path("/pdfs/missing.pdf"), None, true).await;
        assert_eq!(result.unwrap_err(), CacheError::status(404, "Not Found"));

        std::fs::create_dir_all(dir.path().join("pdfs")).unwrap();
        let result = download(&fetcher, &path("/pdfs"), None, true).await;
        assert_eq!(result.unwrap_err(), CacheError::status(404, "Not Found"));
    }

    #[test]
    fn test_paths_escaping_root_are_rejected() {
        let fetcher = FilesystemFetcher::new(PathBuf::from("/srv/uploads"));

        assert_eq!(
            fetcher.file_path(&path("/pdfs/./a.pdf")).unwrap(),
            PathBuf::from("/srv/uploads/pdfs/a.pdf")
        );
        assert!(fetcher.file_path(&path("/../etc/passwd")).is_err());
        assert!(fetcher.file_path(&path("pdfs/../../secret.pdf")).is_err());
        assert!(fetcher.file_path(&path("https://example.org/a.pdf")).is_err());
    }
}

//! Fetching of PDF payloads from the content host.
//!
//! The [`PdfCache`](crate::caching::PdfCache) consumes a [`Fetcher`], which turns a logical
//! [`ResourcePath`] into a stream of bytes with an optional total length. This module provides
//! the HTTP and local filesystem implementations, and the shared logic that drains such a
//! stream while reporting progress.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::StreamExt;

use crate::caching::{CacheContents, ResourceHandle};
use crate::config::{Config, ContentSource};
use crate::types::ResourcePath;
use crate::utils::http::DownloadTimeouts;

mod filesystem;
mod http;
mod progress;

pub use self::filesystem::FilesystemFetcher;
pub use self::http::HttpFetcher;
pub use self::progress::ProgressFn;
use self::progress::Progress;

/// Upper bound for the buffer reserved up front from an announced length.
const MAX_PREALLOCATION: u64 = 64 * 1024 * 1024;

/// A response to a fetch: the body as a stream of chunks, and its total size if known.
pub struct FetchResponse {
    /// The announced total size, e.g. from a `Content-Length` header.
    pub content_length: Option<u64>,
    pub body: BoxStream<'static, CacheContents<Bytes>>,
}

impl FetchResponse {
    /// Creates a response from chunks that are already in memory.
    pub fn from_chunks(chunks: Vec<Bytes>, with_length: bool) -> Self {
        let total = chunks.iter().map(|c| c.len() as u64).sum();
        Self {
            content_length: with_length.then_some(total),
            body: futures::stream::iter(chunks.into_iter().map(Ok)).boxed(),
        }
    }
}

impl fmt::Debug for FetchResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchResponse")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// The resource fetch interface consumed by the cache.
///
/// Implementations derive the full location from the logical path. A failed or non-success
/// request resolves to an error; the returned body may still fail midway.
pub trait Fetcher: fmt::Debug + Send + Sync + 'static {
    fn fetch<'a>(&'a self, path: &'a ResourcePath) -> BoxFuture<'a, CacheContents<FetchResponse>>;

    /// A short name of the fetcher kind, used for metrics.
    fn name(&self) -> &'static str;
}

/// Creates the fetcher for the configured content source.
pub fn fetcher_from_config(config: &Config) -> Arc<dyn Fetcher> {
    let timeouts = DownloadTimeouts::from_config(config);
    match &config.source {
        ContentSource::Http { base_url, headers } => {
            let client = crate::utils::http::create_client(&timeouts);
            let mut fetcher = HttpFetcher::new(client, base_url.clone(), timeouts)
                .with_headers(headers.clone());
            if let Some(token) = &config.auth_token {
                fetcher = fetcher.with_bearer_token(token.clone());
            }
            Arc::new(fetcher)
        }
        ContentSource::Filesystem { path } => Arc::new(FilesystemFetcher::new(path.clone())),
    }
}

/// Fetches `path` and assembles the body into a single payload.
///
/// Progress is reported to `on_progress` after every chunk when the total size is known,
/// and once with `100` after the payload passed validation.
pub(crate) async fn download(
    fetcher: &dyn Fetcher,
    path: &ResourcePath,
    on_progress: Option<ProgressFn>,
    verify_pdf_header: bool,
) -> CacheContents<ResourceHandle> {
    let start = Instant::now();
    let result = do_download(fetcher, path, on_progress, verify_pdf_header).await;

    let status = match &result {
        Ok(_) => "ok",
        Err(err) => err.metrics_tag(),
    };
    metric!(
        timer("download.duration") = start.elapsed(),
        "fetcher" => fetcher.name(),
        "status" => status,
    );

    match &result {
        Ok(handle) => {
            metric!(time_raw("download.size") = handle.len(), "fetcher" => fetcher.name());
            tracing::debug!(path = %path, size = handle.len(), "fetched pdf");
        }
        Err(err) => {
            tracing::debug!(
                error = err as &dyn std::error::Error,
                path = %path,
                "failed to fetch pdf"
            );
        }
    }

    result
}

async fn do_download(
    fetcher: &dyn Fetcher,
    path: &ResourcePath,
    on_progress: Option<ProgressFn>,
    verify_pdf_header: bool,
) -> CacheContents<ResourceHandle> {
    let FetchResponse {
        content_length,
        mut body,
    } = fetcher.fetch(path).await?;

    let mut progress = Progress::new(on_progress, content_length);
    let capacity = content_length.unwrap_or(0).min(MAX_PREALLOCATION);
    let mut buf = BytesMut::with_capacity(capacity as usize);

    while let Some(chunk) = body.next().await.transpose()? {
        buf.extend_from_slice(&chunk);
        progress.advance(chunk.len());
    }
    tracing::trace!(path = %path, received = progress.received(), "body complete");

    let handle = ResourceHandle::materialize(buf.freeze(), content_length, verify_pdf_header)?;
    progress.finish();
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::caching::CacheError;

    #[derive(Debug)]
    struct ChunkFetcher {
        chunks: Vec<Bytes>,
        with_length: bool,
    }

    impl Fetcher for ChunkFetcher {
        fn fetch<'a>(
            &'a self,
            _path: &'a ResourcePath,
        ) -> BoxFuture<'a, CacheContents<FetchResponse>> {
            let response = FetchResponse::from_chunks(self.chunks.clone(), self.with_length);
            Box::pin(async move { Ok(response) })
        }

        fn name(&self) -> &'static str {
            "chunks"
        }
    }

    fn record() -> (ProgressFn, Arc<Mutex<Vec<u8>>>) {
        let reports = Arc::new(Mutex::new(Vec::new()));
        let inner = reports.clone();
        (Arc::new(move |p: u8| inner.lock().unwrap().push(p)), reports)
    }

    #[tokio::test]
    async fn test_download_assembles_chunks() {
        let fetcher = ChunkFetcher {
            chunks: vec![
                Bytes::from_static(b"%PDF-"),
                Bytes::from_static(b"1.4 "),
                Bytes::from_static(b"body"),
            ],
            with_length: true,
        };
        let (callback, reports) = record();
        let path = ResourcePath::new("/a.pdf").unwrap();

        let handle = download(&fetcher, &path, Some(callback), true)
            .await
            .unwrap();
        assert_eq!(handle.bytes().unwrap(), &b"%PDF-1.4 body"[..]);
        assert_eq!(*reports.lock().unwrap(), vec![38, 69, 100]);
    }

    #[tokio::test]
    async fn test_invalid_payload_never_reports_completion() {
        let fetcher = ChunkFetcher {
            chunks: vec![Bytes::from_static(b"<html>"), Bytes::from_static(b"body")],
            with_length: true,
        };
        let (callback, reports) = record();
        let path = ResourcePath::new("/a.pdf").unwrap();

        let result = download(&fetcher, &path, Some(callback), true).await;
        assert_eq!(
            result.unwrap_err(),
            CacheError::Decode("missing PDF header".into())
        );
        assert_eq!(*reports.lock().unwrap(), vec![60]);
    }

    #[tokio::test]
    async fn test_download_body_error() {
        #[derive(Debug)]
        struct BrokenBody;

        impl Fetcher for BrokenBody {
            fn fetch<'a>(
                &'a self,
                _path: &'a ResourcePath,
            ) -> BoxFuture<'a, CacheContents<FetchResponse>> {
                let body = futures::stream::iter(vec![
                    Ok(Bytes::from_static(b"%PDF-")),
                    Err(CacheError::Fetch {
                        status: None,
                        message: "connection reset".into(),
                    }),
                ])
                .boxed();
                Box::pin(async move {
                    Ok(FetchResponse {
                        content_length: Some(100),
                        body,
                    })
                })
            }

            fn name(&self) -> &'static str {
                "broken"
            }
        }

        let path = ResourcePath::new("/a.pdf").unwrap();
        let result = download(&BrokenBody, &path, None, true).await;
        assert_eq!(
            result.unwrap_err(),
            CacheError::Fetch {
                status: None,
                message: "connection reset".into()
            }
        );
    }
}

//! Support to fetch PDFs from the content host over HTTP.

use std::collections::BTreeMap;

use futures::future::BoxFuture;
use futures::{StreamExt, TryStreamExt};
use reqwest::{header, Client, StatusCode, Url};

use super::{FetchResponse, Fetcher};
use crate::caching::{CacheContents, CacheError};
use crate::types::ResourcePath;
use crate::utils::http::{DownloadTimeouts, with_trailing_slash};

/// Fetcher implementation for the HTTP content host.
///
/// Relative paths are resolved against `base_url`, absolute `http(s)` URLs are fetched as is.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    base_url: Url,
    headers: BTreeMap<String, String>,
    bearer_token: Option<String>,
    timeouts: DownloadTimeouts,
}

impl HttpFetcher {
    pub fn new(client: Client, base_url: Url, timeouts: DownloadTimeouts) -> Self {
        Self {
            client,
            base_url: with_trailing_slash(base_url),
            headers: BTreeMap::new(),
            bearer_token: None,
            timeouts,
        }
    }

    /// Adds headers sent with every request.
    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Sends the token as `Authorization: Bearer` with every request.
    pub fn with_bearer_token(mut self, token: String) -> Self {
        self.bearer_token = Some(token);
        self
    }

    /// Derives the full URL of a resource.
    pub fn url(&self, path: &ResourcePath) -> CacheContents<Url> {
        let url = if path.is_absolute_url() {
            Url::parse(path.as_str())
        } else {
            self.base_url.join(path.relative())
        };
        url.map_err(|_| CacheError::InvalidPath(path.to_string()))
    }

    async fn fetch_url(&self, url: Url) -> CacheContents<FetchResponse> {
        tracing::debug!("Fetching pdf from `{}`", url);

        let mut builder = self.client.get(url.clone());
        for (key, value) in &self.headers {
            if let Ok(key) = header::HeaderName::from_bytes(key.as_bytes()) {
                builder = builder.header(key, value.as_str());
            }
        }
        if let Some(token) = &self.bearer_token {
            builder = builder.bearer_auth(token);
        }

        let response = tokio::time::timeout(self.timeouts.head, builder.send())
            .await
            .map_err(|_| CacheError::Timeout(self.timeouts.head))??;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(&url, status));
        }

        tracing::trace!("Success hitting `{}`", url);
        let content_length = response.content_length();
        let body = response.bytes_stream().map_err(CacheError::from).boxed();

        Ok(FetchResponse {
            content_length,
            body,
        })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch<'a>(&'a self, path: &'a ResourcePath) -> BoxFuture<'a, CacheContents<FetchResponse>> {
        Box::pin(async move {
            let url = self.url(path)?;
            self.fetch_url(url).await
        })
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Converts a non-success status code to a [`CacheError`].
fn status_error(url: &Url, status: StatusCode) -> CacheError {
    if matches!(status, StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED) {
        tracing::debug!("Insufficient permissions to fetch `{url}`: {status}");
    } else if status.is_client_error() {
        tracing::debug!("Unexpected client error status code from `{url}`: {status}");
    } else {
        tracing::debug!("Unexpected status code from `{url}`: {status}");
    }

    let message = status
        .canonical_reason()
        .map(str::to_owned)
        .unwrap_or_else(|| status.to_string());
    CacheError::status(status.as_u16(), message)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use bytes::Bytes;

    use super::*;
    use crate::download::{ProgressFn, download};

    fn fetcher(server: &shala_test::BackendServer) -> HttpFetcher {
        HttpFetcher::new(Client::new(), server.url("/"), Default::default())
    }

    fn path(p: &str) -> ResourcePath {
        ResourcePath::new(p).unwrap()
    }

    #[test]
    fn test_url_derivation() {
        let base: Url = "https://api.example.org/api".parse().unwrap();
        let fetcher = HttpFetcher::new(Client::new(), base, Default::default());

        assert_eq!(
            fetcher.url(&path("/uploads/pdfs/a.pdf")).unwrap().as_str(),
            "https://api.example.org/api/uploads/pdfs/a.pdf"
        );
        assert_eq!(
            fetcher.url(&path("uploads/b.pdf")).unwrap().as_str(),
            "https://api.example.org/api/uploads/b.pdf"
        );
        assert_eq!(
            fetcher
                .url(&path("https://cdn.example.org/c.pdf"))
                .unwrap()
                .as_str(),
            "https://cdn.example.org/c.pdf"
        );
    }

    #[tokio::test]
    async fn test_fetch_pdf() {
        shala_test::setup();
        let server = shala_test::BackendServer::new();
        server.add("uploads/a.pdf", shala_test::pdf_bytes(4096));

        let fetcher = fetcher(&server);
        let handle = download(&fetcher, &path("/uploads/a.pdf"), None, true)
            .await
            .unwrap();

        assert_eq!(handle.len(), 4096);
        assert!(handle.bytes().unwrap().starts_with(b"%PDF-"));
        assert_eq!(server.accesses(), 1);
    }

    #[tokio::test]
    async fn test_fetch_missing() {
        shala_test::setup();
        let server = shala_test::BackendServer::new();

        let fetcher = fetcher(&server);
        let result = download(&fetcher, &path("/uploads/missing.pdf"), None, true).await;

        assert_eq!(result.unwrap_err(), CacheError::status(404, "Not Found"));
    }

    #[tokio::test]
    async fn test_fetch_server_error() {
        shala_test::setup();
        let server = shala_test::BackendServer::new();

        let fetcher = fetcher(&server);
        let result = download(&fetcher, &path("/status/503/a.pdf"), None, true).await;

        assert_eq!(
            result.unwrap_err(),
            CacheError::status(503, "Service Unavailable")
        );
    }

    #[tokio::test]
    async fn test_fetch_not_a_pdf() {
        shala_test::setup();
        let server = shala_test::BackendServer::new();
        server.add("login.html", Bytes::from_static(b"<html>login</html>"));

        let fetcher = fetcher(&server);
        let result = download(&fetcher, &path("/login.html"), None, true).await;

        assert_eq!(
            result.unwrap_err(),
            CacheError::Decode("missing PDF header".into())
        );
    }

    #[tokio::test]
    async fn test_progress_with_content_length() {
        shala_test::setup();
        let server = shala_test::BackendServer::new();
        server.add("uploads/big.pdf", shala_test::pdf_bytes(256 * 1024));

        let reports = Arc::new(Mutex::new(Vec::new()));
        let callback: ProgressFn = {
            let reports = reports.clone();
            Arc::new(move |p: u8| reports.lock().unwrap().push(p))
        };

        let fetcher = fetcher(&server);
        download(&fetcher, &path("/uploads/big.pdf"), Some(callback), true)
            .await
            .unwrap();

        let reports = reports.lock().unwrap();
        assert!(!reports.is_empty());
        assert!(reports.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(reports.last(), Some(&100));
    }

    #[tokio::test]
    async fn test_progress_without_content_length() {
        shala_test::setup();
        let server = shala_test::BackendServer::new();
        server.add("uploads/big.pdf", shala_test::pdf_bytes(64 * 1024));

        let reports = Arc::new(Mutex::new(Vec::new()));
        let callback: ProgressFn = {
            let reports = reports.clone();
            Arc::new(move |p: u8| reports.lock().unwrap().push(p))
        };

        let fetcher = fetcher(&server);
        let handle = download(&fetcher, &path("/chunked/uploads/big.pdf"), Some(callback), true)
            .await
            .unwrap();

        assert_eq!(handle.len(), 64 * 1024);
        assert_eq!(*reports.lock().unwrap(), vec![100]);
    }

    #[tokio::test]
    async fn test_headers_and_token_are_sent() {
        shala_test::setup();
        let server = shala_test::BackendServer::new();
        server.add("uploads/a.pdf", shala_test::pdf_bytes(100));

        let fetcher = fetcher(&server)
            .with_headers(BTreeMap::from([("x-client".into(), "tests".into())]))
            .with_bearer_token("secret".into());
        download(&fetcher, &path("/uploads/a.pdf"), None, true)
            .await
            .unwrap();

        let headers = server.last_headers();
        assert_eq!(headers.get("x-client").map(String::as_str), Some("tests"));
        assert_eq!(
            headers.get("authorization").map(String::as_str),
            Some("Bearer secret")
        );
    }

    #[tokio::test]
    async fn test_head_timeout() {
        shala_test::setup();
        let server = shala_test::BackendServer::new();
        server.add("uploads/a.pdf", shala_test::pdf_bytes(100));

        let timeouts = DownloadTimeouts {
            head: std::time::Duration::from_millis(50),
            ..Default::default()
        };
        let fetcher = HttpFetcher::new(Client::new(), server.url("/"), timeouts);
        let result = download(&fetcher, &path("/delay/1s/uploads/a.pdf"), None, true).await;

        assert_eq!(
            result.unwrap_err(),
            CacheError::Timeout(std::time::Duration::from_millis(50))
        );
    }
}

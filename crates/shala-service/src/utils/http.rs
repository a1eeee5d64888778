use std::time::Duration;

use crate::config::Config;

/// Various timeouts for the HTTP clients.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DownloadTimeouts {
    /// The timeout for establishing a connection.
    pub connect: Duration,
    /// The timeout for receiving the response headers.
    pub head: Duration,
    /// Global timeout for one download, including the body.
    pub max_download: Duration,
}

impl DownloadTimeouts {
    pub fn from_config(config: &Config) -> Self {
        Self {
            connect: config.connect_timeout,
            head: config.head_timeout,
            max_download: config.max_download_timeout,
        }
    }
}

impl Default for DownloadTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(1),
            head: Duration::from_secs(5),
            max_download: Duration::from_secs(5 * 60),
        }
    }
}

/// The `User-Agent` sent with every request.
pub const USER_AGENT: &str = concat!("shala/", env!("CARGO_PKG_VERSION"));

/// Creates a [`reqwest::Client`] with the provided timeouts.
///
/// The client is meant to be shared: it pools connections to the content host.
pub fn create_client(timeouts: &DownloadTimeouts) -> reqwest::Client {
    reqwest::ClientBuilder::new()
        .gzip(true)
        .user_agent(USER_AGENT)
        .connect_timeout(timeouts.connect)
        .timeout(timeouts.max_download)
        .pool_idle_timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_else(|err| {
            tracing::error!(
                error = &err as &dyn std::error::Error,
                "failed to build configured http client, using defaults"
            );
            reqwest::Client::new()
        })
}

/// Appends a slash to the path of `url` unless it already ends with one.
///
/// `Url::join` drops the last path segment of a base without a trailing slash.
pub fn with_trailing_slash(mut url: reqwest::Url) -> reqwest::Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

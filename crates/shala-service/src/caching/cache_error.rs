use std::time::Duration;

use thiserror::Error;

/// An error that happens when loading a PDF into the cache.
///
/// The error is shared between every caller awaiting the same load, so it is `Clone` and
/// carries only owned strings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The requested resource path is empty or otherwise unusable.
    #[error("invalid resource path: {0:?}")]
    InvalidPath(String),
    /// The resource could not be fetched.
    ///
    /// This covers non-success HTTP responses, in which case `status` holds the status code,
    /// as well as transport problems like connection loss or DNS resolution.
    #[error("{}", format_fetch_error(*status, message))]
    Fetch {
        status: Option<u16>,
        message: String,
    },
    /// The resource did not start responding in time.
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),
    /// The resource was fetched, but the payload is unusable.
    ///
    /// For example the body was empty, truncated, or not a PDF document.
    #[error("decode failed: {0}")]
    Decode(String),
    /// An unexpected error in the cache itself, for example a panicking load task.
    #[error("internal error")]
    InternalError,
}

fn format_fetch_error(status: Option<u16>, message: &str) -> String {
    match status {
        Some(status) => format!("fetch failed with status {status}: {message}"),
        None => format!("fetch failed: {message}"),
    }
}

impl CacheError {
    /// Creates a [`Fetch`](Self::Fetch) error for a non-success status code.
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Fetch {
            status: Some(status),
            message: message.into(),
        }
    }

    /// Returns `true` for the failures that belong to the fetch stage.
    pub fn is_fetch_error(&self) -> bool {
        matches!(self, Self::Fetch { .. } | Self::Timeout(_))
    }

    /// Returns the HTTP status code, if the failure was caused by one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Fetch { status, .. } => *status,
            _ => None,
        }
    }

    /// A short, stable label for metrics tags.
    pub fn metrics_tag(&self) -> &'static str {
        match self {
            Self::InvalidPath(_) => "invalid_path",
            Self::Fetch { status: Some(_), .. } => "status",
            Self::Fetch { status: None, .. } => "network",
            Self::Timeout(_) => "timeout",
            Self::Decode(_) => "decode",
            Self::InternalError => "internal",
        }
    }

    /// Converts a transport error by walking to the root cause of the error chain.
    fn transport_error(mut error: &dyn std::error::Error) -> Self {
        while let Some(src) = error.source() {
            error = src;
        }

        let mut message = error.to_string();

        // Special-case a few error strings
        if message.contains("certificate verify failed") {
            message = "certificate verify failed".to_string();
        }

        Self::Fetch {
            status: None,
            message,
        }
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::status(404, "Not Found"),
            std::io::ErrorKind::PermissionDenied => Self::status(403, "Forbidden"),
            _ => Self::transport_error(&err),
        }
    }
}

impl From<reqwest::Error> for CacheError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::status(status.as_u16(), status.to_string());
        }
        if err.is_timeout() {
            return Self::Fetch {
                status: None,
                message: "operation timed out".into(),
            };
        }
        Self::transport_error(&err)
    }
}

/// The result of a cache operation, either `Ok(T)` or the reason why the resource could not be
/// loaded.
pub type CacheContents<T = ()> = Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            CacheError::status(404, "Not Found").to_string(),
            "fetch failed with status 404: Not Found"
        );
        assert_eq!(
            CacheError::Fetch {
                status: None,
                message: "connection refused".into()
            }
            .to_string(),
            "fetch failed: connection refused"
        );
        assert_eq!(
            CacheError::Decode("empty payload".into()).to_string(),
            "decode failed: empty payload"
        );
    }

    #[test]
    fn test_io_error_mapping() {
        let err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(CacheError::from(err).status_code(), Some(404));

        let err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        assert_eq!(
            CacheError::from(err),
            CacheError::Fetch {
                status: None,
                message: "reset by peer".into()
            }
        );
    }

    #[test]
    fn test_fetch_classification() {
        assert!(CacheError::status(500, "boom").is_fetch_error());
        assert!(CacheError::Timeout(Duration::from_secs(1)).is_fetch_error());
        assert!(!CacheError::Decode("x".into()).is_fetch_error());
        assert_eq!(CacheError::Decode("x".into()).metrics_tag(), "decode");
    }
}

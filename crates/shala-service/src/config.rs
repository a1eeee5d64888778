use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use sentry::types::Dsn;
use serde::{Deserialize, Deserializer, de};
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::caching::PdfCacheConfig;

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other)
    Auto,
    /// With colors
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
    /// When set to true, backtraces are forced on.
    pub enable_backtraces: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
            enable_backtraces: true,
        }
    }
}

/// Control the metrics.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// host/port of statsd instance
    pub statsd: Option<String>,
    /// The prefix that should be added to all metrics.
    pub prefix: String,
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: env::var("STATSD_SERVER").ok(),
            prefix: "shala".into(),
            custom_tags: BTreeMap::new(),
        }
    }
}

/// Where PDFs and catalog data are loaded from.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentSource {
    /// The backend API over HTTP.
    Http {
        /// Base URL of the API, relative resource paths are resolved against it.
        base_url: Url,
        /// Additional headers sent with every content request.
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
    /// A local upload directory. The catalog is not available with this source.
    Filesystem { path: PathBuf },
}

impl ContentSource {
    /// The API base URL, if the source is served over HTTP.
    pub fn base_url(&self) -> Option<&Url> {
        match self {
            Self::Http { base_url, .. } => Some(base_url),
            Self::Filesystem { .. } => None,
        }
    }
}

impl Default for ContentSource {
    fn default() -> Self {
        ContentSource::Http {
            base_url: Url::parse("http://localhost:3000/api/").expect("a valid default url"),
            headers: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Configures the logging system.
    pub logging: Logging,

    /// Configures the metrics system.
    pub metrics: Metrics,

    /// DSN to report internal errors to.
    pub sentry_dsn: Option<Dsn>,

    /// The content source to fetch PDFs and catalog data from.
    pub source: ContentSource,

    /// Bearer token for the admin endpoints of the backend.
    pub auth_token: Option<String>,

    /// The timeout for establishing a connection.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// The timeout for the response headers of a request.
    #[serde(with = "humantime_serde")]
    pub head_timeout: Duration,

    /// The overall timeout of a single download.
    #[serde(with = "humantime_serde")]
    pub max_download_timeout: Duration,

    /// Limits of the in-memory PDF cache.
    pub pdf_cache: PdfCacheConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            logging: Logging::default(),
            metrics: Metrics::default(),
            sentry_dsn: None,
            source: ContentSource::default(),
            auth_token: None,
            connect_timeout: Duration::from_secs(1),
            head_timeout: Duration::from_secs(5),
            // Textbook PDFs reach a few hundred MB, a 1MB/s connection should not time out.
            max_download_timeout: Duration::from_secs(5 * 60),
            pdf_cache: PdfCacheConfig::default(),
        }
    }
}

impl Config {
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Config::default()),
        }
    }

    fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        // check for empty files explicitly
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        serde_yaml::from_str(&config).context("failed to parse config YAML")
    }
}

#[derive(Debug)]
struct LevelFilterVisitor;

impl de::Visitor<'_> for LevelFilterVisitor {
    type Value = LevelFilter;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> std::fmt::Result {
        write!(
            formatter,
            r#"one of the strings "off", "error", "warn", "info", "debug", or "trace""#
        )
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v {
            "off" => Ok(LevelFilter::OFF),
            "error" => Ok(LevelFilter::ERROR),
            "warn" => Ok(LevelFilter::WARN),
            "info" => Ok(LevelFilter::INFO),
            "debug" => Ok(LevelFilter::DEBUG),
            "trace" => Ok(LevelFilter::TRACE),
            _ => Err(de::Error::unknown_variant(
                v,
                &["off", "error", "warn", "info", "debug", "trace"],
            )),
        }
    }
}

fn deserialize_level_filter<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<LevelFilter, D::Error> {
    deserializer.deserialize_str(LevelFilterVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pdf_cache_defaults() {
        let cfg = Config::get(None).unwrap();
        assert_eq!(cfg.pdf_cache.expiry_window, Duration::from_secs(30 * 60));
        assert_eq!(cfg.pdf_cache.max_aggregate_bytes, 50 * 1024 * 1024);
        assert_eq!(cfg.pdf_cache.max_entry_count, 10);
        assert!(cfg.pdf_cache.verify_pdf_header);
    }

    #[test]
    fn test_pdf_cache_config() {
        // It should be possible to set individual limits in reasonable units without
        // affecting the other defaults.
        let yaml = r#"
            pdf_cache:
              expiry_window: 5m
              max_entry_count: 3
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(cfg.pdf_cache.expiry_window, Duration::from_secs(300));
        assert_eq!(cfg.pdf_cache.max_entry_count, 3);
        assert_eq!(
            cfg.pdf_cache.max_aggregate_bytes,
            PdfCacheConfig::default().max_aggregate_bytes
        );
    }

    #[test]
    fn test_content_source() {
        let yaml = r#"
            source:
              type: http
              base_url: https://api.example.org/api/
              headers:
                x-app-version: "1.2.0"
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(
            cfg.source.base_url().map(Url::as_str),
            Some("https://api.example.org/api/")
        );

        let yaml = r#"
            source:
              type: filesystem
              path: ./uploads
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(
            cfg.source,
            ContentSource::Filesystem {
                path: PathBuf::from("./uploads")
            }
        );
        assert_eq!(cfg.source.base_url(), None);
    }

    #[test]
    fn test_timeouts_and_logging() {
        let yaml = r#"
            head_timeout: 2s
            logging:
              level: debug
              format: json
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        let default_cfg = Config::default();
        assert_eq!(cfg.head_timeout, Duration::from_secs(2));
        assert_eq!(cfg.connect_timeout, default_cfg.connect_timeout);
        assert_eq!(cfg.max_download_timeout, default_cfg.max_download_timeout);
        assert_eq!(cfg.logging.level, LevelFilter::DEBUG);
        assert_eq!(cfg.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_invalid_level() {
        let yaml = r#"
            logging:
              level: loud
        "#;
        assert!(Config::from_reader(yaml.as_bytes()).is_err());
    }

    #[test]
    fn test_unknown_fields() {
        // Unknown fields should not cause failure
        let yaml = r#"
            ads:
              interstitial_every: 3
        "#;
        let cfg = Config::from_reader(yaml.as_bytes());
        assert!(cfg.is_ok());
    }

    #[test]
    fn test_empty_file() {
        // Empty files aren't supported
        let yaml = r#""#;
        let result = Config::from_reader(yaml.as_bytes());
        assert!(result.is_err());
    }

    #[test]
    fn test_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        std::fs::write(&path, "auth_token: abc\n").unwrap();

        let cfg = Config::get(Some(&path)).unwrap();
        assert_eq!(cfg.auth_token.as_deref(), Some("abc"));

        assert!(Config::get(Some(&dir.path().join("missing.yml"))).is_err());
    }
}

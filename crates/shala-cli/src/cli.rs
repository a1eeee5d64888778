//! Exposes the command line application.
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use reqwest::Url;
use shala_service::config::{Config, ContentSource};
use shala_service::{logging, metrics};
use tracing::level_filters::LevelFilter;

use crate::commands;

/// The environment variable holding the auth token for admin endpoints.
pub const AUTH_TOKEN_ENV: &str = "SHALA_AUTH_TOKEN";

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human readable tables.
    Table,
    /// Pretty printed JSON.
    Json,
}

/// Shala commands.
#[derive(Clone, Debug, Subcommand)]
pub enum Command {
    /// List all standards with their subjects.
    Standards,

    /// Show a chapter and its resources.
    Chapter {
        /// The chapter ID.
        id: String,
    },

    /// Fetch PDFs through the cache.
    Fetch {
        /// Resource paths (e.g. `/uploads/pdfs/light.pdf`) or absolute URLs.
        #[arg(required = true)]
        paths: Vec<String>,

        /// Write the fetched PDFs into this directory.
        #[arg(long, short, value_name = "DIR")]
        output: Option<PathBuf>,
    },

    /// Preload every PDF of a chapter and wait for all of them.
    Prefetch {
        /// The chapter ID.
        chapter_id: String,
    },

    /// Upload a PDF file. Requires an auth token.
    Upload {
        /// The PDF file to upload.
        file: PathBuf,
    },
}

/// Command line client for the Shala Shikshak content API.
///
/// The auth token for admin endpoints can be passed via `--auth-token`, the
/// `SHALA_AUTH_TOKEN` environment variable, or the configuration file.
#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about)]
pub struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// The base URL of the backend API, e.g. `https://example.org/api/`.
    ///
    /// Overrides the content source of the configuration file.
    #[arg(long, global = true)]
    pub base_url: Option<Url>,

    /// The bearer token for admin endpoints.
    #[arg(long, global = true)]
    pub auth_token: Option<String>,

    /// The severity level of logging output.
    ///
    /// Possible values:
    /// off, error, warn, info, debug, trace
    #[arg(long, global = true)]
    pub log_level: Option<LevelFilter>,

    /// The output format.
    #[arg(long, global = true, value_enum, default_value = "table")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

/// The configuration with command line overrides applied.
#[derive(Clone, Debug)]
pub struct Settings {
    pub config: Config,
    pub format: OutputFormat,
    pub command: Command,
}

impl Settings {
    pub fn from_cli(cli: Cli) -> Result<Self> {
        let mut config = Config::get(cli.config.as_deref()).context("failed loading config")?;

        if let Some(base_url) = cli.base_url {
            let headers = match config.source {
                ContentSource::Http { headers, .. } => headers,
                ContentSource::Filesystem { .. } => Default::default(),
            };
            config.source = ContentSource::Http { base_url, headers };
        }

        if let Some(token) = cli
            .auth_token
            .or_else(|| std::env::var(AUTH_TOKEN_ENV).ok())
        {
            config.auth_token = Some(token);
        }

        if let Some(level) = cli.log_level {
            config.logging.level = level;
        }

        Ok(Self {
            config,
            format: cli.format,
            command: cli.command,
        })
    }
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let settings = Settings::from_cli(Cli::parse())?;
    let config = &settings.config;

    let _sentry = sentry::init(sentry::ClientOptions {
        dsn: config.sentry_dsn.clone(),
        release: sentry::release_name!(),
        ..Default::default()
    });

    // SAFETY: The runtime is only started below, this is still single-threaded.
    unsafe { logging::init_logging(config) };

    if let Some(ref statsd) = config.metrics.statsd {
        metrics::configure_statsd(
            &config.metrics.prefix,
            statsd.as_str(),
            config.metrics.custom_tags.clone(),
        )?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("shala-worker")
        .enable_all()
        .build()
        .context("failed to start the runtime")?;

    runtime.block_on(commands::run(settings))
}

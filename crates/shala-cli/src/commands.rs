use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};

use anyhow::{Context, Result};
use bytes::Bytes;
use futures::future;
use shala_service::caching::{CacheError, PdfCache, ResourceHandle};
use shala_service::catalog::{self, CatalogClient};
use shala_service::config::Config;
use shala_service::download::fetcher_from_config;
use shala_service::utils::http::{DownloadTimeouts, create_client};

use crate::cli::{Command, Settings};
use crate::output::{self, FetchOutcome};

pub async fn run(settings: Settings) -> Result<()> {
    let Settings {
        config,
        format,
        command,
    } = settings;

    match command {
        Command::Standards => {
            let standards = catalog_client(&config)?
                .standards()
                .await
                .context("failed to list standards")?;
            output::print_standards(&standards, format)
        }
        Command::Chapter { id } => {
            let client = catalog_client(&config)?;
            let (chapter, resources) =
                futures::try_join!(client.chapter(&id), client.chapter_resources(&id))
                    .with_context(|| format!("failed to load chapter `{id}`"))?;
            output::print_chapter(&chapter, &resources, format)
        }
        Command::Fetch {
            paths,
            output: output_dir,
        } => {
            if let Some(dir) = &output_dir {
                tokio::fs::create_dir_all(dir)
                    .await
                    .with_context(|| format!("failed to create `{}`", dir.display()))?;
            }

            let cache = PdfCache::new(config.pdf_cache, fetcher_from_config(&config));
            let outcomes = future::join_all(
                paths
                    .iter()
                    .map(|path| fetch_one(&cache, path, output_dir.as_deref())),
            )
            .await;
            output::print_fetch_report(&outcomes, cache.stats(), format)
        }
        Command::Prefetch { chapter_id } => {
            let resources = catalog_client(&config)?
                .chapter_resources(&chapter_id)
                .await
                .with_context(|| format!("failed to load resources of `{chapter_id}`"))?;
            let paths = catalog::pdf_paths(&resources);
            tracing::info!(count = paths.len(), "prefetching chapter pdfs");

            let cache = PdfCache::new(config.pdf_cache, fetcher_from_config(&config));
            for path in &paths {
                cache.preload(path.as_str());
            }

            // every get joins the load started by `preload`
            let cache = &cache;
            let outcomes = future::join_all(paths.iter().map(|path| async move {
                let result = cache.get(path.as_str()).await;
                FetchOutcome::new(path.as_str(), &result, None)
            }))
            .await;
            output::print_fetch_report(&outcomes, cache.stats(), format)
        }
        Command::Upload { file } => {
            let file_name = file
                .file_name()
                .and_then(|name| name.to_str())
                .with_context(|| format!("invalid file name `{}`", file.display()))?
                .to_owned();
            let contents = tokio::fs::read(&file)
                .await
                .with_context(|| format!("failed to read `{}`", file.display()))?;

            let uploaded = catalog_client(&config)?
                .upload_pdf(&file_name, Bytes::from(contents))
                .await
                .context("failed to upload pdf")?;
            output::print_upload(&uploaded, format)
        }
    }
}

fn catalog_client(config: &Config) -> Result<CatalogClient> {
    let base_url = config
        .source
        .base_url()
        .context("the catalog is only available with an http content source")?;
    let client = create_client(&DownloadTimeouts::from_config(config));
    Ok(CatalogClient::new(
        client,
        base_url.clone(),
        config.auth_token.clone(),
    ))
}

async fn fetch_one(cache: &PdfCache, path: &str, output: Option<&Path>) -> FetchOutcome {
    let label = path.to_owned();
    let last_decile = AtomicU8::new(0);
    let result = cache
        .get_with_progress(path, move |percent| {
            let decile = percent / 10;
            if last_decile.fetch_max(decile, Ordering::Relaxed) < decile {
                eprintln!("{label}: {percent}%");
            }
        })
        .await;

    let saved_to = match (&result, output) {
        (Ok(handle), Some(dir)) => match save(handle, path, dir).await {
            Ok(target) => Some(target),
            Err(err) => {
                shala_service::logging::ensure_log_error(&err);
                None
            }
        },
        _ => None,
    };

    FetchOutcome::new(path, &result, saved_to)
}

async fn save(handle: &ResourceHandle, path: &str, dir: &Path) -> Result<PathBuf> {
    let bytes = handle.bytes().context("pdf was released before it was saved")?;
    let target = dir.join(output_file_name(path));
    tokio::fs::write(&target, &bytes)
        .await
        .with_context(|| format!("failed to write `{}`", target.display()))?;
    Ok(target)
}

/// Derives a local file name from the last segment of a resource path.
fn output_file_name(path: &str) -> String {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    match path.rsplit('/').find(|segment| !segment.is_empty()) {
        Some(name) => name.to_owned(),
        None => "download.pdf".to_owned(),
    }
}

impl FetchOutcome {
    fn new(
        path: &str,
        result: &Result<ResourceHandle, CacheError>,
        saved_to: Option<PathBuf>,
    ) -> Self {
        match result {
            Ok(handle) => Self {
                path: path.to_owned(),
                size: Some(handle.len()),
                saved_to,
                error: None,
            },
            Err(err) => Self {
                path: path.to_owned(),
                size: None,
                saved_to: None,
                error: Some(err.to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use shala_service::caching::PdfCacheConfig;
    use shala_service::config::ContentSource;

    use super::*;
    use crate::cli::OutputFormat;

    #[tokio::test]
    async fn test_fetch_to_output_dir() {
        let uploads = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(uploads.path().join("pdfs")).unwrap();
        std::fs::write(uploads.path().join("pdfs/light.pdf"), b"%PDF-1.7 light").unwrap();

        let config = Config {
            source: ContentSource::Filesystem {
                path: uploads.path().to_path_buf(),
            },
            ..Default::default()
        };
        let settings = Settings {
            config,
            format: OutputFormat::Json,
            command: Command::Fetch {
                paths: vec!["/pdfs/light.pdf".into(), "/pdfs/missing.pdf".into()],
                output: Some(out.path().to_path_buf()),
            },
        };

        run(settings).await.unwrap();

        let written = std::fs::read(out.path().join("light.pdf")).unwrap();
        assert_eq!(written, b"%PDF-1.7 light");
        assert!(!out.path().join("missing.pdf").exists());
    }

    #[tokio::test]
    async fn test_fetch_more_paths_than_cached_entries() {
        let uploads = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let names = ["a.pdf", "b.pdf", "c.pdf"];
        for name in names {
            std::fs::write(uploads.path().join(name), format!("%PDF-1.7 {name}")).unwrap();
        }

        let config = Config {
            source: ContentSource::Filesystem {
                path: uploads.path().to_path_buf(),
            },
            pdf_cache: PdfCacheConfig {
                max_entry_count: 1,
                ..Default::default()
            },
            ..Default::default()
        };
        let settings = Settings {
            config,
            format: OutputFormat::Json,
            command: Command::Fetch {
                paths: names.iter().map(|name| format!("/{name}")).collect(),
                output: Some(out.path().to_path_buf()),
            },
        };

        run(settings).await.unwrap();

        for name in names {
            let written = std::fs::read_to_string(out.path().join(name)).unwrap();
            assert_eq!(written, format!("%PDF-1.7 {name}"));
        }
    }

    #[tokio::test]
    async fn test_catalog_needs_http_source() {
        let settings = Settings {
            config: Config {
                source: ContentSource::Filesystem {
                    path: PathBuf::from("uploads"),
                },
                ..Default::default()
            },
            format: OutputFormat::Table,
            command: Command::Standards,
        };

        assert!(run(settings).await.is_err());
    }

    #[test]
    fn test_output_file_name() {
        assert_eq!(output_file_name("/uploads/pdfs/light.pdf"), "light.pdf");
        assert_eq!(
            output_file_name("https://cdn.example.org/pdfs/a.pdf?token=1"),
            "a.pdf"
        );
        assert_eq!(output_file_name("/uploads/pdfs/"), "pdfs");
        assert_eq!(output_file_name("/"), "download.pdf");
    }
}

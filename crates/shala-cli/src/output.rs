use std::path::PathBuf;

use anyhow::Result;
use prettytable::format::consts::FORMAT_CLEAN;
use prettytable::{Row, Table, cell, row};
use serde::Serialize;
use shala_service::caching::CacheStats;
use shala_service::catalog::{Chapter, GroupedResources, Standard, UploadedFile};

use crate::cli::OutputFormat;

/// The result of fetching a single PDF.
#[derive(Debug, Clone, Serialize)]
pub struct FetchOutcome {
    pub path: String,
    pub size: Option<u64>,
    pub saved_to: Option<PathBuf>,
    pub error: Option<String>,
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_standards(standards: &[Standard], format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(standards);
    }

    let mut table = Table::new();
    table.set_format(*FORMAT_CLEAN);
    table.set_titles(row![b => "ID", "Standard", "Subjects"]);

    for standard in standards {
        let subjects: Vec<_> = standard.subjects.iter().map(|s| s.name.as_str()).collect();
        table.add_row(row![standard.id, standard.name, subjects.join(", ")]);
    }

    table.printstd();
    Ok(())
}

pub fn print_chapter(
    chapter: &Chapter,
    resources: &GroupedResources,
    format: OutputFormat,
) -> Result<()> {
    if format == OutputFormat::Json {
        #[derive(Serialize)]
        struct ChapterWithResources<'a> {
            chapter: &'a Chapter,
            resources: &'a GroupedResources,
        }
        return print_json(&ChapterWithResources { chapter, resources });
    }

    println!("{}", chapter.name);
    if let Some(description) = &chapter.description {
        println!("{description}");
    }
    println!();

    let mut table = Table::new();
    table.set_format(*FORMAT_CLEAN);
    table.set_titles(row![b => "Group", "Title", "Content", "Path"]);

    for (group, items) in resources {
        for resource in items {
            let content = format!("{:?}", resource.content_type).to_lowercase();
            table.add_row(row![group, resource.title, content, resource.url]);
        }
    }

    table.printstd();
    Ok(())
}

pub fn print_fetch_report(
    outcomes: &[FetchOutcome],
    stats: CacheStats,
    format: OutputFormat,
) -> Result<()> {
    if format == OutputFormat::Json {
        #[derive(Serialize)]
        struct Report<'a> {
            results: &'a [FetchOutcome],
            cache: CacheStats,
        }
        return print_json(&Report {
            results: outcomes,
            cache: stats,
        });
    }

    let mut table = Table::new();
    table.set_format(*FORMAT_CLEAN);
    table.set_titles(row![b => "Path", "Size", "Result"]);

    for outcome in outcomes {
        let mut row = Row::empty();
        row.add_cell(cell!(outcome.path));
        match outcome.size {
            Some(size) => row.add_cell(cell!(r->format_size(size))),
            None => row.add_cell(cell!("")),
        }
        match (&outcome.error, &outcome.saved_to) {
            (Some(error), _) => row.add_cell(cell!(Fr->error)),
            (None, Some(target)) => row.add_cell(cell!(target.display())),
            (None, None) => row.add_cell(cell!("ok")),
        }
        table.add_row(row);
    }

    table.printstd();
    println!();

    let mut summary = Table::new();
    summary.set_format(*FORMAT_CLEAN);
    summary.add_row(row![r->"Cached entries:", stats.entry_count]);
    summary.add_row(row![r->"Cached bytes:", format_size(stats.aggregate_size_bytes)]);
    summary.printstd();
    Ok(())
}

pub fn print_upload(uploaded: &UploadedFile, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(uploaded);
    }

    let mut table = Table::new();
    table.set_format(*FORMAT_CLEAN);
    table.add_row(row![r->"File:", uploaded.filename]);
    table.add_row(row![r->"Path:", uploaded.url]);
    if let Some(size) = uploaded.size {
        table.add_row(row![r->"Size:", format_size(size)]);
    }
    table.printstd();
    Ok(())
}

/// Formats a byte count with a binary unit suffix.
fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(400_000), "390.6 KiB");
        assert_eq!(format_size(50 * 1024 * 1024), "50.0 MiB");
    }
}

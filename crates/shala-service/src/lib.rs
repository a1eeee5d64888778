//! Client-side content services for the Shala Shikshak learning platform.
//!
//! The centerpiece is the [`PdfCache`](caching::PdfCache), which fetches textbook and solution
//! PDFs by their logical path, deduplicates concurrent loads and keeps recently used payloads in
//! memory within configurable limits. The [`catalog`] module provides a typed client for the
//! endpoints that list standards, subjects, chapters and their resources.

#[macro_use]
pub mod metrics;

pub mod caching;
pub mod catalog;
pub mod config;
pub mod download;
pub mod logging;
pub mod types;
pub mod utils;

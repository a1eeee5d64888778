use std::time::Duration;

use serde::Deserialize;

/// Limits of the in-memory PDF cache.
#[derive(Debug, Clone, Copy, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct PdfCacheConfig {
    /// Entries not accessed for longer than this are swept on the next lookup.
    #[serde(with = "humantime_serde")]
    pub expiry_window: Duration,

    /// Ceiling for the summed size of all cached payloads.
    pub max_aggregate_bytes: u64,

    /// Ceiling for the number of cached payloads.
    pub max_entry_count: usize,

    /// Reject payloads that do not start with the `%PDF-` magic.
    pub verify_pdf_header: bool,
}

impl Default for PdfCacheConfig {
    fn default() -> Self {
        Self {
            expiry_window: Duration::from_secs(30 * 60),
            max_aggregate_bytes: 50 * 1024 * 1024,
            max_entry_count: 10,
            verify_pdf_header: true,
        }
    }
}

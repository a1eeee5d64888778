//! Command line client for the Shala Shikshak content API.
//!
//! Browses the catalog of standards, subjects and chapters, fetches PDFs through the in-memory
//! cache of `shala-service` and uploads new PDFs.

mod cli;
mod commands;
mod output;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            shala_service::logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}

//! Storage module for persisting crawled bodies
//!
//! Responses are mirrored to a directory tree laid out by host and URL
//! path, so the mirror can be served as a static copy of the site.

mod mirror;

pub use mirror::{mirror_path, MirrorWriter};

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while persisting a body
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Cannot map URL to a mirror path: {0}")]
    Unmappable(String),

    #[error("Failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

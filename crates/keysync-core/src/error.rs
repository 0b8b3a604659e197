use std::io;
use std::sync::Arc;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigValidationError),
    #[error("kv backend error: {0}")]
    Kv(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
    #[error("background task failed: {0}")]
    Task(String),
    #[error("midi parse error: {0}")]
    Midi(String),
    #[error("failed to scan folder {name}: {source}")]
    Directory {
        name: String,
        #[source]
        source: Box<LibraryError>,
    },
    #[error("error scanning folders: {0}")]
    ScanFailed(Arc<LibraryError>),
}

pub type Result<T, E = LibraryError> = std::result::Result<T, E>;

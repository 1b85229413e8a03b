//! Error types for the diagram cache

use std::path::PathBuf;
use thiserror::Error;

/// The renderer could not produce a diagram
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct GenerationError(String);

impl GenerationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("IO error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed cache index {}: {source}", .path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode cache index: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Diagram generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("Cache write-back worker has shut down")]
    WriteBackClosed,

    #[error("Cache write-back queue is full")]
    WriteBackFull,
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.into(),
            source,
        }
    }

    /// True when the error is a missing file, e.g. the index on first run
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CacheError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound
        )
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;

//! Error types for the diagram server

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Cache error: {0}")]
    Cache(#[from] diagram_cache::CacheError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<tracing_subscriber::filter::ParseError> for ServerError {
    fn from(err: tracing_subscriber::filter::ParseError) -> Self {
        ServerError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use diagram_cache::{CacheError, GenerationError};

    #[test]
    fn test_cache_error_display() {
        let err = ServerError::from(CacheError::from(GenerationError::new("boom")));
        assert_eq!(
            format!("{}", err),
            "Cache error: Diagram generation failed: boom"
        );
    }

    #[test]
    fn test_config_error_display() {
        let err = ServerError::Config("CACHE_SIZE must be positive".to_string());
        assert_eq!(
            format!("{}", err),
            "Configuration error: CACHE_SIZE must be positive"
        );
    }

    #[test]
    fn test_error_is_debug() {
        let err = ServerError::Config("test".to_string());
        let debug_str = format!("{:?}", err);
        assert!(debug_str.contains("Config"));
    }
}

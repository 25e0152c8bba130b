//! Centralized error handling for the node.
//!
//! Most plumbing uses `anyhow` with context strings. This enum exists for the
//! error cases that other layers need to match on: configuration problems are
//! fatal at startup, while data-file problems are recorded in the registry
//! and never surface as HTTP failures.

use std::fmt;

/// Main error type for node operations.
#[derive(Debug)]
pub enum NodeError {
    /// I/O errors (file operations, network, etc.)
    Io(std::io::Error),

    /// Columnar file reading errors (Polars, parsing, etc.)
    DataFile(String),

    /// Configuration errors (fatal at startup)
    Config(String),

    /// OIDC / passport verification setup errors
    Auth(String),

    /// File or object path not matching the data-directory grammar
    InvalidPath(String),

    /// Generic error with context
    Other(String),
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::DataFile(msg) => write!(f, "Data file error: {msg}"),
            Self::Config(msg) => write!(f, "Configuration error: {msg}"),
            Self::Auth(msg) => write!(f, "Authentication error: {msg}"),
            Self::InvalidPath(msg) => write!(f, "Invalid path: {msg}"),
            Self::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for NodeError {}

impl From<std::io::Error> for NodeError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<anyhow::Error> for NodeError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

impl From<serde_yaml::Error> for NodeError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Config(format!("YAML error: {err}"))
    }
}

impl From<serde_json::Error> for NodeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(format!("JSON error: {err}"))
    }
}

impl From<polars::error::PolarsError> for NodeError {
    fn from(err: polars::error::PolarsError) -> Self {
        Self::DataFile(err.to_string())
    }
}

/// Result type alias for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = NodeError::DataFile("column not found".to_owned());
        assert_eq!(err.to_string(), "Data file error: column not found");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "metadata.yaml");
        let err: NodeError = io.into();
        assert!(err.to_string().contains("metadata.yaml"));
    }
}

//! Error types for bitframe

use thiserror::Error;

/// Result type alias for bitframe operations
pub type Result<T> = std::result::Result<T, Error>;

/// bitframe error types
#[derive(Error, Debug)]
pub enum Error {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Data corruption detected
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// Checksum mismatch
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Invalid data format
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Database already exists
    #[error("database already exists: {0}")]
    DatabaseExists(String),

    /// Frame already exists
    #[error("frame already exists: {0}")]
    FrameExists(String),

    /// Database not found
    #[error("database not found: {0}")]
    DatabaseNotFound(String),

    /// Frame not found
    #[error("frame not found: {0}")]
    FrameNotFound(String),

    /// Database or frame name rejected
    #[error("invalid name: {0:?}")]
    InvalidName(String),

    /// Malformed query text
    #[error("parse error at line {line}, column {column}: {message}")]
    Parse {
        line: usize,
        column: usize,
        message: String,
    },

    /// Well-formed query that cannot be executed as written
    #[error("Query error: {0}")]
    Query(String),

    /// Column does not belong to the fragment's slice
    #[error("column {column} is outside slice {slice}")]
    ColumnOutOfSlice { column: u64, slice: u64 },

    /// Request to another node failed
    #[error("remote node {host}: {message}")]
    Remote { host: String, message: String },

    /// Restore could not complete
    #[error("Restore error: {0}")]
    Restore(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Shorthand for a remote failure
    pub fn remote(host: impl Into<String>, message: impl ToString) -> Self {
        Error::Remote {
            host: host.into(),
            message: message.to_string(),
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Remote { .. })
    }

    /// Check if error indicates corruption
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corruption(_) | Error::ChecksumMismatch { .. })
    }

    /// Unknown database or frame
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::DatabaseNotFound(_) | Error::FrameNotFound(_))
    }

    /// Duplicate database or frame creation
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::DatabaseExists(_) | Error::FrameExists(_))
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::InvalidFormat(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::InvalidFormat(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert!(Error::DatabaseExists("d".into()).is_already_exists());
        assert!(Error::FrameNotFound("f".into()).is_not_found());
        assert!(!Error::Query("x".into()).is_not_found());
        assert!(Error::ChecksumMismatch { expected: 1, actual: 2 }.is_corruption());
        assert!(Error::remote("h:1", "refused").is_retryable());
    }

    #[test]
    fn test_parse_error_message() {
        let err = Error::Parse {
            line: 2,
            column: 7,
            message: "expected ')'".into(),
        };
        assert_eq!(err.to_string(), "parse error at line 2, column 7: expected ')'");
    }
}

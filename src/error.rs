use thiserror::Error;

/// Main error type for Instaco
#[derive(Error, Debug)]
pub enum InstacoError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Parse errors
    #[error("Parse error: {0}")]
    Parse(String),

    /// A fragment of an export file failed validation.
    /// `index` is the number of fragments accepted before the failing one.
    #[error("Invalid fragment after {index} accepted records: {reason}")]
    InvalidFragment { index: usize, reason: String },

    /// The export stream ended inside an unterminated fragment
    #[error("Truncated input: {0}")]
    TruncatedInput(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A blocking database task could not be joined
    #[error("Task error: {0}")]
    Task(String),
}

/// Convenient Result type using InstacoError
pub type Result<T> = std::result::Result<T, InstacoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = InstacoError::Config("Test error".to_string());
        assert!(err.to_string().contains("Configuration error"));
        assert!(err.to_string().contains("Test error"));
    }

    #[test]
    fn test_invalid_fragment_reports_count() {
        let err = InstacoError::InvalidFragment {
            index: 42,
            reason: "missing field `value`".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("42"));
        assert!(msg.contains("missing field"));
    }

    #[test]
    fn test_error_from_rusqlite() {
        let rusqlite_err = rusqlite::Error::InvalidQuery;
        let err: InstacoError = rusqlite_err.into();
        assert!(matches!(err, InstacoError::Database(_)));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: InstacoError = io_err.into();
        assert!(matches!(err, InstacoError::Io(_)));
    }
}

use thiserror::Error;

/// Main error type for Termgraph
#[derive(Error, Debug)]
pub enum TermGraphError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A confirmed edge with the same (source, target, type) already exists
    #[error("Duplicate relation: {0}")]
    Duplicate(String),

    /// Unknown relation type, or a type/direction mismatch
    #[error("Invalid relation type: {0}")]
    InvalidType(String),

    /// Relation not found
    #[error("Relation not found: {0}")]
    NotFound(String),

    /// Referenced term does not exist
    #[error("Term not found: {0}")]
    TermNotFound(String),

    /// HITL decision on a relation that is no longer provisional
    #[error("Relation already resolved: {0}")]
    AlreadyResolved(String),

    /// Inference run cancelled at a hop boundary; nothing was persisted
    #[error("Inference cancelled")]
    Cancelled,

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Convenient Result type using TermGraphError
pub type Result<T> = std::result::Result<T, TermGraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TermGraphError::Config("Test error".to_string());
        assert!(err.to_string().contains("Configuration error"));
        assert!(err.to_string().contains("Test error"));
    }

    #[test]
    fn test_error_from_rusqlite() {
        let rusqlite_err = rusqlite::Error::InvalidQuery;
        let tg_err: TermGraphError = rusqlite_err.into();
        assert!(matches!(tg_err, TermGraphError::Database(_)));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let tg_err: TermGraphError = io_err.into();
        assert!(matches!(tg_err, TermGraphError::Io(_)));
    }

    #[test]
    fn test_not_found_carries_id() {
        let err = TermGraphError::NotFound("rel-123".to_string());
        assert!(err.to_string().contains("rel-123"));
    }
}

use thiserror::Error;

/// Top-level error type for the Curator system.
///
/// Boundary collaborators (repository store, version store, search index)
/// report failures with this type. The ingest crate maps the variants that
/// carry pipeline meaning (`NotFound`, `Persistence`) onto its own taxonomy.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CuratorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Failed to persist {0}")]
    Persistence(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for CuratorError {
    fn from(err: toml::de::Error) -> Self {
        CuratorError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for CuratorError {
    fn from(err: toml::ser::Error) -> Self {
        CuratorError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for CuratorError {
    fn from(err: serde_json::Error) -> Self {
        CuratorError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Curator operations.
pub type Result<T> = std::result::Result<T, CuratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let cases: Vec<(CuratorError, &str)> = vec![
            (
                CuratorError::Config("bad key".to_string()),
                "Configuration error: bad key",
            ),
            (
                CuratorError::Storage("disk full".to_string()),
                "Storage error: disk full",
            ),
            (
                CuratorError::NotFound("version v9".to_string()),
                "Not found: version v9",
            ),
            (
                CuratorError::Persistence("file set fs1".to_string()),
                "Failed to persist file set fs1",
            ),
            (
                CuratorError::Index("solr down".to_string()),
                "Index error: solr down",
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.to_string(), expected);
        }
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: CuratorError = io_err.into();
        assert!(matches!(err, CuratorError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_error_from_toml_de() {
        let err: std::result::Result<toml::Value, _> = toml::from_str("invalid = [[[");
        let err: CuratorError = err.unwrap_err().into();
        assert!(matches!(err, CuratorError::Config(_)));
    }

    #[test]
    fn test_error_from_serde_json() {
        let err: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ nope }");
        let err: CuratorError = err.unwrap_err().into();
        assert!(matches!(err, CuratorError::Serialization(_)));
    }
}

//! Error types for the Traction Rec import library.
//!
//! Handled conditions of the import pipeline (disabled feature, lock
//! contention, unhealthy migrations) are reported through outcome enums, not
//! through this type. `ImportError` covers the failures that escape them.

use crate::config::NetworkConfig;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the import library.
#[derive(Debug, Error)]
pub enum ImportError {
    // Network errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        /// Optional cause description
        cause: Option<String>,
    },

    #[error("Request timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Traction Rec API error ({status_code}): {message}")]
    RemoteApi { message: String, status_code: u16 },

    // Database errors
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Path is not a directory: {0}")]
    NotADirectory(PathBuf),

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Migration engine errors
    #[error("Migration command `{command}` failed: {message}")]
    MigrationFailed { command: String, message: String },

    #[error("Unknown migration status `{status}` for {task}")]
    UnknownMigrationStatus { task: String, status: String },

    // Queue errors
    #[error("Invalid queue item {item_id}: {message}")]
    InvalidQueueItem { item_id: i64, message: String },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Missing required setting: {0}")]
    MissingSetting(&'static str),

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for import operations.
pub type Result<T> = std::result::Result<T, ImportError>;

impl From<std::io::Error> for ImportError {
    fn from(err: std::io::Error) -> Self {
        ImportError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for ImportError {
    fn from(err: serde_json::Error) -> Self {
        ImportError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for ImportError {
    fn from(err: rusqlite::Error) -> Self {
        ImportError::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for ImportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ImportError::Timeout(NetworkConfig::REQUEST_TIMEOUT)
        } else {
            ImportError::Network {
                message: err.to_string(),
                cause: err.url().map(|u| u.to_string()),
            }
        }
    }
}

impl ImportError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        ImportError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ImportError::MigrationFailed {
            command: "drush migrate:import".into(),
            message: "exit status 1".into(),
        };
        assert_eq!(
            err.to_string(),
            "Migration command `drush migrate:import` failed: exit status 1"
        );
    }

    #[test]
    fn test_io_with_path_keeps_path() {
        let err = ImportError::io_with_path(
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
            "/tmp/backup",
        );
        match err {
            ImportError::Io { path, .. } => assert_eq!(path, Some(PathBuf::from("/tmp/backup"))),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_request_timeout_reports_configured_limit() {
        // Accepts connections into the backlog but never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let err = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(50))
            .build()
            .unwrap()
            .get(format!("http://{}/", addr))
            .send()
            .await
            .unwrap_err();
        assert!(err.is_timeout());

        match ImportError::from(err) {
            ImportError::Timeout(limit) => assert_eq!(limit, NetworkConfig::REQUEST_TIMEOUT),
            other => panic!("unexpected error: {other:?}"),
        }
        drop(listener);
    }
}

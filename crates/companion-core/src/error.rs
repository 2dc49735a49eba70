//! Error types for the companion core.
//!
//! Background contexts never surface these as fatal; the supervisor turns
//! them into log lines or operator alerts.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the companion core.
#[derive(Debug, Error)]
pub enum CompanionError {
    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Managed executable not found: {0}")]
    ExecutableNotFound(PathBuf),

    #[error("Data directory not found: {0}")]
    DataDirNotFound(PathBuf),

    // Archive errors
    #[error("Archive error: {message}")]
    Archive {
        message: String,
        #[source]
        source: Option<zip::result::ZipError>,
    },

    // Process errors
    #[error("Failed to spawn {program}: {message}")]
    Spawn { program: String, message: String },

    #[error("Admin command `{args}` exited with {status}")]
    AdminCommandFailed {
        args: String,
        status: String,
        /// Captured (ANSI-stripped) output of the failed command.
        output: String,
    },

    #[error("Another lifecycle operation is in progress (state: {state})")]
    Busy { state: String },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for companion operations.
pub type Result<T> = std::result::Result<T, CompanionError>;

impl From<std::io::Error> for CompanionError {
    fn from(err: std::io::Error) -> Self {
        CompanionError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for CompanionError {
    fn from(err: serde_json::Error) -> Self {
        CompanionError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<zip::result::ZipError> for CompanionError {
    fn from(err: zip::result::ZipError) -> Self {
        // Extraction IO failures keep their kind so permission problems stay
        // distinguishable from corrupt archives.
        match err {
            zip::result::ZipError::Io(io) => CompanionError::from(io),
            other => CompanionError::Archive {
                message: other.to_string(),
                source: Some(other),
            },
        }
    }
}

impl CompanionError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        CompanionError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Whether this error was caused by the OS refusing file access.
    ///
    /// On Windows a file held open by a running process reports as
    /// permission denied, which is what restore cares about.
    pub fn is_permission_denied(&self) -> bool {
        match self {
            CompanionError::Io {
                source: Some(source),
                ..
            } => source.kind() == std::io::ErrorKind::PermissionDenied,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CompanionError::DataDirNotFound(PathBuf::from("/srv/alist/data"));
        assert_eq!(err.to_string(), "Data directory not found: /srv/alist/data");

        let err = CompanionError::Busy {
            state: "stopping".into(),
        };
        assert_eq!(
            err.to_string(),
            "Another lifecycle operation is in progress (state: stopping)"
        );
    }

    #[test]
    fn test_permission_denied_detection() {
        let denied = CompanionError::io_with_path(
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "locked"),
            "/srv/alist/data/data.db",
        );
        assert!(denied.is_permission_denied());

        let missing: CompanionError =
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(!missing.is_permission_denied());
        assert!(!CompanionError::Other("boom".into()).is_permission_denied());
    }

    #[test]
    fn test_zip_io_error_keeps_kind() {
        let err: CompanionError = zip::result::ZipError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "in use",
        ))
        .into();
        assert!(err.is_permission_denied());

        let err: CompanionError = zip::result::ZipError::InvalidArchive("bad header".into()).into();
        assert!(matches!(err, CompanionError::Archive { .. }));
    }
}

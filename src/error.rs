use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type CleanerResult<T> = Result<T, CleanerError>;

#[derive(Debug, Error)]
pub enum CleanerError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("permission denied: {}", path.display())]
    PermissionDenied { path: PathBuf },
    #[error("{0} already in progress")]
    AlreadyInProgress(&'static str),
    #[error("validation failed: {0}")]
    ValidationFailed(String),
    #[error("deletion blocked: {0}")]
    SafetyBlocked(String),
    #[error("integrity failure: {0}")]
    IntegrityFailure(String),
    #[error("{0} cancelled by user")]
    Cancelled(&'static str),
    #[error("i/o failure on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("manifest error: {0}")]
    Manifest(#[from] serde_json::Error),
    #[error("background task failed: {0}")]
    Task(String),
}

/// Flat error category handed to adapters that cannot match on the enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    PermissionDenied,
    AlreadyInProgress,
    ValidationFailed,
    SafetyBlocked,
    IntegrityFailure,
    Cancelled,
    IoFailure,
}

impl CleanerError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        CleanerError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Wrap an I/O error, lifting permission and missing-path failures into
    /// their own categories.
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        let path = path.as_ref().to_path_buf();
        match source.kind() {
            io::ErrorKind::PermissionDenied => CleanerError::PermissionDenied { path },
            io::ErrorKind::NotFound => CleanerError::NotFound {
                kind: "path",
                id: path.display().to_string(),
            },
            _ => CleanerError::Io { path, source },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CleanerError::NotFound { .. } => ErrorKind::NotFound,
            CleanerError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            CleanerError::AlreadyInProgress(_) => ErrorKind::AlreadyInProgress,
            CleanerError::ValidationFailed(_) => ErrorKind::ValidationFailed,
            CleanerError::SafetyBlocked(_) => ErrorKind::SafetyBlocked,
            CleanerError::IntegrityFailure(_) => ErrorKind::IntegrityFailure,
            CleanerError::Cancelled(_) => ErrorKind::Cancelled,
            CleanerError::Io { .. } | CleanerError::Manifest(_) | CleanerError::Task(_) => {
                ErrorKind::IoFailure
            }
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CleanerError::NotFound { .. })
    }

    pub fn is_already_in_progress(&self) -> bool {
        matches!(self, CleanerError::AlreadyInProgress(_))
    }
}

impl From<tokio::task::JoinError> for CleanerError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            CleanerError::Cancelled("background task")
        } else {
            CleanerError::Task(err.to_string())
        }
    }
}

/// A per-file failure recorded inside a batch result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFailure {
    pub path: PathBuf,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
}

impl FileFailure {
    pub fn new(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        FileFailure {
            path: path.into(),
            reason: reason.into(),
            kind: None,
        }
    }

    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = Some(kind);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_map_to_categories() {
        let denied = CleanerError::io("/x", io::Error::from(io::ErrorKind::PermissionDenied));
        assert_eq!(denied.kind(), ErrorKind::PermissionDenied);

        let missing = CleanerError::io("/x", io::Error::from(io::ErrorKind::NotFound));
        assert!(missing.is_not_found());

        let other = CleanerError::io("/x", io::Error::new(io::ErrorKind::Other, "boom"));
        assert_eq!(other.kind(), ErrorKind::IoFailure);
        assert!(other.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn aborted_task_maps_to_cancelled() {
        let task = tokio::spawn(std::future::pending::<()>());
        task.abort();
        let err = CleanerError::from(task.await.unwrap_err());
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn file_failure_kind_is_optional_on_the_wire() {
        let plain: FileFailure = serde_json::from_str(r#"{"path": "/a", "reason": "gone"}"#).unwrap();
        assert_eq!(plain.kind, None);

        let kinded = FileFailure::new("/a", "gone").with_kind(ErrorKind::NotFound);
        let json = serde_json::to_value(&kinded).unwrap();
        assert_eq!(json["kind"], "not_found");
    }
}

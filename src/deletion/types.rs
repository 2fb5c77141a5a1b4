use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, FileFailure};
use crate::ops::OperationId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionRequest {
    pub files: Vec<PathBuf>,
    pub operation: String,
    /// Skip classification and act on every file that is not blocked.
    #[serde(default)]
    pub force_delete: bool,
    /// Back up but leave the originals in place.
    #[serde(default)]
    pub dry_run: bool,
}

impl DeletionRequest {
    pub fn new(files: Vec<PathBuf>, operation: impl Into<String>) -> Self {
        DeletionRequest {
            files,
            operation: operation.into(),
            force_delete: false,
            dry_run: false,
        }
    }

    pub fn forced(mut self, force_delete: bool) -> Self {
        self.force_delete = force_delete;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionStatus {
    Validating,
    BackingUp,
    BackupComplete,
    Deleting,
    Completed,
    Cancelled,
    Failed,
    Blocked,
}

impl DeletionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DeletionStatus::Completed
                | DeletionStatus::Cancelled
                | DeletionStatus::Failed
                | DeletionStatus::Blocked
        )
    }

    pub fn stage(self) -> &'static str {
        match self {
            DeletionStatus::Validating => "validating",
            DeletionStatus::BackingUp => "backing_up",
            DeletionStatus::BackupComplete => "backup_complete",
            DeletionStatus::Deleting => "deleting",
            DeletionStatus::Completed => "completed",
            DeletionStatus::Cancelled => "cancelled",
            DeletionStatus::Failed => "failed",
            DeletionStatus::Blocked => "blocked",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    NotFound,
    InsufficientPermissions,
    SystemCritical,
}

impl BlockReason {
    pub fn kind(self) -> ErrorKind {
        match self {
            BlockReason::NotFound => ErrorKind::NotFound,
            BlockReason::InsufficientPermissions => ErrorKind::PermissionDenied,
            BlockReason::SystemCritical => ErrorKind::SafetyBlocked,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedFile {
    pub path: PathBuf,
    pub reason: BlockReason,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyCheckResult {
    pub is_safe: bool,
    pub safe_files: Vec<PathBuf>,
    pub risky_files: Vec<PathBuf>,
    pub blocked_files: Vec<BlockedFile>,
    pub warnings: Vec<String>,
    pub total_size: u64,
}

impl SafetyCheckResult {
    pub fn is_blocked(&self, path: &std::path::Path) -> bool {
        self.blocked_files.iter().any(|blocked| blocked.path == path)
    }

    /// Files a deletion acts on: safe ones, plus risky ones when forced.
    pub fn selection(&self, force_delete: bool) -> Vec<PathBuf> {
        let mut files = self.safe_files.clone();
        if force_delete {
            files.extend(self.risky_files.iter().cloned());
        }
        files
    }

    pub fn is_high_risk(&self) -> bool {
        !self.risky_files.is_empty() || !self.blocked_files.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionResult {
    pub operation_id: OperationId,
    pub operation: String,
    pub status: DeletionStatus,
    pub total_files: usize,
    pub backed_up_count: usize,
    pub deleted_count: usize,
    pub failed_count: usize,
    pub skipped_count: usize,
    pub total_size: u64,
    pub backed_up_size: u64,
    pub deleted_size: u64,
    pub backup_session_id: Option<String>,
    pub deleted_files: Vec<PathBuf>,
    pub failed_files: Vec<FileFailure>,
    pub skipped_files: Vec<FileFailure>,
    pub warnings: Vec<String>,
    pub dry_run: bool,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl DeletionResult {
    pub(crate) fn start(operation_id: &str, request: &DeletionRequest) -> Self {
        DeletionResult {
            operation_id: operation_id.to_string(),
            operation: request.operation.clone(),
            status: DeletionStatus::Validating,
            total_files: request.files.len(),
            backed_up_count: 0,
            deleted_count: 0,
            failed_count: 0,
            skipped_count: 0,
            total_size: 0,
            backed_up_size: 0,
            deleted_size: 0,
            backup_session_id: None,
            deleted_files: Vec::new(),
            failed_files: Vec::new(),
            skipped_files: Vec::new(),
            warnings: Vec::new(),
            dry_run: request.dry_run,
            start_time: Utc::now(),
            end_time: None,
            error: None,
        }
    }

    pub(crate) fn skip(&mut self, path: impl Into<PathBuf>, kind: ErrorKind, reason: impl Into<String>) {
        self.skipped_count += 1;
        self.skipped_files.push(FileFailure::new(path, reason).with_kind(kind));
    }

    pub(crate) fn fail_file(&mut self, path: impl Into<PathBuf>, kind: ErrorKind, reason: impl Into<String>) {
        self.failed_count += 1;
        self.failed_files.push(FileFailure::new(path, reason).with_kind(kind));
    }

    pub(crate) fn finish(mut self, status: DeletionStatus, error: Option<String>) -> Self {
        self.status = status;
        self.error = error;
        self.end_time = Some(Utc::now());
        self
    }

    pub fn summary(&self) -> DeletionSummary {
        DeletionSummary::from(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletionSummary {
    pub operation: String,
    pub status: DeletionStatus,
    pub total_files: usize,
    pub deleted_count: usize,
    pub failed_count: usize,
    pub skipped_count: usize,
    pub deleted_size: u64,
    pub success_rate: f64,
    pub duration_ms: Option<i64>,
    pub backup_session_id: Option<String>,
    pub dry_run: bool,
}

impl From<&DeletionResult> for DeletionSummary {
    fn from(result: &DeletionResult) -> Self {
        let success_rate = if result.total_files == 0 {
            0.0
        } else {
            result.deleted_count as f64 / result.total_files as f64 * 100.0
        };
        DeletionSummary {
            operation: result.operation.clone(),
            status: result.status,
            total_files: result.total_files,
            deleted_count: result.deleted_count,
            failed_count: result.failed_count,
            skipped_count: result.skipped_count,
            deleted_size: result.deleted_size,
            success_rate,
            duration_ms: result
                .end_time
                .map(|end| (end - result.start_time).num_milliseconds()),
            backup_session_id: result.backup_session_id.clone(),
            dry_run: result.dry_run,
        }
    }
}

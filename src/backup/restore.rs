use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::manager::BackupManager;
use super::manifest::{BackupEntry, BackupSession};
use super::storage;
use crate::error::{CleanerError, CleanerResult, ErrorKind, FileFailure};
use crate::logging::OperationLogger;
use crate::ops::{estimate_remaining, percent, CancelSlot, InFlight, ProgressCallback, ProgressQueue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreStatus {
    InProgress,
    Completed,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreRequest {
    pub session_id: String,
    /// Original paths to restore; `None` restores the whole session.
    pub paths: Option<Vec<PathBuf>>,
    pub overwrite: bool,
}

impl RestoreRequest {
    pub fn session(session_id: impl Into<String>, overwrite: bool) -> Self {
        RestoreRequest {
            session_id: session_id.into(),
            paths: None,
            overwrite,
        }
    }

    pub fn files(session_id: impl Into<String>, paths: Vec<PathBuf>, overwrite: bool) -> Self {
        RestoreRequest {
            session_id: session_id.into(),
            paths: Some(paths),
            overwrite,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreResult {
    pub session_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub total_files: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub total_size: u64,
    pub restored_size: u64,
    pub status: RestoreStatus,
    pub error: Option<String>,
    pub restored_files: Vec<PathBuf>,
    pub failed_files: Vec<FileFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreProgress {
    pub session_id: String,
    pub current_file: String,
    pub files_processed: u64,
    pub total_files: u64,
    pub progress: f32,
    pub restored_size: u64,
    pub total_size: u64,
    pub elapsed_ms: u64,
    pub estimated_remaining_ms: Option<u64>,
}

/// What a restore would do, computed without copying anything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestorePreview {
    pub session_id: String,
    pub total_files: usize,
    pub restorable: Vec<PathBuf>,
    pub conflicts: Vec<PathBuf>,
    pub ineligible: Vec<FileFailure>,
    pub total_size: u64,
    pub restorable_size: u64,
}

pub struct RestoreManager {
    backups: Arc<BackupManager>,
    logger: Arc<dyn OperationLogger>,
    restoring: InFlight,
    stop: CancelSlot,
    progress: ProgressQueue<RestoreProgress>,
}

impl RestoreManager {
    pub fn new(backups: Arc<BackupManager>, logger: Arc<dyn OperationLogger>) -> Self {
        RestoreManager {
            backups,
            logger,
            restoring: InFlight::new("restore"),
            stop: CancelSlot::default(),
            progress: ProgressQueue::default(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RestoreProgress> {
        self.progress.subscribe()
    }

    pub fn is_restoring(&self) -> bool {
        self.restoring.is_active()
    }

    pub fn stop_restore(&self) -> bool {
        self.stop.cancel()
    }

    pub async fn restore_session(&self, session_id: &str, overwrite: bool) -> CleanerResult<RestoreResult> {
        self.restore(&RestoreRequest::session(session_id, overwrite), None, None)
            .await
    }

    pub async fn restore_files(
        &self,
        session_id: &str,
        paths: &[PathBuf],
        overwrite: bool,
    ) -> CleanerResult<RestoreResult> {
        self.restore(&RestoreRequest::files(session_id, paths.to_vec(), overwrite), None, None)
            .await
    }

    pub async fn restore(
        &self,
        request: &RestoreRequest,
        cancel: Option<&CancellationToken>,
        on_progress: Option<ProgressCallback<'_, RestoreProgress>>,
    ) -> CleanerResult<RestoreResult> {
        let _guard = self.restoring.try_begin()?;
        let token = self.stop.arm(cancel);
        let result = self.run_restore(request, &token, on_progress).await;
        self.stop.disarm();
        result
    }

    async fn run_restore(
        &self,
        request: &RestoreRequest,
        token: &CancellationToken,
        on_progress: Option<ProgressCallback<'_, RestoreProgress>>,
    ) -> CleanerResult<RestoreResult> {
        let started = Instant::now();
        let session = self.backups.get_session(&request.session_id).await?;
        let (targets, missing) = select_targets(&session, request.paths.as_deref());

        let mut result = RestoreResult {
            session_id: session.session_id.clone(),
            start_time: Utc::now(),
            end_time: None,
            total_files: targets.len() + missing.len(),
            success_count: 0,
            failure_count: missing.len(),
            total_size: targets.iter().map(|entry| entry.size).sum(),
            restored_size: 0,
            status: RestoreStatus::InProgress,
            error: None,
            restored_files: Vec::new(),
            failed_files: missing,
        };
        self.logger.info(
            "Starting restore",
            json!({
                "operation": "restore",
                "session_id": result.session_id,
                "files": result.total_files,
                "overwrite": request.overwrite,
            }),
        );

        let total = targets.len() as u64;
        for (index, entry) in targets.into_iter().enumerate() {
            if token.is_cancelled() {
                result.status = RestoreStatus::Cancelled;
                result.error = Some("restore cancelled by user".to_string());
                break;
            }

            let original = entry.original_path.clone();
            if !entry.success {
                result.failure_count += 1;
                result.failed_files.push(
                    FileFailure::new(&original, "backup entry was not successful")
                        .with_kind(ErrorKind::NotFound),
                );
            } else {
                let overwrite = request.overwrite;
                let outcome =
                    tokio::task::spawn_blocking(move || restore_entry(&entry, overwrite)).await?;
                match outcome {
                    Ok(bytes) => {
                        result.success_count += 1;
                        result.restored_size += bytes;
                        result.restored_files.push(original.clone());
                    }
                    Err(failure) => {
                        self.logger.warn(
                            "Restore of file failed",
                            json!({ "operation": "restore", "file": original, "error": failure.reason }),
                        );
                        result.failure_count += 1;
                        result.failed_files.push(failure);
                    }
                }
            }

            let done = index as u64 + 1;
            let elapsed = started.elapsed();
            let update = RestoreProgress {
                session_id: result.session_id.clone(),
                current_file: original.display().to_string(),
                files_processed: done,
                total_files: total,
                progress: percent(done, total),
                restored_size: result.restored_size,
                total_size: result.total_size,
                elapsed_ms: elapsed.as_millis() as u64,
                estimated_remaining_ms: estimate_remaining(elapsed, done, total)
                    .map(|eta| eta.as_millis() as u64),
            };
            if let Some(callback) = on_progress {
                callback(&update);
            }
            self.progress.publish(update);
        }

        result.end_time = Some(Utc::now());
        if result.status == RestoreStatus::InProgress {
            result.status = if result.total_files > 0 && result.success_count == 0 {
                RestoreStatus::Failed
            } else {
                RestoreStatus::Completed
            };
        }
        self.logger.info(
            "Restore finished",
            json!({
                "operation": "restore",
                "session_id": result.session_id,
                "status": result.status,
                "restored": result.success_count,
                "failed": result.failure_count,
            }),
        );
        Ok(result)
    }

    /// Successful entries of a session, i.e. the files a restore can bring back.
    pub async fn restorable_files(&self, session_id: &str) -> CleanerResult<Vec<BackupEntry>> {
        let session = self.backups.get_session(session_id).await?;
        Ok(session.successful_entries().cloned().collect())
    }

    pub async fn preview_restore(
        &self,
        session_id: &str,
        paths: Option<&[PathBuf]>,
        overwrite: bool,
    ) -> CleanerResult<RestorePreview> {
        let session = self.backups.get_session(session_id).await?;
        let (targets, missing) = select_targets(&session, paths);

        let mut preview = RestorePreview {
            session_id: session.session_id.clone(),
            total_files: targets.len() + missing.len(),
            restorable: Vec::new(),
            conflicts: Vec::new(),
            ineligible: missing,
            total_size: targets.iter().map(|entry| entry.size).sum(),
            restorable_size: 0,
        };
        for entry in targets {
            let original = entry.original_path.clone();
            if !entry.success {
                preview.ineligible.push(
                    FileFailure::new(original, "backup entry was not successful")
                        .with_kind(ErrorKind::NotFound),
                );
                continue;
            }
            if fs::symlink_metadata(&entry.backup_path).is_err() {
                preview.ineligible.push(
                    FileFailure::new(
                        original,
                        format!("backup file missing: {}", entry.backup_path.display()),
                    )
                    .with_kind(ErrorKind::NotFound),
                );
                continue;
            }
            let conflicts = fs::symlink_metadata(&original).is_ok();
            if conflicts {
                preview.conflicts.push(original.clone());
            }
            if !conflicts || overwrite {
                preview.restorable_size += entry.size;
                preview.restorable.push(original);
            }
        }
        Ok(preview)
    }
}

fn select_targets(session: &BackupSession, paths: Option<&[PathBuf]>) -> (Vec<BackupEntry>, Vec<FileFailure>) {
    let Some(paths) = paths else {
        return (session.entries.clone(), Vec::new());
    };
    let mut targets = Vec::new();
    let mut missing = Vec::new();
    for path in paths {
        match session.entry_for(path) {
            Some(entry) => targets.push(entry.clone()),
            None => missing.push(
                FileFailure::new(path, "file not found in backup session").with_kind(ErrorKind::NotFound),
            ),
        }
    }
    (targets, missing)
}

fn restore_entry(entry: &BackupEntry, overwrite: bool) -> Result<u64, FileFailure> {
    let destination = entry.original_path.as_path();
    let fail = |kind: ErrorKind, reason: String| FileFailure::new(destination, reason).with_kind(kind);
    let io_fail = |path: &Path, context: String, err: std::io::Error| {
        let kind = CleanerError::io(path, err).kind();
        fail(kind, context)
    };

    let exists = fs::symlink_metadata(destination).is_ok();
    if exists && !overwrite {
        return Err(fail(
            ErrorKind::ValidationFailed,
            format!("file already exists and overwrite is disabled: {}", destination.display()),
        ));
    }
    if fs::symlink_metadata(&entry.backup_path).is_err() {
        return Err(fail(
            ErrorKind::NotFound,
            format!("backup file missing: {}", entry.backup_path.display()),
        ));
    }
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent).map_err(|err| {
            let context = format!("failed to create directory {}: {}", parent.display(), err);
            io_fail(parent, context, err)
        })?;
    }
    if exists {
        storage::remove_path(destination).map_err(|err| {
            let context = format!("failed to replace {}: {}", destination.display(), err);
            io_fail(destination, context, err)
        })?;
    }

    let bytes = storage::copy_preserving(&entry.backup_path, destination).map_err(|err| {
        let context = format!("failed to copy file: {}", err);
        io_fail(destination, context, err)
    })?;

    if !entry.checksum.is_empty() {
        let actual = storage::checksum_path(destination).map_err(|err| {
            let context = format!("failed to verify restored file: {}", err);
            io_fail(destination, context, err)
        })?;
        if actual != entry.checksum {
            return Err(fail(
                ErrorKind::IntegrityFailure,
                format!(
                    "checksum mismatch after restore for {}: expected {}, got {}",
                    destination.display(),
                    entry.checksum,
                    actual
                ),
            ));
        }
    }
    Ok(bytes)
}

use std::path::PathBuf;
use std::sync::Arc;

use bytesize::ByteSize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::types::{DeletionRequest, DeletionResult, DeletionStatus, SafetyCheckResult};
use super::validation::{check_request, check_shape};
use crate::backup::{remove_path, BackupManager, BackupProgress, BackupSession, SessionStatus};
use crate::config::BackupSettings;
use crate::error::{CleanerError, CleanerResult, ErrorKind};
use crate::logging::OperationLogger;
use crate::notify::{deliver, NoopNotifier, Notification, NotificationLevel, NotificationSink};
use crate::ops::{percent, CancelSlot, InFlight, OperationKind, ProgressCallback, ProgressTracker};
use crate::safety::SafetyClassifier;

const OPERATION: &str = "deletion";
const CANCELLED: &str = "deletion cancelled by user";
const BLOCKED: &str = "Deletion blocked due to safety concerns. Use force delete to override.";

/// Validate, back up, then delete. Nothing is removed unless its backup
/// entry succeeded, and no delete starts before the backup has finished.
pub struct DeletionPipeline {
    backups: Arc<BackupManager>,
    classifier: Arc<SafetyClassifier>,
    logger: Arc<dyn OperationLogger>,
    notifier: Arc<dyn NotificationSink>,
    verify_integrity: bool,
    deleting: InFlight,
    stop: CancelSlot,
}

impl DeletionPipeline {
    pub fn new(
        backups: Arc<BackupManager>,
        classifier: Arc<SafetyClassifier>,
        logger: Arc<dyn OperationLogger>,
    ) -> Self {
        DeletionPipeline {
            backups,
            classifier,
            logger,
            notifier: Arc::new(NoopNotifier),
            verify_integrity: BackupSettings::default().verify_integrity,
            deleting: InFlight::new(OPERATION),
            stop: CancelSlot::default(),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_backup_settings(mut self, settings: &BackupSettings) -> Self {
        self.verify_integrity = settings.verify_integrity;
        self
    }

    pub fn is_deleting(&self) -> bool {
        self.deleting.is_active()
    }

    pub fn stop_deletion(&self) -> bool {
        self.stop.cancel()
    }

    pub async fn validate(&self, request: &DeletionRequest) -> CleanerResult<SafetyCheckResult> {
        if self.deleting.is_active() {
            return Err(CleanerError::AlreadyInProgress(OPERATION));
        }
        self.validate_inner(request).await
    }

    async fn validate_inner(&self, request: &DeletionRequest) -> CleanerResult<SafetyCheckResult> {
        check_shape(request)?;
        self.logger.info(
            "Starting deletion validation",
            json!({
                "operation": OPERATION,
                "request": request.operation,
                "file_count": request.files.len(),
                "force": request.force_delete,
                "dry_run": request.dry_run,
            }),
        );

        let classifier = Arc::clone(&self.classifier);
        let owned = request.clone();
        let check = tokio::task::spawn_blocking(move || check_request(&classifier, &owned)).await?;

        self.logger.info(
            "Deletion validation completed",
            json!({
                "operation": OPERATION,
                "is_safe": check.is_safe,
                "safe_files": check.safe_files.len(),
                "risky_files": check.risky_files.len(),
                "blocked_files": check.blocked_files.len(),
                "total_size": check.total_size,
            }),
        );
        Ok(check)
    }

    pub async fn delete_files_with_backup(&self, request: &DeletionRequest) -> CleanerResult<DeletionResult> {
        let tracker = ProgressTracker::detached(OperationKind::Deletion);
        self.delete_files_with_backup_tracked(request, &tracker).await
    }

    /// Run a deletion reporting into `tracker`; cancelling the tracker's
    /// token stops the run at the next file boundary.
    pub async fn delete_files_with_backup_tracked(
        &self,
        request: &DeletionRequest,
        tracker: &ProgressTracker,
    ) -> CleanerResult<DeletionResult> {
        let _guard = self.deleting.try_begin()?;
        let token = self.stop.arm(Some(tracker.token()));
        let outcome = self.run(request, &token, tracker).await;
        self.stop.disarm();

        match &outcome {
            Ok(result) => self.report(result, tracker),
            Err(err) => {
                tracker.fail(&err.to_string());
                self.logger.error(
                    "Deletion operation failed",
                    json!({ "operation": OPERATION, "request": request.operation, "error": err.to_string() }),
                );
                self.notify(NotificationLevel::Error, "Deletion failed", err.to_string());
            }
        }
        outcome
    }

    async fn run(
        &self,
        request: &DeletionRequest,
        token: &CancellationToken,
        tracker: &ProgressTracker,
    ) -> CleanerResult<DeletionResult> {
        let mut result = DeletionResult::start(tracker.id(), request);
        self.logger.info(
            "Starting deletion operation",
            json!({
                "operation": OPERATION,
                "operation_id": result.operation_id,
                "request": request.operation,
                "file_count": request.files.len(),
                "force": request.force_delete,
                "dry_run": request.dry_run,
            }),
        );

        tracker.set_status(DeletionStatus::Validating.stage(), "Validating deletion request...");
        let check = self.validate_inner(request).await?;
        result.warnings = check.warnings.clone();
        result.total_size = check.total_size;

        if !check.is_safe && !request.force_delete {
            for path in &request.files {
                match check.blocked_files.iter().find(|blocked| &blocked.path == path) {
                    Some(blocked) => result.skip(path, blocked.reason.kind(), blocked.message.clone()),
                    None => result.skip(path, ErrorKind::SafetyBlocked, BLOCKED),
                }
            }
            return Ok(result.finish(DeletionStatus::Blocked, Some(BLOCKED.to_string())));
        }
        for blocked in &check.blocked_files {
            result.skip(&blocked.path, blocked.reason.kind(), blocked.message.clone());
        }

        let selected = check.selection(request.force_delete);
        if selected.is_empty() {
            return Ok(result.finish(DeletionStatus::Completed, None));
        }

        result.status = DeletionStatus::BackingUp;
        tracker.set_status(DeletionStatus::BackingUp.stage(), "Creating mandatory backup...");
        let on_backup = |update: &BackupProgress| {
            tracker.set_backup_progress(
                update.progress,
                &format!("Backing up file {} of {}", update.files_processed, update.total_files),
            )
        };
        let callback: ProgressCallback<'_, BackupProgress> = &on_backup;
        let session = self
            .backups
            .backup_files_with(&selected, &request.operation, Some(token), Some(callback))
            .await?;
        result.backup_session_id = Some(session.session_id.clone());
        result.backed_up_count = session.success_count;
        result.backed_up_size = session.backup_size;

        match session.status {
            SessionStatus::Cancelled => {
                skip_remaining(&mut result, &selected, CANCELLED);
                return Ok(result.finish(DeletionStatus::Cancelled, Some(CANCELLED.to_string())));
            }
            SessionStatus::Failed | SessionStatus::InProgress => {
                record_backup_failures(&mut result, &session);
                let reason = session
                    .error
                    .clone()
                    .unwrap_or_else(|| "backup did not complete".to_string());
                self.logger.error(
                    "Backup failed",
                    json!({ "operation": OPERATION, "session_id": session.session_id, "error": reason }),
                );
                return Ok(result.finish(
                    DeletionStatus::Failed,
                    Some(format!("mandatory backup failed: {}", reason)),
                ));
            }
            SessionStatus::Completed => {}
        }
        self.logger.info(
            "Backup created successfully",
            json!({
                "operation": OPERATION,
                "session_id": session.session_id,
                "backed_up": session.success_count,
                "backup_size": session.backup_size,
            }),
        );

        if self.verify_integrity {
            match self.backups.ensure_intact(&session.session_id).await {
                Ok(_) => {}
                Err(CleanerError::IntegrityFailure(detail)) => {
                    let reason = format!("backup integrity check failed: {}", detail);
                    for path in &selected {
                        result.fail_file(path, ErrorKind::IntegrityFailure, reason.clone());
                    }
                    return Ok(result.finish(DeletionStatus::Failed, Some(reason)));
                }
                Err(err) => return Err(err),
            }
        }

        result.status = DeletionStatus::BackupComplete;
        tracker.set_status(
            DeletionStatus::BackupComplete.stage(),
            "Backup completed, starting deletion...",
        );
        tracker.set_backup_progress(100.0, "Backup completed");

        if request.dry_run {
            self.dry_run(&mut result, &selected, &session);
            return Ok(result.finish(DeletionStatus::Completed, None));
        }

        result.status = DeletionStatus::Deleting;
        tracker.set_status(DeletionStatus::Deleting.stage(), "Deleting files...");
        let total = selected.len() as u64;
        for (index, path) in selected.iter().enumerate() {
            if token.is_cancelled() {
                skip_remaining(&mut result, &selected[index..], CANCELLED);
                self.logger.info(
                    "Deletion cancelled by user",
                    json!({ "operation": OPERATION, "files_processed": index, "total_files": total }),
                );
                return Ok(result.finish(DeletionStatus::Cancelled, Some(CANCELLED.to_string())));
            }

            match session.entry_for(path) {
                Some(entry) if entry.success => {
                    let target = path.clone();
                    let removed = tokio::task::spawn_blocking(move || remove_path(&target)).await?;
                    match removed {
                        Ok(()) => {
                            result.deleted_count += 1;
                            result.deleted_size += entry.size;
                            result.deleted_files.push(path.clone());
                        }
                        Err(err) => {
                            self.logger.error(
                                "Failed to delete file",
                                json!({ "operation": OPERATION, "file": path, "error": err.to_string() }),
                            );
                            let reason = format!("failed to delete: {}", err);
                            let kind = CleanerError::io(path, err).kind();
                            result.fail_file(path, kind, reason);
                        }
                    }
                }
                Some(entry) => {
                    self.logger.warn(
                        "Skipped deletion due to backup failure",
                        json!({ "operation": OPERATION, "file": path, "error": entry.error }),
                    );
                    result.fail_file(path, ErrorKind::IoFailure, backup_failure(entry.error.as_deref()));
                }
                None => result.fail_file(path, ErrorKind::NotFound, "no backup entry recorded"),
            }

            let done = index as u64 + 1;
            tracker.set_file_progress(
                &path.display().to_string(),
                done,
                total,
                result.deleted_size,
                result.total_size,
            );
            tracker.set_deletion_progress(
                percent(done, total),
                &format!("Deleting file {} of {}", done, total),
            );
        }

        self.logger.info(
            "Deletion operation completed",
            json!({
                "operation": OPERATION,
                "operation_id": result.operation_id,
                "deleted_count": result.deleted_count,
                "failed_count": result.failed_count,
                "skipped_count": result.skipped_count,
                "deleted_size": result.deleted_size,
            }),
        );
        Ok(result.finish(DeletionStatus::Completed, None))
    }

    fn dry_run(&self, result: &mut DeletionResult, selected: &[PathBuf], session: &BackupSession) {
        for path in selected {
            match session.entry_for(path) {
                Some(entry) if entry.success => {
                    result.deleted_count += 1;
                    result.deleted_size += entry.size;
                    result.deleted_files.push(path.clone());
                }
                Some(entry) => result.fail_file(path, ErrorKind::IoFailure, backup_failure(entry.error.as_deref())),
                None => result.fail_file(path, ErrorKind::NotFound, "no backup entry recorded"),
            }
        }
        self.logger.info(
            "Dry run completed",
            json!({
                "operation": OPERATION,
                "files_to_delete": result.deleted_files,
                "total_size": result.deleted_size,
            }),
        );
    }

    /// Check a finished deletion against the filesystem: every deleted
    /// original must be gone and its backup still present.
    pub async fn verify_deletion(&self, result: &DeletionResult) -> CleanerResult<Vec<String>> {
        if result.dry_run || result.deleted_files.is_empty() {
            return Ok(Vec::new());
        }
        let session_id = result
            .backup_session_id
            .as_deref()
            .ok_or_else(|| CleanerError::ValidationFailed("result has no backup session".to_string()))?;
        let session = self.backups.get_session(session_id).await?;
        let deleted = result.deleted_files.clone();

        let problems = tokio::task::spawn_blocking(move || {
            let mut problems = Vec::new();
            for path in &deleted {
                if std::fs::symlink_metadata(path).is_ok() {
                    problems.push(format!("file still exists: {}", path.display()));
                }
                match session.entry_for(path) {
                    Some(entry) if entry.success => {
                        if std::fs::symlink_metadata(&entry.backup_path).is_err() {
                            problems.push(format!("backup missing for {}", path.display()));
                        }
                    }
                    _ => problems.push(format!("no successful backup for {}", path.display())),
                }
            }
            problems
        })
        .await?;
        Ok(problems)
    }

    fn report(&self, result: &DeletionResult, tracker: &ProgressTracker) {
        let error = result.error.clone().unwrap_or_default();
        match result.status {
            DeletionStatus::Completed => {
                let message = if result.dry_run {
                    format!("Dry run: {} files would be deleted", result.deleted_count)
                } else {
                    format!(
                        "Deleted {} files ({})",
                        result.deleted_count,
                        ByteSize(result.deleted_size)
                    )
                };
                tracker.complete(&message);
                self.notify(NotificationLevel::Success, "Cleanup complete", message);
            }
            DeletionStatus::Cancelled => {
                tracker.mark_cancelled(&error);
                self.notify(
                    NotificationLevel::Warning,
                    "Deletion cancelled",
                    format!("{} files were deleted before the stop", result.deleted_count),
                );
            }
            DeletionStatus::Blocked => {
                tracker.fail(&error);
                self.notify(NotificationLevel::Warning, "Deletion blocked", error);
            }
            _ => {
                tracker.fail(&error);
                self.notify(NotificationLevel::Error, "Deletion failed", error);
            }
        }
    }

    fn notify(&self, level: NotificationLevel, title: &str, message: String) {
        deliver(
            self.notifier.as_ref(),
            self.logger.as_ref(),
            Notification::new(level, title, message),
        );
    }
}

fn skip_remaining(result: &mut DeletionResult, files: &[PathBuf], reason: &str) {
    for path in files {
        result.skip(path, ErrorKind::Cancelled, reason);
    }
}

fn record_backup_failures(result: &mut DeletionResult, session: &BackupSession) {
    for entry in &session.entries {
        result.fail_file(&entry.original_path, ErrorKind::IoFailure, backup_failure(entry.error.as_deref()));
    }
}

fn backup_failure(error: Option<&str>) -> String {
    format!("backup failed: {}", error.unwrap_or("unknown error"))
}

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Duration;
use serde_json::json;

use crate::backup::{
    BackupManager, BackupSession, BackupStatus, CleanupReport, IntegrityReport, RestoreManager,
    RestorePreview, RestoreProgress, RestoreRequest, RestoreResult, RestoreStatus,
};
use crate::config::{CacheCatalogue, LocationSpec, Settings, SettingsProvider};
use crate::deletion::{
    ConfirmationDialog, ConfirmationResult, ConfirmationService, DeletionPipeline, DeletionRequest,
    DeletionResult, SafetyCheckResult,
};
use crate::error::{CleanerError, CleanerResult};
use crate::logging::{HistoryLogger, LogCrateLogger, LogEntry, OperationLogger};
use crate::notify::{deliver, NoopNotifier, Notification, NotificationLevel, NotificationSink};
use crate::ops::{
    OperationHandle, OperationKind, ProgressCallback, ProgressManager, ProgressSnapshot, ProgressTracker,
};
use crate::safety::{ClassifierConfig, SafetyClassification, SafetyClassifier};
use crate::scanner::{CacheLocation, CacheScanner, ScanResult};

#[derive(Default)]
pub struct CleanerSystemBuilder {
    backup_root: Option<PathBuf>,
    settings: Option<Settings>,
    provider: Option<Arc<dyn SettingsProvider>>,
    logger: Option<Arc<dyn OperationLogger>>,
    notifier: Option<Arc<dyn NotificationSink>>,
    catalogue: Option<CacheCatalogue>,
}

impl CleanerSystemBuilder {
    /// Overrides both the default root and `BackupSettings::custom_location`.
    pub fn backup_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.backup_root = Some(root.into());
        self
    }

    /// Concrete settings, checked with `Settings::validate` at build time.
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn settings_provider(mut self, provider: Arc<dyn SettingsProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn logger(mut self, logger: Arc<dyn OperationLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn catalogue(mut self, catalogue: CacheCatalogue) -> Self {
        self.catalogue = Some(catalogue);
        self
    }

    pub fn build(self) -> CleanerResult<CleanerSystem> {
        let provider: Arc<dyn SettingsProvider> = match (self.provider, self.settings) {
            (Some(provider), _) => provider,
            (None, Some(settings)) => {
                let problems = settings.validate();
                if !problems.is_empty() {
                    return Err(CleanerError::ValidationFailed(problems.join("; ")));
                }
                Arc::new(settings)
            }
            (None, None) => Arc::new(Settings::default()),
        };
        let history = Arc::new(HistoryLogger::new(
            self.logger.unwrap_or_else(|| Arc::new(LogCrateLogger)),
        ));
        let logger: Arc<dyn OperationLogger> = history.clone();
        let notifier = self.notifier.unwrap_or_else(|| Arc::new(NoopNotifier));

        let safety = provider.safety_settings();
        let backup_settings = provider.backup_settings();
        let classifier = Arc::new(SafetyClassifier::new(ClassifierConfig::from_settings(&safety)));
        let backups = Arc::new(match self.backup_root {
            Some(root) => BackupManager::new(root, Arc::clone(&logger))?,
            None => BackupManager::from_settings(&backup_settings, Arc::clone(&logger))?,
        });
        let scanner = Arc::new(CacheScanner::new(
            Arc::clone(&classifier),
            provider.performance_settings(),
            Arc::clone(&logger),
        ));
        let restorer = Arc::new(RestoreManager::new(Arc::clone(&backups), Arc::clone(&logger)));
        let deletion = Arc::new(
            DeletionPipeline::new(Arc::clone(&backups), Arc::clone(&classifier), Arc::clone(&logger))
                .with_notifier(Arc::clone(&notifier))
                .with_backup_settings(&backup_settings),
        );

        logger.info(
            "Cleaner system initialised",
            json!({ "backup_dir": backups.backup_dir(), "protect_system_paths": safety.protect_system_paths }),
        );
        Ok(CleanerSystem {
            provider,
            history,
            logger,
            notifier,
            catalogue: self.catalogue.unwrap_or_else(CacheCatalogue::default_locations),
            classifier,
            scanner,
            backups,
            restorer,
            deletion,
            confirmations: ConfirmationService::new(),
            progress: ProgressManager::new(),
        })
    }
}

/// Every boundary operation of the cleaner, wired over one backup root.
pub struct CleanerSystem {
    provider: Arc<dyn SettingsProvider>,
    history: Arc<HistoryLogger>,
    logger: Arc<dyn OperationLogger>,
    notifier: Arc<dyn NotificationSink>,
    catalogue: CacheCatalogue,
    classifier: Arc<SafetyClassifier>,
    scanner: Arc<CacheScanner>,
    backups: Arc<BackupManager>,
    restorer: Arc<RestoreManager>,
    deletion: Arc<DeletionPipeline>,
    confirmations: ConfirmationService,
    progress: ProgressManager,
}

impl CleanerSystem {
    pub fn builder() -> CleanerSystemBuilder {
        CleanerSystemBuilder::default()
    }

    pub fn scanner(&self) -> &CacheScanner {
        &self.scanner
    }

    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }

    pub fn restorer(&self) -> &RestoreManager {
        &self.restorer
    }

    pub fn deletion(&self) -> &DeletionPipeline {
        &self.deletion
    }

    pub fn confirmations(&self) -> &ConfirmationService {
        &self.confirmations
    }

    pub fn progress(&self) -> &ProgressManager {
        &self.progress
    }

    pub fn catalogue(&self) -> &CacheCatalogue {
        &self.catalogue
    }

    // Scanning

    pub async fn scan_location(&self, id: &str, name: &str, path: &str) -> CleanerResult<CacheLocation> {
        self.scanner.scan_location(id, name, path).await
    }

    pub async fn scan_multiple_locations(&self, locations: &[LocationSpec]) -> CleanerResult<ScanResult> {
        self.scanner.scan_multiple_locations(locations).await
    }

    pub async fn scan_catalogue(&self) -> CleanerResult<ScanResult> {
        self.scanner.scan_multiple_locations(&self.catalogue.all()).await
    }

    pub fn classify_file(&self, path: &Path) -> CleanerResult<SafetyClassification> {
        self.classifier.classify_path(path)
    }

    // Deletion

    pub async fn validate_deletion_request(&self, request: &DeletionRequest) -> CleanerResult<SafetyCheckResult> {
        self.deletion.validate(request).await
    }

    /// Run a deletion to completion. Forced requests must be confirmed
    /// through `prepare_deletion` while `require_confirmation` is on.
    pub async fn delete_files_with_backup(&self, request: &DeletionRequest) -> CleanerResult<DeletionResult> {
        self.ensure_unconfirmed_allowed(request)?;
        let tracker = self.progress.register(OperationKind::Deletion);
        self.deletion
            .delete_files_with_backup_tracked(request, &tracker)
            .await
    }

    pub fn spawn_deletion(&self, request: DeletionRequest) -> CleanerResult<OperationHandle<DeletionResult>> {
        self.ensure_unconfirmed_allowed(&request)?;
        Ok(self.launch_deletion(request))
    }

    /// Validate `request` and open a confirmation dialog for it.
    pub async fn prepare_deletion(&self, request: &DeletionRequest) -> CleanerResult<ConfirmationDialog> {
        let check = self.deletion.validate(request).await?;
        Ok(self.confirmations.create_dialog(request, &check))
    }

    /// Consume a confirmed dialog and start its deletion in the background.
    pub fn confirm_deletion(
        &self,
        dialog_id: &str,
        confirmation: &ConfirmationResult,
    ) -> CleanerResult<OperationHandle<DeletionResult>> {
        let dialog = self.confirmations.validate_confirmation(dialog_id, confirmation)?;
        self.confirmations.remove(dialog_id);
        let mut request = dialog.request;
        request.force_delete |= confirmation.force_delete;
        request.dry_run |= confirmation.dry_run;
        self.logger.info(
            "Deletion confirmed",
            json!({
                "operation": "deletion",
                "dialog_id": dialog_id,
                "force": request.force_delete,
                "dry_run": request.dry_run,
            }),
        );
        Ok(self.launch_deletion(request))
    }

    fn launch_deletion(&self, request: DeletionRequest) -> OperationHandle<DeletionResult> {
        let tracker = self.progress.register(OperationKind::Deletion);
        let worker = Arc::clone(&tracker);
        let pipeline = Arc::clone(&self.deletion);
        OperationHandle::spawn(tracker, async move {
            pipeline.delete_files_with_backup_tracked(&request, &worker).await
        })
    }

    fn ensure_unconfirmed_allowed(&self, request: &DeletionRequest) -> CleanerResult<()> {
        if request.force_delete && self.provider.safety_settings().require_confirmation {
            return Err(CleanerError::SafetyBlocked(
                "forced deletions require confirmation".to_string(),
            ));
        }
        Ok(())
    }

    pub async fn verify_deletion(&self, result: &DeletionResult) -> CleanerResult<Vec<String>> {
        self.deletion.verify_deletion(result).await
    }

    /// Log entries recorded by the deletion pipeline, oldest first.
    pub fn deletion_history(&self) -> Vec<LogEntry> {
        self.history.entries_for_operation("deletion")
    }

    pub fn history(&self) -> Vec<LogEntry> {
        self.history.entries()
    }

    // Backup and restore

    pub async fn restore_session(&self, session_id: &str, overwrite: bool) -> CleanerResult<RestoreResult> {
        self.run_restore(RestoreRequest::session(session_id, overwrite)).await
    }

    pub async fn restore_files(
        &self,
        session_id: &str,
        paths: &[PathBuf],
        overwrite: bool,
    ) -> CleanerResult<RestoreResult> {
        self.run_restore(RestoreRequest::files(session_id, paths.to_vec(), overwrite))
            .await
    }

    async fn run_restore(&self, request: RestoreRequest) -> CleanerResult<RestoreResult> {
        let tracker = self.progress.register(OperationKind::Restore);
        tracked_restore(&self.restorer, &request, &tracker, self.notifier.as_ref(), self.logger.as_ref()).await
    }

    pub fn spawn_restore(&self, request: RestoreRequest) -> OperationHandle<RestoreResult> {
        let tracker = self.progress.register(OperationKind::Restore);
        let worker = Arc::clone(&tracker);
        let restorer = Arc::clone(&self.restorer);
        let notifier = Arc::clone(&self.notifier);
        let logger = Arc::clone(&self.logger);
        OperationHandle::spawn(tracker, async move {
            tracked_restore(&restorer, &request, &worker, notifier.as_ref(), logger.as_ref()).await
        })
    }

    pub async fn preview_restore(
        &self,
        session_id: &str,
        paths: Option<&[PathBuf]>,
        overwrite: bool,
    ) -> CleanerResult<RestorePreview> {
        self.restorer.preview_restore(session_id, paths, overwrite).await
    }

    pub async fn verify_backup_integrity(&self, session_id: &str) -> CleanerResult<IntegrityReport> {
        self.backups.verify_backup_integrity(session_id).await
    }

    pub async fn cleanup_old_backups(&self, older_than: Duration) -> CleanerResult<CleanupReport> {
        let report = self.backups.cleanup_old_backups(older_than).await?;
        if !report.removed_sessions.is_empty() {
            self.notify(
                NotificationLevel::Info,
                "Backups cleaned up",
                format!(
                    "Removed {} old backup sessions, {} remain",
                    report.removed_sessions.len(),
                    report.remaining_sessions
                ),
            );
        }
        Ok(report)
    }

    /// Cleanup using `BackupSettings::retention_days`.
    pub async fn cleanup_expired_backups(&self) -> CleanerResult<CleanupReport> {
        let days = i64::from(self.provider.backup_settings().retention_days);
        self.cleanup_old_backups(Duration::days(days)).await
    }

    pub async fn list_backup_sessions(&self) -> CleanerResult<Vec<BackupSession>> {
        self.backups.list_sessions().await
    }

    pub async fn backup_status(&self) -> CleanerResult<BackupStatus> {
        self.backups.status().await
    }

    // Progress

    pub fn get_progress(&self, operation_id: &str) -> CleanerResult<ProgressSnapshot> {
        self.progress.get_progress(operation_id)
    }

    pub fn cancel_operation(&self, operation_id: &str) -> bool {
        self.progress.cancel(operation_id)
    }

    /// Signal every running scan, backup, restore and deletion.
    pub fn stop_all(&self) {
        self.scanner.stop_scan();
        self.backups.stop_backup();
        self.restorer.stop_restore();
        self.deletion.stop_deletion();
        self.progress.cancel_all();
        self.logger.info("Stop requested for all operations", json!({}));
    }

    fn notify(&self, level: NotificationLevel, title: &str, message: String) {
        deliver(
            self.notifier.as_ref(),
            self.logger.as_ref(),
            Notification::new(level, title, message),
        );
    }
}

async fn tracked_restore(
    restorer: &RestoreManager,
    request: &RestoreRequest,
    tracker: &ProgressTracker,
    notifier: &dyn NotificationSink,
    logger: &dyn OperationLogger,
) -> CleanerResult<RestoreResult> {
    tracker.set_status("restoring", "Restoring files from backup...");
    let on_progress = |update: &RestoreProgress| {
        tracker.set_file_progress(
            &update.current_file,
            update.files_processed,
            update.total_files,
            update.restored_size,
            update.total_size,
        )
    };
    let callback: ProgressCallback<'_, RestoreProgress> = &on_progress;
    let outcome = restorer
        .restore(request, Some(tracker.token()), Some(callback))
        .await;

    let notification = match &outcome {
        Ok(result) => match result.status {
            RestoreStatus::Completed => {
                let message = format!("Restored {} files", result.success_count);
                tracker.complete(&message);
                Notification::new(NotificationLevel::Success, "Restore complete", message)
            }
            RestoreStatus::Cancelled => {
                tracker.mark_cancelled("restore cancelled by user");
                Notification::new(
                    NotificationLevel::Warning,
                    "Restore cancelled",
                    format!("{} files were restored before the stop", result.success_count),
                )
            }
            RestoreStatus::Failed | RestoreStatus::InProgress => {
                let message = result
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("{} files could not be restored", result.failure_count));
                tracker.fail(&message);
                Notification::new(NotificationLevel::Error, "Restore failed", message)
            }
        },
        Err(err) => {
            tracker.fail(&err.to_string());
            Notification::new(NotificationLevel::Error, "Restore failed", err.to_string())
        }
    };
    deliver(notifier, logger, notification);
    outcome
}

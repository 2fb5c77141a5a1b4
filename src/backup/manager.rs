use std::fs;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::manifest::{BackupEntry, BackupManifest, BackupSession, ManifestStore, SessionStatus};
use super::storage;
use crate::config::BackupSettings;
use crate::error::{CleanerError, CleanerResult};
use crate::logging::OperationLogger;
use crate::ops::{estimate_remaining, percent, CancelSlot, InFlight, ProgressCallback, ProgressQueue};
use crate::safety::permission_string;

const APP_DIR: &str = "CacheCleaner";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupProgress {
    pub session_id: String,
    pub current_file: String,
    pub files_processed: u64,
    pub total_files: u64,
    pub progress: f32,
    pub bytes_processed: u64,
    pub elapsed_ms: u64,
    pub estimated_remaining_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub session_id: String,
    pub valid: bool,
    pub checked: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CleanupReport {
    pub removed_sessions: Vec<String>,
    pub remaining_sessions: usize,
    pub freed_bytes: u64,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupStatus {
    pub backup_dir: PathBuf,
    pub total_sessions: usize,
    pub total_files: usize,
    pub total_size: u64,
    pub disk_usage: u64,
    pub last_backup: Option<DateTime<Utc>>,
    pub is_backing_up: bool,
}

/// Copies files into `<root>/files/<session_id>/` before they are removed and
/// records every session in `<root>/manifest.json`.
pub struct BackupManager {
    root: PathBuf,
    files_dir: PathBuf,
    metadata_dir: PathBuf,
    manifest: ManifestStore,
    logger: Arc<dyn OperationLogger>,
    backing_up: InFlight,
    stop: CancelSlot,
    progress: ProgressQueue<BackupProgress>,
}

impl BackupManager {
    pub fn new(root: impl Into<PathBuf>, logger: Arc<dyn OperationLogger>) -> CleanerResult<Self> {
        let root = root.into();
        let files_dir = root.join("files");
        let metadata_dir = root.join("metadata");
        for dir in [&root, &files_dir, &metadata_dir, &root.join("logs")] {
            fs::create_dir_all(dir).map_err(|err| CleanerError::io(dir, err))?;
        }
        Ok(BackupManager {
            manifest: ManifestStore::new(root.join("manifest.json")),
            root,
            files_dir,
            metadata_dir,
            logger,
            backing_up: InFlight::new("backup"),
            stop: CancelSlot::default(),
            progress: ProgressQueue::default(),
        })
    }

    pub fn from_settings(settings: &BackupSettings, logger: Arc<dyn OperationLogger>) -> CleanerResult<Self> {
        let root = match &settings.custom_location {
            Some(path) => path.clone(),
            None => Self::default_root()?,
        };
        Self::new(root, logger)
    }

    /// `~/CacheCleaner/Backups`
    pub fn default_root() -> CleanerResult<PathBuf> {
        dirs::home_dir()
            .map(|home| home.join(APP_DIR).join("Backups"))
            .ok_or_else(|| CleanerError::not_found("home directory", "$HOME"))
    }

    pub fn backup_dir(&self) -> &Path {
        &self.root
    }

    pub fn manifest_path(&self) -> &Path {
        self.manifest.path()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BackupProgress> {
        self.progress.subscribe()
    }

    pub fn is_backing_up(&self) -> bool {
        self.backing_up.is_active()
    }

    pub fn stop_backup(&self) -> bool {
        self.stop.cancel()
    }

    pub async fn backup_files(&self, files: &[PathBuf], operation: &str) -> CleanerResult<BackupSession> {
        self.backup_files_with(files, operation, None, None).await
    }

    /// Back up `files` in input order. Per-file failures become failed
    /// entries; a cancelled run is recorded with status `cancelled`.
    pub async fn backup_files_with(
        &self,
        files: &[PathBuf],
        operation: &str,
        cancel: Option<&CancellationToken>,
        on_progress: Option<ProgressCallback<'_, BackupProgress>>,
    ) -> CleanerResult<BackupSession> {
        let _guard = self.backing_up.try_begin()?;
        let token = self.stop.arm(cancel);
        let result = self.run_backup(files, operation, &token, on_progress).await;
        self.stop.disarm();
        result
    }

    async fn run_backup(
        &self,
        files: &[PathBuf],
        operation: &str,
        token: &CancellationToken,
        on_progress: Option<ProgressCallback<'_, BackupProgress>>,
    ) -> CleanerResult<BackupSession> {
        let started = Instant::now();
        let session_id = new_session_id();
        let session_dir = self.files_dir.join(&session_id);
        tokio::fs::create_dir_all(&session_dir)
            .await
            .map_err(|err| CleanerError::io(&session_dir, err))?;

        let mut session = BackupSession::new(session_id.clone(), operation, files.len());
        self.logger.info(
            "Starting backup session",
            json!({ "operation": operation, "session_id": session_id, "files": files.len() }),
        );

        let total = files.len() as u64;
        let mut processed_bytes = 0u64;
        for (index, path) in files.iter().enumerate() {
            if token.is_cancelled() {
                session.status = SessionStatus::Cancelled;
                session.error = Some("backup cancelled by user".to_string());
                break;
            }

            let original = path.clone();
            let dir = session_dir.clone();
            let op = operation.to_string();
            let (entry, stored) = tokio::task::spawn_blocking(move || {
                let entry = backup_single(&original, &dir, &op);
                let stored = if entry.success { storage::path_size(&entry.backup_path) } else { 0 };
                (entry, stored)
            })
            .await?;

            if entry.success {
                session.success_count += 1;
                session.total_size += entry.size;
                session.backup_size += stored;
            } else {
                session.failure_count += 1;
                self.logger.warn(
                    "Backup of file failed",
                    json!({
                        "operation": operation,
                        "session_id": session_id,
                        "file": entry.original_path,
                        "error": entry.error,
                    }),
                );
            }
            processed_bytes += entry.size;
            session.entries.push(entry);

            let done = index as u64 + 1;
            let elapsed = started.elapsed();
            let update = BackupProgress {
                session_id: session_id.clone(),
                current_file: path.display().to_string(),
                files_processed: done,
                total_files: total,
                progress: percent(done, total),
                bytes_processed: processed_bytes,
                elapsed_ms: elapsed.as_millis() as u64,
                estimated_remaining_ms: estimate_remaining(elapsed, done, total)
                    .map(|eta| eta.as_millis() as u64),
            };
            if let Some(callback) = on_progress {
                callback(&update);
            }
            self.progress.publish(update);
        }

        session.end_time = Some(Utc::now());
        if session.status == SessionStatus::InProgress {
            if session.total_files > 0 && session.success_count == 0 {
                session.status = SessionStatus::Failed;
                session.error = Some(format!("all {} files failed to back up", session.total_files));
            } else {
                session.status = SessionStatus::Completed;
            }
        }

        self.write_session_metadata(&session).await;
        let recorded = session.clone();
        self.manifest
            .update(move |manifest| manifest.sessions.push(recorded))
            .await?;

        self.logger.info(
            "Backup session finished",
            json!({
                "operation": operation,
                "session_id": session.session_id,
                "status": session.status,
                "succeeded": session.success_count,
                "failed": session.failure_count,
                "bytes": session.total_size,
            }),
        );
        Ok(session)
    }

    // Best effort: the manifest is the record of truth.
    async fn write_session_metadata(&self, session: &BackupSession) {
        let path = self.metadata_dir.join(format!("{}.json", session.session_id));
        let written = match serde_json::to_vec_pretty(session) {
            Ok(raw) => tokio::fs::write(&path, raw).await.map_err(|err| err.to_string()),
            Err(err) => Err(err.to_string()),
        };
        if let Err(err) = written {
            self.logger.warn(
                "Could not write session metadata",
                json!({ "session_id": session.session_id, "error": err }),
            );
        }
    }

    pub async fn get_manifest(&self) -> CleanerResult<BackupManifest> {
        self.manifest.load().await
    }

    pub async fn get_session(&self, session_id: &str) -> CleanerResult<BackupSession> {
        self.manifest
            .load()
            .await?
            .session(session_id)
            .cloned()
            .ok_or_else(|| CleanerError::not_found("backup session", session_id))
    }

    pub async fn list_sessions(&self) -> CleanerResult<Vec<BackupSession>> {
        Ok(self.manifest.load().await?.sessions)
    }

    /// Recompute every successful entry's checksum against its backup copy.
    pub async fn verify_backup_integrity(&self, session_id: &str) -> CleanerResult<IntegrityReport> {
        let session = self.get_session(session_id).await?;
        let report = tokio::task::spawn_blocking(move || verify_session(&session)).await?;
        if !report.valid {
            self.logger.error(
                "Backup integrity check failed",
                json!({ "session_id": report.session_id, "errors": report.errors }),
            );
        }
        Ok(report)
    }

    /// Like `verify_backup_integrity`, but a mismatch is an `IntegrityFailure`.
    pub async fn ensure_intact(&self, session_id: &str) -> CleanerResult<IntegrityReport> {
        let report = self.verify_backup_integrity(session_id).await?;
        if report.valid {
            Ok(report)
        } else {
            Err(CleanerError::IntegrityFailure(report.errors.join("; ")))
        }
    }

    pub async fn cleanup_old_backups(&self, older_than: Duration) -> CleanerResult<CleanupReport> {
        self.cleanup_old_backups_at(older_than, Utc::now()).await
    }

    /// Drop sessions that started before `now - older_than`. The manifest is
    /// rewritten first; blob removal failures are reported, not fatal.
    pub async fn cleanup_old_backups_at(
        &self,
        older_than: Duration,
        now: DateTime<Utc>,
    ) -> CleanerResult<CleanupReport> {
        let _guard = self.backing_up.try_begin()?;
        let cutoff = now - older_than;
        let (expired, remaining) = self
            .manifest
            .update(move |manifest| {
                let (expired, kept): (Vec<_>, Vec<_>) = mem::take(&mut manifest.sessions)
                    .into_iter()
                    .partition(|session| session.start_time < cutoff);
                manifest.sessions = kept;
                (expired, manifest.sessions.len())
            })
            .await?;

        let mut report = self.remove_session_blobs(&expired).await?;
        report.remaining_sessions = remaining;
        self.logger.info(
            "Old backups cleaned up",
            json!({
                "operation": "cleanup",
                "removed": report.removed_sessions.len(),
                "remaining": remaining,
                "freed_bytes": report.freed_bytes,
            }),
        );
        Ok(report)
    }

    pub async fn delete_session(&self, session_id: &str) -> CleanerResult<CleanupReport> {
        let _guard = self.backing_up.try_begin()?;
        let id = session_id.to_string();
        let (removed, remaining) = self
            .manifest
            .update(move |manifest| {
                let position = manifest.sessions.iter().position(|s| s.session_id == id);
                let removed = position.map(|index| manifest.sessions.remove(index));
                (removed, manifest.sessions.len())
            })
            .await?;
        let removed = removed.ok_or_else(|| CleanerError::not_found("backup session", session_id))?;

        let mut report = self.remove_session_blobs(std::slice::from_ref(&removed)).await?;
        report.remaining_sessions = remaining;
        Ok(report)
    }

    async fn remove_session_blobs(&self, sessions: &[BackupSession]) -> CleanerResult<CleanupReport> {
        let targets: Vec<(String, PathBuf, PathBuf)> = sessions
            .iter()
            .map(|session| {
                (
                    session.session_id.clone(),
                    self.files_dir.join(&session.session_id),
                    self.metadata_dir.join(format!("{}.json", session.session_id)),
                )
            })
            .collect();

        let report = tokio::task::spawn_blocking(move || {
            let mut report = CleanupReport::default();
            for (session_id, blob_dir, metadata_file) in targets {
                let size = storage::path_size(&blob_dir);
                match storage::remove_path(&blob_dir) {
                    Ok(()) => report.freed_bytes += size,
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                    Err(err) => report
                        .errors
                        .push(format!("failed to remove {}: {}", blob_dir.display(), err)),
                }
                let _ = fs::remove_file(&metadata_file);
                report.removed_sessions.push(session_id);
            }
            report
        })
        .await?;
        Ok(report)
    }

    pub async fn status(&self) -> CleanerResult<BackupStatus> {
        let manifest = self.manifest.load().await?;
        let files_dir = self.files_dir.clone();
        let disk_usage = tokio::task::spawn_blocking(move || storage::path_size(&files_dir)).await?;
        Ok(BackupStatus {
            backup_dir: self.root.clone(),
            total_sessions: manifest.total_sessions,
            total_files: manifest.total_files,
            total_size: manifest.total_size,
            disk_usage,
            last_backup: manifest.sessions.iter().map(|s| s.start_time).max(),
            is_backing_up: self.is_backing_up(),
        })
    }
}

fn new_session_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("backup_{}_{}", Utc::now().format("%Y%m%d_%H%M%S"), &suffix[..8])
}

fn backup_single(original: &Path, session_dir: &Path, operation: &str) -> BackupEntry {
    let mut entry = BackupEntry::pending(original, operation);

    let metadata = match fs::symlink_metadata(original) {
        Ok(metadata) => metadata,
        Err(err) => {
            entry.error = Some(format!("failed to stat file: {}", err));
            return entry;
        }
    };
    if metadata.file_type().is_symlink() {
        entry.error = Some("symbolic links are not backed up".to_string());
        return entry;
    }

    entry.size = storage::path_size(original);
    entry
        .metadata
        .insert("permissions".into(), Value::String(permission_string(&metadata)));
    if let Ok(modified) = metadata.modified() {
        entry.metadata.insert(
            "mod_time".into(),
            Value::String(DateTime::<Utc>::from(modified).to_rfc3339()),
        );
    }
    entry
        .metadata
        .insert("is_dir".into(), Value::Bool(metadata.is_dir()));

    let name = original
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| "unnamed".into());
    let destination = storage::unique_destination(session_dir, &name);
    entry.backup_path = destination.clone();

    if let Err(err) = storage::copy_preserving(original, &destination) {
        let _ = storage::remove_path(&destination);
        entry.error = Some(format!("failed to copy file: {}", err));
        return entry;
    }

    match storage::checksum_path(&destination) {
        Ok(checksum) => {
            entry.checksum = checksum;
            entry.success = true;
        }
        Err(err) => entry.error = Some(format!("failed to calculate checksum: {}", err)),
    }
    entry
}

fn verify_session(session: &BackupSession) -> IntegrityReport {
    let mut errors = Vec::new();
    let mut checked = 0;
    for entry in session.successful_entries() {
        checked += 1;
        let path = &entry.backup_path;
        if fs::symlink_metadata(path).is_err() {
            errors.push(format!("backup file missing: {}", path.display()));
            continue;
        }
        match storage::checksum_path(path) {
            Ok(actual) if actual == entry.checksum => {}
            Ok(actual) => errors.push(format!(
                "checksum mismatch for {}: expected {}, got {}",
                path.display(),
                entry.checksum,
                actual
            )),
            Err(err) => errors.push(format!(
                "failed to calculate checksum for {}: {}",
                path.display(),
                err
            )),
        }
    }
    IntegrityReport {
        session_id: session.session_id.clone(),
        valid: errors.is_empty(),
        checked,
        errors,
    }
}

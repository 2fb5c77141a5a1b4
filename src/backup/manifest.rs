use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{CleanerError, CleanerResult};

pub const MANIFEST_VERSION: &str = "1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    InProgress,
    Completed,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupEntry {
    pub original_path: PathBuf,
    pub backup_path: PathBuf,
    pub size: u64,
    pub checksum: String,
    pub backup_time: DateTime<Utc>,
    pub operation: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl BackupEntry {
    pub(crate) fn pending(original: &Path, operation: &str) -> Self {
        BackupEntry {
            original_path: original.to_path_buf(),
            backup_path: PathBuf::new(),
            size: 0,
            checksum: String::new(),
            backup_time: Utc::now(),
            operation: operation.to_string(),
            success: false,
            error: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.metadata
            .get("is_dir")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupSession {
    pub session_id: String,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    pub operation: String,
    pub total_files: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub total_size: u64,
    pub backup_size: u64,
    pub entries: Vec<BackupEntry>,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BackupSession {
    pub(crate) fn new(session_id: String, operation: &str, total_files: usize) -> Self {
        BackupSession {
            session_id,
            start_time: Utc::now(),
            end_time: None,
            operation: operation.to_string(),
            total_files,
            success_count: 0,
            failure_count: 0,
            total_size: 0,
            backup_size: 0,
            entries: Vec::new(),
            status: SessionStatus::InProgress,
            error: None,
        }
    }

    /// The entry recorded for `original`, if that path was part of the session.
    pub fn entry_for(&self, original: &Path) -> Option<&BackupEntry> {
        self.entries.iter().find(|entry| entry.original_path == original)
    }

    pub fn successful_entries(&self) -> impl Iterator<Item = &BackupEntry> {
        self.entries.iter().filter(|entry| entry.success)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupManifest {
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub sessions: Vec<BackupSession>,
    pub total_sessions: usize,
    pub total_files: usize,
    pub total_size: u64,
}

impl BackupManifest {
    pub fn new() -> Self {
        let now = Utc::now();
        BackupManifest {
            version: MANIFEST_VERSION.to_string(),
            created_at: now,
            last_updated: now,
            sessions: Vec::new(),
            total_sessions: 0,
            total_files: 0,
            total_size: 0,
        }
    }

    pub fn session(&self, session_id: &str) -> Option<&BackupSession> {
        self.sessions
            .iter()
            .find(|session| session.session_id == session_id)
    }

    /// Aggregates are always derived from the session list.
    pub fn recompute_totals(&mut self) {
        self.total_sessions = self.sessions.len();
        self.total_files = self.sessions.iter().map(|s| s.total_files).sum();
        self.total_size = self.sessions.iter().map(|s| s.total_size).sum();
    }
}

impl Default for BackupManifest {
    fn default() -> Self {
        Self::new()
    }
}

/// The on-disk manifest. Writers serialize on an internal lock and replace
/// the file atomically; readers never observe a partial write.
#[derive(Debug)]
pub struct ManifestStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl ManifestStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ManifestStore {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing manifest reads as an empty one; an unparsable one is an error.
    pub async fn load(&self) -> CleanerResult<BackupManifest> {
        match tokio::fs::read(&self.path).await {
            Ok(raw) => Ok(serde_json::from_slice(&raw)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(BackupManifest::new()),
            Err(err) => Err(CleanerError::io(&self.path, err)),
        }
    }

    /// Read-modify-write under the store lock, then recompute totals and persist.
    pub async fn update<F, R>(&self, mutate: F) -> CleanerResult<R>
    where
        F: FnOnce(&mut BackupManifest) -> R + Send,
        R: Send,
    {
        let _lock = self.write_lock.lock().await;
        let mut manifest = self.load().await?;
        let out = mutate(&mut manifest);
        manifest.recompute_totals();
        manifest.last_updated = Utc::now();
        self.write_atomic(&manifest).await?;
        Ok(out)
    }

    async fn write_atomic(&self, manifest: &BackupManifest) -> CleanerResult<()> {
        let raw = serde_json::to_vec_pretty(manifest)?;
        let tmp = self.path.with_extension("json.tmp");
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|err| CleanerError::io(&tmp, err))?;
        file.write_all(&raw)
            .await
            .map_err(|err| CleanerError::io(&tmp, err))?;
        file.sync_all()
            .await
            .map_err(|err| CleanerError::io(&tmp, err))?;
        drop(file);
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|err| CleanerError::io(&self.path, err))
    }
}

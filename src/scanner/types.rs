use std::fs::Metadata;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::safety::{
    permission_string, ClassificationSummary, FileMetadata, SafetyClassification, SafetyLevel,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheFile {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub is_dir: bool,
    pub permissions: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safety_classification: Option<SafetyClassification>,
}

impl CacheFile {
    pub(crate) fn from_metadata(path: &Path, metadata: &Metadata, use_access_time: bool) -> Self {
        let last_modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| epoch());
        // mtime stands in for atime unless real access times were asked for
        let last_accessed = if use_access_time {
            metadata
                .accessed()
                .map(DateTime::<Utc>::from)
                .unwrap_or(last_modified)
        } else {
            last_modified
        };
        CacheFile {
            name: file_name(path),
            path: path.to_path_buf(),
            size: metadata.len(),
            last_modified,
            last_accessed,
            is_dir: metadata.is_dir(),
            permissions: permission_string(metadata),
            error: None,
            safety_classification: None,
        }
    }

    /// An entry the walk could not read.
    pub(crate) fn failed(path: &Path, error: impl Into<String>) -> Self {
        CacheFile {
            name: file_name(path),
            path: path.to_path_buf(),
            size: 0,
            last_modified: epoch(),
            last_accessed: epoch(),
            is_dir: false,
            permissions: String::new(),
            error: Some(error.into()),
            safety_classification: None,
        }
    }

    pub fn to_file_metadata(&self) -> FileMetadata {
        FileMetadata {
            path: self.path.clone(),
            size: self.size,
            modified: self.last_modified,
            is_dir: self.is_dir,
            permissions: self.permissions.clone(),
        }
    }

    pub fn level(&self) -> Option<SafetyLevel> {
        self.safety_classification.as_ref().map(|c| c.level)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::from(std::time::UNIX_EPOCH)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheLocation {
    pub id: String,
    pub name: String,
    pub path: PathBuf,
    pub total_size: u64,
    pub file_count: u64,
    pub dir_count: u64,
    pub files: Vec<CacheFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub scan_duration_ms: u64,
}

impl CacheLocation {
    pub(crate) fn new(id: &str, name: &str, path: PathBuf) -> Self {
        CacheLocation {
            id: id.to_string(),
            name: name.to_string(),
            path,
            total_size: 0,
            file_count: 0,
            dir_count: 0,
            files: Vec::new(),
            error: None,
            scan_duration_ms: 0,
        }
    }

    pub fn safety_summary(&self) -> ClassificationSummary {
        ClassificationSummary::from_classifications(
            self.files
                .iter()
                .filter_map(|file| file.safety_classification.as_ref()),
        )
    }

    pub fn files_by_level(&self, level: SafetyLevel) -> Vec<&CacheFile> {
        self.files
            .iter()
            .filter(|file| file.level() == Some(level))
            .collect()
    }

    pub fn failed_entries(&self) -> impl Iterator<Item = &CacheFile> {
        self.files.iter().filter(|file| file.error.is_some())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanProgress {
    pub location_id: String,
    pub location_name: String,
    pub current_path: String,
    pub files_scanned: u64,
    pub total_files: u64,
    pub progress: f32,
    pub elapsed_ms: u64,
    pub estimated_remaining_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanResult {
    pub total_locations: usize,
    pub total_size: u64,
    pub total_files: u64,
    pub total_dirs: u64,
    pub scan_duration_ms: u64,
    pub locations: Vec<CacheLocation>,
    pub errors: Vec<String>,
}

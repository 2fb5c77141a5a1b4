use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::context::{permission_string, PathContext};
use crate::config::SafetySettings;
use crate::error::{CleanerError, CleanerResult};

const BASE_CONFIDENCE: i32 = 50;
const SAFE_CONFIDENCE: i32 = 70;
const CAUTION_CONFIDENCE: i32 = 40;
const SMALL_FILE_BYTES: u64 = 1024;
const MAX_EXPLAINED_REASONS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyLevel {
    Safe,
    Caution,
    Risky,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyClassification {
    pub level: SafetyLevel,
    pub confidence: u8,
    pub explanation: String,
    pub reasons: Vec<String>,
}

/// The facts the classifier looks at; nothing else about a file matters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub path: PathBuf,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub is_dir: bool,
    pub permissions: String,
}

impl FileMetadata {
    pub fn from_fs(path: impl Into<PathBuf>, metadata: &fs::Metadata) -> Self {
        let modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        FileMetadata {
            path: path.into(),
            size: metadata.len(),
            modified,
            is_dir: metadata.is_dir(),
            permissions: permission_string(metadata),
        }
    }

    pub fn read(path: &Path) -> CleanerResult<Self> {
        let metadata = fs::symlink_metadata(path).map_err(|err| CleanerError::io(path, err))?;
        Ok(Self::from_fs(path, &metadata))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub safe_age_threshold_days: i64,
    pub caution_age_threshold_days: i64,
    pub large_file_threshold: u64,
    pub system_critical_paths: Vec<String>,
    pub temp_dir_patterns: Vec<String>,
    pub dev_cache_patterns: Vec<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        ClassifierConfig {
            safe_age_threshold_days: 30,
            caution_age_threshold_days: 7,
            large_file_threshold: 100 * 1024 * 1024,
            system_critical_paths: to_strings(&[
                "/system/",
                "/usr/",
                "/var/log/",
                "/library/logs/",
                "/applications/",
                "/bin/",
                "/sbin/",
                "/system/library/",
                "/private/var/db/",
                "/private/var/run/",
            ]),
            temp_dir_patterns: to_strings(&[
                "/tmp/",
                "/var/tmp/",
                "/library/caches/",
                "/private/var/folders/",
                "temp",
                "tmp",
                "cache",
            ]),
            dev_cache_patterns: to_strings(&[
                "node_modules",
                ".git",
                "build/",
                "dist/",
                "target/",
                ".gradle",
                ".m2/",
            ]),
        }
    }
}

impl ClassifierConfig {
    pub fn from_settings(settings: &SafetySettings) -> Self {
        let mut config = ClassifierConfig {
            safe_age_threshold_days: i64::from(settings.safe_age_threshold_days),
            caution_age_threshold_days: i64::from(settings.caution_age_threshold_days),
            large_file_threshold: settings.large_file_threshold_mb.saturating_mul(1024 * 1024),
            ..ClassifierConfig::default()
        };
        if !settings.protect_system_paths {
            config.system_critical_paths.clear();
        }
        config
    }
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| item.to_string()).collect()
}

/// Scores a file's deletion risk from its metadata alone.
#[derive(Debug, Clone, Default)]
pub struct SafetyClassifier {
    config: ClassifierConfig,
}

impl SafetyClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        SafetyClassifier { config }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Whether `path` matches one of the configured system-critical patterns.
    pub fn is_system_critical(&self, path: &Path) -> bool {
        PathContext::new(path).contains_any(&self.config.system_critical_paths)
    }

    pub fn classify(&self, file: &FileMetadata) -> SafetyClassification {
        self.classify_at(file, Utc::now())
    }

    /// Classify relative to `now`. Identical inputs give identical output.
    pub fn classify_at(&self, file: &FileMetadata, now: DateTime<Utc>) -> SafetyClassification {
        let cfg = &self.config;
        let ctx = PathContext::new(&file.path);
        let mut confidence = BASE_CONFIDENCE;
        let mut reasons = Vec::new();
        let mut level: Option<SafetyLevel> = None;

        let age = now.signed_duration_since(file.modified);
        let age_days = age.num_days();
        if age > Duration::days(cfg.safe_age_threshold_days) {
            confidence += 20;
            reasons.push(format!(
                "File is {} days old (safe threshold: {} days)",
                age_days, cfg.safe_age_threshold_days
            ));
        } else if age < Duration::days(cfg.caution_age_threshold_days) {
            confidence -= 15;
            reasons.push(format!(
                "File is recent ({} days old, caution threshold: {} days)",
                age_days, cfg.caution_age_threshold_days
            ));
        }

        if file.size > cfg.large_file_threshold {
            confidence -= 10;
            reasons.push(format!(
                "Large file size: {:.2} MB (threshold: {:.2} MB)",
                file.size as f64 / (1024.0 * 1024.0),
                cfg.large_file_threshold as f64 / (1024.0 * 1024.0)
            ));
        } else if file.size < SMALL_FILE_BYTES {
            confidence += 5;
            reasons.push("Very small file size, likely safe to delete".to_string());
        }

        if ctx.contains_any(&cfg.system_critical_paths) {
            confidence -= 30;
            level = Some(SafetyLevel::Risky);
            reasons.push("Located in system-critical directory".to_string());
        }

        if ctx.contains_any(&cfg.temp_dir_patterns) {
            confidence += 25;
            if level != Some(SafetyLevel::Risky) {
                level = Some(SafetyLevel::Safe);
            }
            reasons.push("Located in temporary directory".to_string());
        }

        if ctx.contains_any(&cfg.dev_cache_patterns) {
            confidence -= 5;
            if level != Some(SafetyLevel::Risky) {
                level = Some(SafetyLevel::Caution);
            }
            reasons.push("Development cache detected".to_string());
        }

        if file.permissions.contains("r--") && !file.permissions.contains("rw") {
            confidence -= 5;
            reasons.push("Read-only file, may be system-critical".to_string());
        }

        let confidence = confidence.clamp(0, 100);
        let level = level.unwrap_or(if confidence >= SAFE_CONFIDENCE {
            SafetyLevel::Safe
        } else if confidence >= CAUTION_CONFIDENCE {
            SafetyLevel::Caution
        } else {
            SafetyLevel::Risky
        });
        let confidence = confidence as u8;

        SafetyClassification {
            level,
            confidence,
            explanation: explain(level, confidence, &reasons),
            reasons,
        }
    }

    pub fn classify_path(&self, path: &Path) -> CleanerResult<SafetyClassification> {
        let metadata = FileMetadata::read(path)?;
        Ok(self.classify(&metadata))
    }

    pub fn classify_all(
        &self,
        files: &[FileMetadata],
        now: DateTime<Utc>,
    ) -> BTreeMap<PathBuf, SafetyClassification> {
        files
            .iter()
            .map(|file| (file.path.clone(), self.classify_at(file, now)))
            .collect()
    }
}

fn explain(level: SafetyLevel, confidence: u8, reasons: &[String]) -> String {
    let (lead, tail) = match level {
        SafetyLevel::Safe => (
            "classified as SAFE to delete",
            "It appears to be a temporary or cache file that can be safely removed without affecting system functionality.",
        ),
        SafetyLevel::Caution => (
            "classified as requiring CAUTION",
            "Review the file details before deletion as it may contain important data or be recently used.",
        ),
        SafetyLevel::Risky => (
            "classified as RISKY to delete",
            "This file appears to be in a system-critical location or may contain important data. Deletion is not recommended.",
        ),
    };
    let mut text = format!("This file is {lead} with {confidence}% confidence. ");
    if !reasons.is_empty() {
        let shown = &reasons[..reasons.len().min(MAX_EXPLAINED_REASONS)];
        text.push_str("Key factors: ");
        text.push_str(&shown.join("; "));
        text.push_str(". ");
    }
    text.push_str(tail);
    text
}

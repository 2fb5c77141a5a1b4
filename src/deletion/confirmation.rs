use std::sync::Arc;

use bytesize::ByteSize;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::types::{DeletionRequest, SafetyCheckResult};
use crate::error::{CleanerError, CleanerResult};

const DIALOG_LIFETIME_MINUTES: i64 = 5;
const MAX_LISTED_FILES: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationDialog {
    pub id: String,
    pub title: String,
    pub message: String,
    pub details: Vec<String>,
    pub warnings: Vec<String>,
    pub file_count: usize,
    pub total_size: u64,
    pub operation: String,
    pub high_risk: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// The request this dialog asks the user to approve.
    pub request: DeletionRequest,
}

impl ConfirmationDialog {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationResult {
    pub confirmed: bool,
    #[serde(default)]
    pub force_delete: bool,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ConfirmationResult {
    pub fn confirmed() -> Self {
        ConfirmationResult {
            confirmed: true,
            ..Self::default()
        }
    }

    pub fn declined(reason: impl Into<String>) -> Self {
        ConfirmationResult {
            confirmed: false,
            reason: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn with_force(mut self, force_delete: bool) -> Self {
        self.force_delete = force_delete;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationStats {
    pub total_dialogs: usize,
    pub active_dialogs: usize,
    pub expired_dialogs: usize,
}

/// Pending confirmation dialogs keyed by id.
#[derive(Clone, Default)]
pub struct ConfirmationService {
    dialogs: Arc<DashMap<String, ConfirmationDialog>>,
}

impl ConfirmationService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_dialog(&self, request: &DeletionRequest, check: &SafetyCheckResult) -> ConfirmationDialog {
        self.create_dialog_at(request, check, Utc::now())
    }

    pub fn create_dialog_at(
        &self,
        request: &DeletionRequest,
        check: &SafetyCheckResult,
        now: DateTime<Utc>,
    ) -> ConfirmationDialog {
        let files: Vec<String> = request
            .files
            .iter()
            .map(|path| path.display().to_string())
            .collect();
        let count = files.len();
        let size = ByteSize(check.total_size);
        let high_risk = check.is_high_risk();

        let mut warnings = check.warnings.clone();
        if !check.risky_files.is_empty() {
            warnings.push(format!(
                "{} risky files detected that may cause system issues",
                check.risky_files.len()
            ));
        }
        if !check.blocked_files.is_empty() {
            warnings.push(format!(
                "{} files blocked due to safety concerns",
                check.blocked_files.len()
            ));
        }

        let (title, message) = if high_risk {
            let mut lead = vec![
                "HIGH RISK OPERATION".to_string(),
                "Some files may be system-critical or important".to_string(),
                "This operation requires explicit confirmation".to_string(),
            ];
            lead.append(&mut warnings);
            warnings = lead;
            (
                format!("HIGH RISK: {} ({} files)", title_case(&request.operation), count),
                format!(
                    "WARNING: You are about to delete {} files ({}) that have been flagged as potentially risky or system-critical.",
                    count, size
                ),
            )
        } else {
            (title_for(&request.operation, count), message_for(&request.operation, count, size))
        };

        let dialog = ConfirmationDialog {
            id: format!("confirm_{}", uuid::Uuid::new_v4()),
            title,
            message,
            details: details_for(&files, size),
            warnings,
            file_count: count,
            total_size: check.total_size,
            operation: request.operation.clone(),
            high_risk,
            created_at: now,
            expires_at: now + Duration::minutes(DIALOG_LIFETIME_MINUTES),
            request: request.clone(),
        };
        self.dialogs.insert(dialog.id.clone(), dialog.clone());
        dialog
    }

    /// A live dialog. Expired dialogs are dropped on lookup.
    pub fn get_dialog(&self, id: &str) -> CleanerResult<ConfirmationDialog> {
        self.get_dialog_at(id, Utc::now())
    }

    pub fn get_dialog_at(&self, id: &str, now: DateTime<Utc>) -> CleanerResult<ConfirmationDialog> {
        let dialog = self
            .dialogs
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CleanerError::not_found("confirmation dialog", id))?;
        if dialog.is_expired_at(now) {
            self.dialogs.remove(id);
            return Err(CleanerError::ValidationFailed(
                "confirmation dialog has expired".to_string(),
            ));
        }
        Ok(dialog)
    }

    pub fn validate_confirmation(
        &self,
        id: &str,
        result: &ConfirmationResult,
    ) -> CleanerResult<ConfirmationDialog> {
        self.validate_confirmation_at(id, result, Utc::now())
    }

    pub fn validate_confirmation_at(
        &self,
        id: &str,
        result: &ConfirmationResult,
        now: DateTime<Utc>,
    ) -> CleanerResult<ConfirmationDialog> {
        let dialog = self.get_dialog_at(id, now)?;
        if !result.confirmed {
            return Err(CleanerError::ValidationFailed(
                "operation not confirmed".to_string(),
            ));
        }
        if dialog.high_risk && !result.force_delete {
            return Err(CleanerError::SafetyBlocked(
                "high-risk operation requires force delete confirmation".to_string(),
            ));
        }
        Ok(dialog)
    }

    pub fn remove(&self, id: &str) -> bool {
        self.dialogs.remove(id).is_some()
    }

    pub fn cleanup_expired(&self) -> usize {
        self.cleanup_expired_at(Utc::now())
    }

    pub fn cleanup_expired_at(&self, now: DateTime<Utc>) -> usize {
        let before = self.dialogs.len();
        self.dialogs.retain(|_, dialog| !dialog.is_expired_at(now));
        before - self.dialogs.len()
    }

    pub fn stats(&self) -> ConfirmationStats {
        let now = Utc::now();
        let expired = self
            .dialogs
            .iter()
            .filter(|entry| entry.value().is_expired_at(now))
            .count();
        ConfirmationStats {
            total_dialogs: self.dialogs.len(),
            active_dialogs: self.dialogs.len() - expired,
            expired_dialogs: expired,
        }
    }
}

fn title_for(operation: &str, count: usize) -> String {
    match operation {
        "cache_cleanup" => format!("Clean Cache Files ({} files)", count),
        "manual_deletion" => format!("Delete Selected Files ({} files)", count),
        "bulk_deletion" => format!("Bulk Delete Files ({} files)", count),
        "system_cleanup" => format!("System Cleanup ({} files)", count),
        _ => format!("Delete Files ({} files)", count),
    }
}

fn message_for(operation: &str, count: usize, size: ByteSize) -> String {
    let lead = format!("You are about to delete {} files ({}).", count, size);
    let tail = match operation {
        "cache_cleanup" => "This will clean up cache files to free up disk space.",
        "manual_deletion" => "These files were manually selected for deletion.",
        "bulk_deletion" => "This is a bulk deletion operation.",
        "system_cleanup" => "This will clean up system files.",
        _ => "",
    };
    if tail.is_empty() {
        format!("{} A backup will be created before deletion.", lead)
    } else {
        format!("{} {} A backup will be created before deletion.", lead, tail)
    }
}

fn details_for(files: &[String], size: ByteSize) -> Vec<String> {
    let mut details = vec![
        format!("Total files: {}", files.len()),
        format!("Total size: {}", size),
        String::new(),
        "Safety measures:".to_string(),
        "- A backup will be created before deletion".to_string(),
        "- Files can be restored from backup if needed".to_string(),
        "- System critical files are protected".to_string(),
        String::new(),
        "Files to be deleted:".to_string(),
    ];
    details.extend(
        files
            .iter()
            .take(MAX_LISTED_FILES)
            .map(|file| format!("- {}", file)),
    );
    if files.len() > MAX_LISTED_FILES {
        details.push(format!("- ... and {} more files", files.len() - MAX_LISTED_FILES));
    }
    details
}

// "cache_cleanup" -> "Cache Cleanup"
fn title_case(operation: &str) -> String {
    operation
        .split(|c: char| c == '_' || c.is_whitespace())
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

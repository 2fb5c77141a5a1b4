use std::fs::{self, Metadata};
use std::path::{Path, PathBuf};

use super::types::{BlockReason, BlockedFile, DeletionRequest, SafetyCheckResult};
use crate::backup::path_size;
use crate::error::{CleanerError, CleanerResult};
use crate::safety::{critical_prefix_for, FileMetadata, SafetyClassifier, SafetyLevel};

/// Reject requests that cannot be checked at all.
pub(crate) fn check_shape(request: &DeletionRequest) -> CleanerResult<()> {
    for path in &request.files {
        if path.as_os_str().is_empty() {
            return Err(CleanerError::ValidationFailed(
                "request contains an empty path".to_string(),
            ));
        }
        if !path.is_absolute() {
            return Err(CleanerError::ValidationFailed(format!(
                "path must be absolute: {}",
                path.display()
            )));
        }
    }
    Ok(())
}

/// Per-path gate, in order: existence, write permission, classification
/// (unless forced), then the system-critical check that force cannot lift.
pub(crate) fn check_request(classifier: &SafetyClassifier, request: &DeletionRequest) -> SafetyCheckResult {
    let mut result = SafetyCheckResult {
        is_safe: true,
        ..SafetyCheckResult::default()
    };

    for path in &request.files {
        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(_) => {
                block(&mut result, path, BlockReason::NotFound, format!("File not found: {}", path.display()));
                continue;
            }
        };

        if !is_writable(&metadata) || !parent_is_writable(path) {
            block(
                &mut result,
                path,
                BlockReason::InsufficientPermissions,
                format!("Insufficient permissions: {}", path.display()),
            );
            continue;
        }

        let level = if request.force_delete {
            None
        } else {
            Some(classifier.classify(&FileMetadata::from_fs(path, &metadata)).level)
        };

        if let Some(message) = critical_reason(classifier, path) {
            block(&mut result, path, BlockReason::SystemCritical, message);
            result.is_safe = false;
            continue;
        }

        match level {
            Some(SafetyLevel::Risky) => {
                result.warnings.push(format!("Risky file detected: {}", path.display()));
                result.risky_files.push(path.clone());
                result.is_safe = false;
            }
            Some(SafetyLevel::Caution) => {
                result.warnings.push(format!("Caution file detected: {}", path.display()));
                result.safe_files.push(path.clone());
            }
            Some(SafetyLevel::Safe) | None => result.safe_files.push(path.clone()),
        }
        result.total_size += if metadata.is_dir() { path_size(path) } else { metadata.len() };
    }

    result
}

/// Checks the path as written and, when a parent is a symlink, where it
/// actually lands.
fn critical_reason(classifier: &SafetyClassifier, path: &Path) -> Option<String> {
    let resolved = resolve_parent(path);
    std::iter::once(path)
        .chain(resolved.as_deref().filter(|resolved| *resolved != path))
        .find_map(|candidate| critical_hit(classifier, path, candidate))
}

fn critical_hit(classifier: &SafetyClassifier, requested: &Path, candidate: &Path) -> Option<String> {
    if let Some(prefix) = critical_prefix_for(candidate) {
        return Some(format!(
            "System critical file blocked: {} (under {})",
            requested.display(),
            prefix
        ));
    }
    classifier
        .is_system_critical(candidate)
        .then(|| format!("System critical file blocked: {}", requested.display()))
}

fn resolve_parent(path: &Path) -> Option<PathBuf> {
    let parent = fs::canonicalize(path.parent()?).ok()?;
    Some(match path.file_name() {
        Some(name) => parent.join(name),
        None => parent,
    })
}

fn block(result: &mut SafetyCheckResult, path: &Path, reason: BlockReason, message: String) {
    result.warnings.push(message.clone());
    result.blocked_files.push(BlockedFile {
        path: path.to_path_buf(),
        reason,
        message,
    });
}

fn parent_is_writable(path: &Path) -> bool {
    path.parent()
        .and_then(|parent| fs::metadata(parent).ok())
        .map_or(false, |metadata| is_writable(&metadata))
}

// Mode bits only; the effective uid is not consulted.
#[cfg(unix)]
fn is_writable(metadata: &Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o200 != 0
}

#[cfg(not(unix))]
fn is_writable(metadata: &Metadata) -> bool {
    !metadata.permissions().readonly()
}

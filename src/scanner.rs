mod types;

#[cfg(test)]
mod tests;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::json;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

pub use types::{CacheFile, CacheLocation, ScanProgress, ScanResult};

use crate::config::{LocationSpec, PerformanceSettings};
use crate::error::{CleanerError, CleanerResult};
use crate::logging::OperationLogger;
use crate::ops::{estimate_remaining, percent, CancelSlot, InFlight, ProgressQueue};
use crate::safety::SafetyClassifier;

/// Walks cache locations and classifies what it finds.
pub struct CacheScanner {
    classifier: Arc<SafetyClassifier>,
    performance: PerformanceSettings,
    logger: Arc<dyn OperationLogger>,
    scanning: InFlight,
    stop: CancelSlot,
    progress: ProgressQueue<ScanProgress>,
}

impl CacheScanner {
    pub fn new(
        classifier: Arc<SafetyClassifier>,
        performance: PerformanceSettings,
        logger: Arc<dyn OperationLogger>,
    ) -> Self {
        CacheScanner {
            classifier,
            performance,
            logger,
            scanning: InFlight::new("scan"),
            stop: CancelSlot::default(),
            progress: ProgressQueue::default(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanProgress> {
        self.progress.subscribe()
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.is_active()
    }

    /// Ask the running scan to stop. Ignored when nothing is scanning.
    pub fn stop_scan(&self) -> bool {
        self.stop.cancel()
    }

    pub async fn scan_location(&self, id: &str, name: &str, path: &str) -> CleanerResult<CacheLocation> {
        self.scan_location_with_cancel(&LocationSpec::new(id, name, path), None)
            .await
    }

    pub async fn scan_location_with_cancel(
        &self,
        spec: &LocationSpec,
        cancel: Option<&CancellationToken>,
    ) -> CleanerResult<CacheLocation> {
        let _guard = self.scanning.try_begin()?;
        let token = self.stop.arm(cancel);
        let result = self.scan_one(spec.clone(), token).await;
        self.stop.disarm();
        result
    }

    /// Scan every location, aggregating totals. Per-location failures are
    /// collected into `errors` rather than failing the batch.
    pub async fn scan_multiple_locations(&self, locations: &[LocationSpec]) -> CleanerResult<ScanResult> {
        let _guard = self.scanning.try_begin()?;
        let token = self.stop.arm(None);
        let started = Instant::now();

        self.logger.info(
            "Starting multi-location scan",
            json!({ "operation": "scan", "locations": locations.len() }),
        );
        let outcomes = self.fan_out(locations, &token).await;
        self.stop.disarm();

        let mut result = ScanResult {
            total_locations: locations.len(),
            ..ScanResult::default()
        };
        for (spec, outcome) in locations.iter().zip(outcomes) {
            match outcome {
                Ok(location) => {
                    result.total_size += location.total_size;
                    result.total_files += location.file_count;
                    result.total_dirs += location.dir_count;
                    if let Some(err) = &location.error {
                        result.errors.push(format!("{}: {}", location.name, err));
                    }
                    result.locations.push(location);
                }
                Err(err) => result.errors.push(format!("{}: {}", spec.name, err)),
            }
        }
        result.scan_duration_ms = started.elapsed().as_millis() as u64;

        self.logger.info(
            "Multi-location scan finished",
            json!({
                "operation": "scan",
                "files": result.total_files,
                "dirs": result.total_dirs,
                "bytes": result.total_size,
                "errors": result.errors.len(),
            }),
        );
        Ok(result)
    }

    #[cfg(feature = "parallel-scan")]
    async fn fan_out(
        &self,
        locations: &[LocationSpec],
        token: &CancellationToken,
    ) -> Vec<CleanerResult<CacheLocation>> {
        let permits = Arc::new(tokio::sync::Semaphore::new(
            self.performance.concurrent_scans.max(1),
        ));
        let scans = locations.iter().cloned().map(|spec| {
            let permits = Arc::clone(&permits);
            let token = token.clone();
            async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|err| CleanerError::Task(err.to_string()))?;
                self.scan_one(spec, token).await
            }
        });
        futures::future::join_all(scans).await
    }

    #[cfg(not(feature = "parallel-scan"))]
    async fn fan_out(
        &self,
        locations: &[LocationSpec],
        token: &CancellationToken,
    ) -> Vec<CleanerResult<CacheLocation>> {
        let mut outcomes = Vec::with_capacity(locations.len());
        for spec in locations.iter().cloned() {
            outcomes.push(self.scan_one(spec, token.clone()).await);
        }
        outcomes
    }

    async fn scan_one(&self, spec: LocationSpec, token: CancellationToken) -> CleanerResult<CacheLocation> {
        let job = WalkJob {
            spec,
            token,
            classifier: Arc::clone(&self.classifier),
            progress: self.progress.clone(),
            timeout: scan_timeout(&self.performance),
            use_access_time: self.performance.use_access_time,
        };
        let location = tokio::task::spawn_blocking(move || job.run()).await?;

        let context = json!({
            "operation": "scan",
            "location": location.id,
            "files": location.file_count,
            "dirs": location.dir_count,
            "bytes": location.total_size,
            "duration_ms": location.scan_duration_ms,
        });
        match &location.error {
            Some(err) => self.logger.warn(&format!("Scan of {} incomplete: {}", location.name, err), context),
            None => self.logger.info(&format!("Scanned {}", location.name), context),
        }
        Ok(location)
    }
}

struct WalkJob {
    spec: LocationSpec,
    token: CancellationToken,
    classifier: Arc<SafetyClassifier>,
    progress: ProgressQueue<ScanProgress>,
    timeout: Duration,
    use_access_time: bool,
}

impl WalkJob {
    fn run(self) -> CacheLocation {
        let started = Instant::now();
        let root = expand_tilde(&self.spec.path);
        let mut location = CacheLocation::new(&self.spec.id, &self.spec.name, root.clone());

        if !root.exists() {
            location.error = Some(format!("Path does not exist: {}", root.display()));
            location.scan_duration_ms = started.elapsed().as_millis() as u64;
            return location;
        }

        // The root is reported only when it is a plain file.
        let min_depth = if root.is_dir() { 1 } else { 0 };
        let total = count_entries(&root, min_depth, &self.token, started, self.timeout);
        let now = Utc::now();
        let mut scanned = 0u64;

        for entry in WalkDir::new(&root).min_depth(min_depth) {
            if self.token.is_cancelled() {
                location.error = Some("scan stopped by user".to_string());
                break;
            }
            if started.elapsed() >= self.timeout {
                location.error = Some(format!("scan timed out after {}s", self.timeout.as_secs()));
                break;
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    let path = err.path().map(Path::to_path_buf).unwrap_or_else(|| root.clone());
                    // an unreadable directory is yielded once as an entry, then again as the error
                    match location.files.iter_mut().rev().find(|file| file.path == path) {
                        Some(file) => file.error = Some(err.to_string()),
                        None => location.files.push(CacheFile::failed(&path, err.to_string())),
                    }
                    continue;
                }
            };
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(err) => {
                    location.files.push(CacheFile::failed(entry.path(), err.to_string()));
                    continue;
                }
            };

            let mut file = CacheFile::from_metadata(entry.path(), &metadata, self.use_access_time);
            if file.is_dir {
                location.dir_count += 1;
            } else {
                location.file_count += 1;
                location.total_size += file.size;
                file.safety_classification =
                    Some(self.classifier.classify_at(&file.to_file_metadata(), now));
            }
            location.files.push(file);
            scanned += 1;

            let elapsed = started.elapsed();
            self.progress.publish(ScanProgress {
                location_id: self.spec.id.clone(),
                location_name: self.spec.name.clone(),
                current_path: entry.path().display().to_string(),
                files_scanned: scanned,
                total_files: total,
                progress: percent(scanned, total),
                elapsed_ms: elapsed.as_millis() as u64,
                estimated_remaining_ms: estimate_remaining(elapsed, scanned, total)
                    .map(|eta| eta.as_millis() as u64),
            });
        }

        location.scan_duration_ms = started.elapsed().as_millis() as u64;
        location
    }
}

fn scan_timeout(performance: &PerformanceSettings) -> Duration {
    Duration::from_secs(performance.scan_timeout_seconds.max(1))
}

/// Entry count for progress reporting. Stops early on cancellation or once
/// `timeout` has elapsed since `started`.
fn count_entries(
    root: &Path,
    min_depth: usize,
    token: &CancellationToken,
    started: Instant,
    timeout: Duration,
) -> u64 {
    let mut count = 0u64;
    for _ in WalkDir::new(root).min_depth(min_depth).into_iter().flatten() {
        if token.is_cancelled() || started.elapsed() >= timeout {
            break;
        }
        count += 1;
    }
    count
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

use std::fs;
use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::config::{LocationSpec, PerformanceSettings};
use crate::logging::LogCrateLogger;
use crate::safety::SafetyLevel;

fn scanner() -> CacheScanner {
    CacheScanner::new(
        Arc::new(SafetyClassifier::default()),
        PerformanceSettings::default(),
        Arc::new(LogCrateLogger),
    )
}

// 3 nested directories holding 4 files
fn build_tree(root: &Path) {
    let nested = root.join("a/b/c");
    fs::create_dir_all(&nested).unwrap();
    fs::write(root.join("top.tmp"), b"0123456789").unwrap();
    fs::write(root.join("a/one.bin"), b"1").unwrap();
    fs::write(root.join("a/b/two.bin"), b"22").unwrap();
    fs::write(nested.join("three.bin"), b"333").unwrap();
}

#[tokio::test]
async fn scan_counts_files_and_nested_dirs() {
    let temp_dir = TempDir::new().unwrap();
    build_tree(temp_dir.path());

    let location = scanner()
        .scan_location("loc", "Test", temp_dir.path().to_str().unwrap())
        .await
        .unwrap();

    assert_eq!(location.file_count, 4);
    assert_eq!(location.dir_count, 3);
    assert_eq!(location.files.len(), 7);
    assert_eq!(location.total_size, 16);
    assert!(location.error.is_none());

    for file in &location.files {
        assert_eq!(file.is_dir, file.safety_classification.is_none());
        assert_eq!(file.last_accessed, file.last_modified);
    }
    assert_eq!(location.safety_summary().total_files, 4);
}

#[tokio::test]
async fn missing_path_sets_location_error() {
    let location = scanner()
        .scan_location("missing", "Missing", "/no/such/dir")
        .await
        .unwrap();

    let error = location.error.unwrap();
    assert!(error.contains("Path does not exist"));
    assert!(location.files.is_empty());
}

#[tokio::test]
async fn single_file_root_is_reported() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("lonely.tmp");
    fs::write(&file, b"abc").unwrap();

    let location = scanner()
        .scan_location("file", "File", file.to_str().unwrap())
        .await
        .unwrap();
    assert_eq!(location.file_count, 1);
    assert_eq!(location.files[0].level(), Some(SafetyLevel::Safe));
}

#[tokio::test]
async fn cancelled_scan_returns_partial_location() {
    let temp_dir = TempDir::new().unwrap();
    build_tree(temp_dir.path());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let spec = LocationSpec::new("loc", "Test", temp_dir.path().to_str().unwrap());
    let location = scanner()
        .scan_location_with_cancel(&spec, Some(&cancel))
        .await
        .unwrap();

    assert_eq!(location.error.as_deref(), Some("scan stopped by user"));
    assert!(location.files.is_empty());
}

#[tokio::test]
async fn concurrent_scan_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    build_tree(temp_dir.path());
    let path = temp_dir.path().to_str().unwrap().to_string();
    let scanner = scanner();

    let (first, second) = tokio::join!(
        scanner.scan_location("a", "A", &path),
        scanner.scan_location("b", "B", &path),
    );
    assert!(first.is_ok());
    assert!(second.unwrap_err().is_already_in_progress());
    assert!(!scanner.is_scanning());
    assert!(!scanner.stop_scan());
}

#[tokio::test]
async fn progress_updates_reach_subscribers() {
    let temp_dir = TempDir::new().unwrap();
    build_tree(temp_dir.path());
    let scanner = scanner();
    let mut rx = scanner.subscribe();

    scanner
        .scan_location("loc", "Test", temp_dir.path().to_str().unwrap())
        .await
        .unwrap();

    let mut last = None;
    while let Ok(update) = rx.try_recv() {
        last = Some(update);
    }
    let last = last.unwrap();
    assert_eq!(last.files_scanned, 7);
    assert_eq!(last.total_files, 7);
    assert_eq!(last.progress, 100.0);
}

#[tokio::test]
async fn multiple_locations_aggregate_and_collect_errors() {
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();
    build_tree(first.path());
    fs::write(second.path().join("x.tmp"), b"12345").unwrap();

    let locations = vec![
        LocationSpec::new("one", "One", first.path().to_str().unwrap()),
        LocationSpec::new("missing", "Missing", "/no/such/dir"),
        LocationSpec::new("two", "Two", second.path().to_str().unwrap()),
    ];
    let result = scanner().scan_multiple_locations(&locations).await.unwrap();

    assert_eq!(result.total_locations, 3);
    assert_eq!(result.total_files, 5);
    assert_eq!(result.total_dirs, 3);
    assert_eq!(result.total_size, 21);
    assert_eq!(result.errors.len(), 1);
    let ids: Vec<_> = result.locations.iter().map(|l| l.id.as_str()).collect();
    assert_eq!(ids, vec!["one", "missing", "two"]);
}

#[test]
fn tilde_expands_to_home() {
    let home = dirs::home_dir().unwrap();
    assert_eq!(expand_tilde("~/Library/Caches"), home.join("Library/Caches"));
    assert_eq!(expand_tilde("/abs/path"), std::path::PathBuf::from("/abs/path"));
}

fn walk_job(root: &Path, timeout: Duration) -> WalkJob {
    WalkJob {
        spec: LocationSpec::new("loc", "Test", root.to_str().unwrap()),
        token: CancellationToken::new(),
        classifier: Arc::new(SafetyClassifier::default()),
        progress: ProgressQueue::default(),
        timeout,
        use_access_time: false,
    }
}

#[test]
fn expired_timeout_stops_the_walk() {
    let temp_dir = TempDir::new().unwrap();
    build_tree(temp_dir.path());

    let location = walk_job(temp_dir.path(), Duration::ZERO).run();

    assert_eq!(location.error.as_deref(), Some("scan timed out after 0s"));
    assert!(location.files.len() < 7);
    assert_eq!(location.files.len() as u64, location.file_count + location.dir_count);
}

#[test]
fn counting_pass_honours_the_timeout() {
    let temp_dir = TempDir::new().unwrap();
    build_tree(temp_dir.path());
    let token = CancellationToken::new();

    assert_eq!(count_entries(temp_dir.path(), 1, &token, Instant::now(), Duration::ZERO), 0);
    assert_eq!(
        count_entries(temp_dir.path(), 1, &token, Instant::now(), Duration::from_secs(60)),
        7
    );
}

#[test]
fn configured_timeout_has_a_one_second_floor() {
    let performance = PerformanceSettings {
        scan_timeout_seconds: 0,
        ..PerformanceSettings::default()
    };
    assert_eq!(scan_timeout(&performance), Duration::from_secs(1));
}

#[cfg(unix)]
#[tokio::test]
async fn unreadable_directory_is_recorded_once_and_scan_continues() {
    use std::os::unix::fs::PermissionsExt;

    let temp_dir = TempDir::new().unwrap();
    build_tree(temp_dir.path());
    let locked = temp_dir.path().join("locked");
    fs::create_dir(&locked).unwrap();
    fs::write(locked.join("hidden.bin"), b"h").unwrap();
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
    if fs::read_dir(&locked).is_ok() {
        // running with privileges that ignore mode bits
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        return;
    }

    let location = scanner()
        .scan_location("loc", "Test", temp_dir.path().to_str().unwrap())
        .await;
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
    let location = location.unwrap();

    assert!(location.error.is_none());
    assert_eq!(location.file_count, 4);
    assert_eq!(location.dir_count, 4);
    assert_eq!(location.files.len(), 8);
    let failed: Vec<_> = location.failed_entries().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].path, locked);
    assert!(failed[0].is_dir);
}

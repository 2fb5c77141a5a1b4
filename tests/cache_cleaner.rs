use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use cache_cleaner_lib::notify::{Notification, NotificationLevel, NotificationSink};
use cache_cleaner_lib::{
    CleanerError, CleanerSystem, ConfirmationResult, DeletionRequest, DeletionStatus, LocationSpec,
    OperationStatus, RestoreRequest, Settings,
};
use tempfile::TempDir;

struct CleanerTestEnv {
    temp: TempDir,
    cache_dir: PathBuf,
}

impl CleanerTestEnv {
    fn new() -> Self {
        let temp = TempDir::new().expect("temp dir");
        let cache_dir = temp.path().join("Caches");
        fs::create_dir_all(&cache_dir).expect("create cache dir");
        CleanerTestEnv { temp, cache_dir }
    }

    fn write(&self, relative: &str, contents: &[u8]) -> PathBuf {
        let path = self.cache_dir.join(relative);
        fs::create_dir_all(path.parent().expect("parent")).expect("create parent");
        fs::write(&path, contents).expect("write cache file");
        path
    }

    fn system(&self) -> CleanerSystem {
        self.system_with(None)
    }

    fn system_with(&self, notifier: Option<Arc<dyn NotificationSink>>) -> CleanerSystem {
        let mut builder = CleanerSystem::builder().backup_root(self.temp.path().join("Backups"));
        if let Some(notifier) = notifier {
            builder = builder.notifier(notifier);
        }
        builder.build().expect("build cleaner system")
    }

    fn cache_path(&self) -> &str {
        self.cache_dir.to_str().expect("utf-8 temp path")
    }
}

#[derive(Default)]
struct CollectingSink(Mutex<Vec<Notification>>);

impl NotificationSink for CollectingSink {
    fn notify(&self, notification: &Notification) -> Result<(), String> {
        self.0.lock().expect("sink lock").push(notification.clone());
        Ok(())
    }
}

fn scanned_files(location: &cache_cleaner_lib::CacheLocation) -> Vec<PathBuf> {
    location
        .files
        .iter()
        .filter(|file| !file.is_dir && file.error.is_none())
        .map(|file| file.path.clone())
        .collect()
}

#[tokio::test]
async fn scan_delete_and_restore_round_trip() {
    let env = CleanerTestEnv::new();
    let contents: [(&str, &[u8]); 3] = [
        ("app/one.cache", b"first cache blob".as_slice()),
        ("app/two.cache", b"second".as_slice()),
        ("three.log", b"third entry".as_slice()),
    ];
    for (name, bytes) in &contents {
        env.write(name, bytes);
    }
    let system = env.system();

    let location = system
        .scan_location("caches", "Caches", env.cache_path())
        .await
        .expect("scan caches");
    assert_eq!(location.file_count, 3);
    assert!(location.files.iter().all(|file| file.safety_classification.is_some()));

    let mut files = scanned_files(&location);
    files.sort();
    let result = system
        .delete_files_with_backup(&DeletionRequest::new(files.clone(), "cache_cleanup"))
        .await
        .expect("delete with backup");
    assert_eq!(result.status, DeletionStatus::Completed);
    assert_eq!(result.deleted_count, 3);
    assert!(files.iter().all(|path| !path.exists()));
    assert!(system.verify_deletion(&result).await.expect("verify deletion").is_empty());

    let session_id = result.backup_session_id.clone().expect("backup session");
    let report = system
        .verify_backup_integrity(&session_id)
        .await
        .expect("verify integrity");
    assert!(report.valid, "{:?}", report.errors);

    let restored = system
        .restore_session(&session_id, true)
        .await
        .expect("restore session");
    assert_eq!(restored.success_count, 3);
    for (name, bytes) in &contents {
        let path = env.cache_dir.join(name);
        assert_eq!(fs::read(&path).expect("restored file"), *bytes);
    }

    let history = system.deletion_history();
    assert!(history.iter().any(|entry| entry.message == "Deletion operation completed"));
}

#[tokio::test]
async fn spawned_deletion_reports_through_progress() {
    let env = CleanerTestEnv::new();
    let files = vec![env.write("a.cache", b"aaaa"), env.write("b.cache", b"bb")];
    let system = env.system();

    let handle = system
        .spawn_deletion(DeletionRequest::new(files.clone(), "bulk_deletion"))
        .expect("spawn deletion");
    let id = handle.id().to_string();
    let result = handle.wait().await.expect("deletion result");

    assert_eq!(result.operation_id, id);
    assert_eq!(result.deleted_size, 6);
    let snapshot = system.get_progress(&id).expect("tracker still registered");
    assert_eq!(snapshot.status, OperationStatus::Completed);
    assert_eq!(snapshot.total_files, 2);

    let missing = system.get_progress("deletion_unknown").unwrap_err();
    assert!(missing.is_not_found());
}

#[tokio::test]
async fn high_risk_deletion_requires_forced_confirmation() {
    let env = CleanerTestEnv::new();
    let present = env.write("keep-or-drop.cache", b"data");
    let vanished = env.cache_dir.join("vanished.cache");
    let sink = Arc::new(CollectingSink::default());
    let system = env.system_with(Some(sink.clone()));
    let request = DeletionRequest::new(vec![present.clone(), vanished.clone()], "manual_deletion");

    let dialog = system.prepare_deletion(&request).await.expect("prepare deletion");
    assert!(dialog.high_risk);
    assert_eq!(dialog.file_count, 2);

    let refused = system
        .confirm_deletion(&dialog.id, &ConfirmationResult::confirmed())
        .err()
        .expect("force acknowledgement required");
    assert!(matches!(refused, CleanerError::SafetyBlocked(_)));
    assert!(present.exists());

    let handle = system
        .confirm_deletion(&dialog.id, &ConfirmationResult::confirmed().with_force(true))
        .expect("confirmed deletion");
    let result = handle.wait().await.expect("deletion result");
    assert_eq!(result.status, DeletionStatus::Completed);
    assert_eq!(result.deleted_files, vec![present.clone()]);
    assert_eq!(result.skipped_files[0].path, vanished);
    assert!(!present.exists());

    // the dialog is single use
    let reused = system
        .confirm_deletion(&dialog.id, &ConfirmationResult::confirmed().with_force(true))
        .err()
        .expect("dialog consumed");
    assert!(reused.is_not_found());

    let seen = sink.0.lock().expect("sink lock");
    assert!(seen.iter().any(|n| n.level == NotificationLevel::Success));
}

#[tokio::test]
async fn forced_deletion_outside_confirmation_is_refused() {
    let env = CleanerTestEnv::new();
    let file = env.write("x.cache", b"x");
    let system = env.system();

    let err = system
        .delete_files_with_backup(&DeletionRequest::new(vec![file.clone()], "manual_deletion").forced(true))
        .await
        .unwrap_err();
    assert!(matches!(err, CleanerError::SafetyBlocked(_)));
    assert!(file.exists());
}

#[tokio::test]
async fn spawned_restore_and_preview() {
    let env = CleanerTestEnv::new();
    let file = env.write("restore-me.cache", b"payload");
    let system = env.system();
    let deleted = system
        .delete_files_with_backup(&DeletionRequest::new(vec![file.clone()], "cache_cleanup"))
        .await
        .expect("delete");
    let session_id = deleted.backup_session_id.expect("session id");

    let preview = system
        .preview_restore(&session_id, None, false)
        .await
        .expect("preview");
    assert_eq!(preview.restorable, vec![file.clone()]);
    assert!(!file.exists());

    let handle = system.spawn_restore(RestoreRequest::files(&session_id, vec![file.clone()], false));
    let id = handle.id().to_string();
    let result = handle.wait().await.expect("restore result");
    assert_eq!(result.restored_files, vec![file.clone()]);
    assert_eq!(fs::read(&file).expect("restored"), b"payload");
    assert_eq!(
        system.get_progress(&id).expect("restore tracker").status,
        OperationStatus::Completed
    );
}

#[tokio::test]
async fn multi_location_scan_keeps_input_order() {
    let env = CleanerTestEnv::new();
    env.write("first/a.bin", b"a");
    env.write("second/b.bin", b"bb");
    let system = env.system();
    let root = env.cache_dir.clone();
    let spec = |id: &str| {
        LocationSpec::new(id, id, root.join(id).to_str().expect("utf-8"))
    };

    let result = system
        .scan_multiple_locations(&[spec("second"), spec("first"), spec("missing")])
        .await
        .expect("multi scan");
    let ids: Vec<_> = result.locations.iter().map(|l| l.id.as_str()).collect();
    assert_eq!(ids, vec!["second", "first", "missing"]);
    assert_eq!(result.total_files, 2);
    assert_eq!(result.total_size, 3);
    assert_eq!(result.errors.len(), 1);
}

#[test]
fn invalid_settings_are_rejected_at_build() {
    let temp = TempDir::new().expect("temp dir");
    let mut settings = Settings::default();
    settings.performance.concurrent_scans = 0;

    let err = CleanerSystem::builder()
        .backup_root(temp.path().join("Backups"))
        .settings(settings)
        .build()
        .err()
        .expect("validation error");
    assert!(matches!(err, CleanerError::ValidationFailed(_)));
}

#[tokio::test]
async fn classify_file_reads_metadata() {
    let env = CleanerTestEnv::new();
    let file = env.write("tiny.tmp", b"t");
    let system = env.system();

    let classification = system.classify_file(&file).expect("classify");
    assert!(classification.confidence <= 100);
    assert!(system.classify_file(Path::new("/no/such/file")).is_err());
}

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Duration, TimeZone, Utc};
use tempfile::TempDir;

use super::*;
use crate::config::SafetySettings;

fn meta(path: &str, size: u64, age_days: i64) -> FileMetadata {
    let now = fixed_now();
    FileMetadata {
        path: PathBuf::from(path),
        size,
        modified: now - Duration::days(age_days),
        is_dir: false,
        permissions: "-rw-r--r--".into(),
    }
}

fn fixed_now() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

#[test]
fn old_small_temp_file_is_safe() {
    let classifier = SafetyClassifier::default();
    let result = classifier.classify_at(&meta("/tmp/x.cache", 50, 45), fixed_now());

    assert_eq!(result.level, SafetyLevel::Safe);
    assert!(result.confidence >= 70);
    assert_eq!(result.confidence, 100);
    assert!(result
        .reasons
        .contains(&"Located in temporary directory".to_string()));
    assert!(result.explanation.starts_with("This file is classified as SAFE"));
}

#[test]
fn system_library_is_risky_regardless_of_age_or_size() {
    let classifier = SafetyClassifier::default();
    for (size, age) in [(10, 400), (500 * 1024 * 1024, 1), (2048, 15)] {
        let result = classifier.classify_at(&meta("/System/Library/foo", size, age), fixed_now());
        assert_eq!(result.level, SafetyLevel::Risky, "size={size} age={age}");
    }
}

#[test]
fn system_path_beats_temp_pattern() {
    let classifier = SafetyClassifier::default();
    let result = classifier.classify_at(&meta("/usr/local/cache/blob", 10, 90), fixed_now());
    assert_eq!(result.level, SafetyLevel::Risky);
}

#[test]
fn dev_cache_lands_in_caution() {
    let classifier = SafetyClassifier::default();
    let result =
        classifier.classify_at(&meta("/home/dev/app/node_modules/x/index.js", 4096, 60), fixed_now());
    assert_eq!(result.level, SafetyLevel::Caution);
    assert!(result.reasons.iter().any(|r| r == "Development cache detected"));
}

#[test]
fn unmatched_path_falls_back_to_confidence_bands() {
    let classifier = SafetyClassifier::default();

    // 50 + 20 (old) + 5 (small) = 75
    let old = classifier.classify_at(&meta("/home/user/notes/a.txt", 10, 60), fixed_now());
    assert_eq!(old.level, SafetyLevel::Safe);
    assert_eq!(old.confidence, 75);

    // 50 - 15 (recent) - 10 (large) = 25
    let fresh_large =
        classifier.classify_at(&meta("/home/user/a.iso", 200 * 1024 * 1024, 1), fixed_now());
    assert_eq!(fresh_large.level, SafetyLevel::Risky);
    assert_eq!(fresh_large.confidence, 25);

    // untouched base score
    let middle = classifier.classify_at(&meta("/home/user/a.bin", 4096, 14), fixed_now());
    assert_eq!(middle.level, SafetyLevel::Caution);
    assert_eq!(middle.confidence, 50);
}

#[test]
fn read_only_permissions_lower_confidence() {
    let classifier = SafetyClassifier::default();
    let mut file = meta("/home/user/a.bin", 4096, 14);
    file.permissions = "-r--r--r--".into();
    let result = classifier.classify_at(&file, fixed_now());
    assert_eq!(result.confidence, 45);
    assert!(result
        .reasons
        .contains(&"Read-only file, may be system-critical".to_string()));
}

#[test]
fn classification_is_deterministic() {
    let classifier = SafetyClassifier::default();
    let file = meta("/var/tmp/build/out.o", 5000, 10);
    let first = classifier.classify_at(&file, fixed_now());
    for _ in 0..5 {
        assert_eq!(classifier.classify_at(&file, fixed_now()), first);
    }
}

#[test]
fn explanation_lists_at_most_three_reasons() {
    let classifier = SafetyClassifier::default();
    let result = classifier.classify_at(&meta("/tmp/build/x", 10, 90), fixed_now());
    assert!(result.reasons.len() > 3);
    let factors = result
        .explanation
        .split("Key factors: ")
        .nth(1)
        .and_then(|rest| rest.split(". ").next())
        .unwrap();
    assert_eq!(factors.split("; ").count(), 3);
}

#[test]
fn settings_drive_thresholds() {
    let settings = SafetySettings {
        safe_age_threshold_days: 3,
        large_file_threshold_mb: 1,
        ..SafetySettings::default()
    };
    let classifier = SafetyClassifier::new(ClassifierConfig::from_settings(&settings));
    let result = classifier.classify_at(&meta("/home/user/a.bin", 2 * 1024 * 1024, 5), fixed_now());
    // 50 + 20 (older than 3 days) - 10 (over 1 MB)
    assert_eq!(result.confidence, 60);
}

#[test]
fn summary_counts_levels() {
    let classifier = SafetyClassifier::default();
    let files = vec![
        meta("/tmp/a", 10, 40),
        meta("/System/b", 10, 40),
        meta("/home/u/node_modules/c", 10, 40),
        meta("/tmp/d", 10, 40),
    ];
    let all = classifier.classify_all(&files, fixed_now());
    assert_eq!(all.len(), 4);

    let summary = ClassificationSummary::from_classifications(all.values());
    assert_eq!(summary.total_files, 4);
    assert_eq!(summary.safe_count, 2);
    assert_eq!(summary.caution_count, 1);
    assert_eq!(summary.risky_count, 1);
    assert_eq!(summary.safe_percentage, 50.0);
}

#[test]
fn classify_path_reads_real_metadata() {
    let temp_dir = TempDir::new().unwrap();
    let file_path = temp_dir.path().join("scratch.tmp");
    fs::write(&file_path, b"temp").unwrap();

    let result = SafetyClassifier::default().classify_path(&file_path).unwrap();
    assert_eq!(result.level, SafetyLevel::Safe);

    let missing = SafetyClassifier::default().classify_path(&temp_dir.path().join("nope"));
    assert!(missing.unwrap_err().is_not_found());
}

#[test]
fn hard_protection_is_component_aware() {
    assert_eq!(critical_prefix_for(Path::new("/usr/lib/libc.so")), Some("/usr"));
    assert!(is_hard_protected(Path::new("/System/Library/foo")));
    assert!(is_hard_protected(Path::new("/tmp/../etc/passwd")));
    assert!(is_hard_protected(Path::new("/Library/Application Support/x")));
    assert!(!is_hard_protected(Path::new("/usrdata/file")));
    assert!(!is_hard_protected(Path::new("/var/folders/ab/T/x")));
    assert!(!is_hard_protected(Path::new("/home/user/Library/Caches/x")));
}

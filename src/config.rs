// src/config.rs

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{CleanerError, CleanerResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetySettings {
    pub safe_age_threshold_days: u32,    // Default: 30
    pub caution_age_threshold_days: u32, // Default: 7
    pub large_file_threshold_mb: u64,    // Default: 100
    pub protect_system_paths: bool,      // Default: true
    pub require_confirmation: bool,      // Default: true
}

impl Default for SafetySettings {
    fn default() -> Self {
        SafetySettings {
            safe_age_threshold_days: 30,
            caution_age_threshold_days: 7,
            large_file_threshold_mb: 100,
            protect_system_paths: true,
            require_confirmation: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceSettings {
    pub concurrent_scans: usize,    // Default: min(num_cpus, 3)
    pub scan_timeout_seconds: u64,  // Default: 300
    // Report the OS access time instead of falling back to mtime.
    pub use_access_time: bool,
}

impl Default for PerformanceSettings {
    fn default() -> Self {
        PerformanceSettings {
            concurrent_scans: num_cpus::get().clamp(1, 3),
            scan_timeout_seconds: 300,
            use_access_time: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupSettings {
    pub retention_days: u32,
    pub verify_integrity: bool,
    pub custom_location: Option<PathBuf>,
}

impl Default for BackupSettings {
    fn default() -> Self {
        BackupSettings {
            retention_days: 30,
            verify_integrity: true,
            custom_location: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub safety: SafetySettings,
    pub performance: PerformanceSettings,
    pub backup: BackupSettings,
}

impl Settings {
    /// Read settings from a JSON file. A missing file yields the defaults;
    /// unknown or absent keys fall back field by field.
    pub fn load(path: impl AsRef<Path>) -> CleanerResult<Self> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Settings::default()),
            Err(err) => Err(CleanerError::io(path, err)),
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> CleanerResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| CleanerError::io(parent, err))?;
        }
        let raw = serde_json::to_string_pretty(self)?;
        fs::write(path, raw).map_err(|err| CleanerError::io(path, err))
    }

    /// Returns one message per out-of-range value; empty means valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let safety = &self.safety;
        if safety.safe_age_threshold_days == 0 {
            errors.push("safe_age_threshold_days must be greater than 0".to_string());
        }
        if safety.caution_age_threshold_days > safety.safe_age_threshold_days {
            errors.push(
                "caution_age_threshold_days must not exceed safe_age_threshold_days".to_string(),
            );
        }
        if safety.large_file_threshold_mb == 0 {
            errors.push("large_file_threshold_mb must be greater than 0".to_string());
        }

        let perf = &self.performance;
        if !(1..=10).contains(&perf.concurrent_scans) {
            errors.push("concurrent_scans must be between 1 and 10".to_string());
        }
        if !(10..=3600).contains(&perf.scan_timeout_seconds) {
            errors.push("scan_timeout_seconds must be between 10 and 3600".to_string());
        }

        if !(1..=365).contains(&self.backup.retention_days) {
            errors.push("retention_days must be between 1 and 365".to_string());
        }
        errors
    }
}

/// Read-only view of the settings every component consumes.
pub trait SettingsProvider: Send + Sync {
    fn safety_settings(&self) -> SafetySettings;
    fn performance_settings(&self) -> PerformanceSettings;
    fn backup_settings(&self) -> BackupSettings {
        BackupSettings::default()
    }
}

impl SettingsProvider for Settings {
    fn safety_settings(&self) -> SafetySettings {
        self.safety.clone()
    }

    fn performance_settings(&self) -> PerformanceSettings {
        self.performance.clone()
    }

    fn backup_settings(&self) -> BackupSettings {
        self.backup.clone()
    }
}

/// Settings that can be swapped at runtime by the owning application.
#[derive(Debug, Clone, Default)]
pub struct SharedSettings {
    inner: Arc<RwLock<Settings>>,
}

impl SharedSettings {
    pub fn new(settings: Settings) -> Self {
        SharedSettings {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    pub fn replace(&self, settings: Settings) {
        let mut guard = self.inner.write().unwrap_or_else(|err| err.into_inner());
        *guard = settings;
    }

    pub fn current(&self) -> Settings {
        self.inner
            .read()
            .unwrap_or_else(|err| err.into_inner())
            .clone()
    }
}

impl SettingsProvider for SharedSettings {
    fn safety_settings(&self) -> SafetySettings {
        self.current().safety
    }

    fn performance_settings(&self) -> PerformanceSettings {
        self.current().performance
    }

    fn backup_settings(&self) -> BackupSettings {
        self.current().backup
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationSpec {
    pub id: String,
    pub name: String,
    pub path: String,
}

impl LocationSpec {
    pub fn new(id: impl Into<String>, name: impl Into<String>, path: impl Into<String>) -> Self {
        LocationSpec {
            id: id.into(),
            name: name.into(),
            path: path.into(),
        }
    }
}

/// The cache roots offered to the user, grouped the way the locations file stores them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheCatalogue {
    pub system_caches: Vec<LocationSpec>,
    pub user_caches: Vec<LocationSpec>,
    pub application_caches: Vec<LocationSpec>,
}

impl CacheCatalogue {
    pub fn load(path: impl AsRef<Path>) -> CleanerResult<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|err| CleanerError::io(path, err))?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn default_locations() -> Self {
        CacheCatalogue {
            system_caches: vec![LocationSpec::new("system_temp", "Temporary Files", "/tmp")],
            user_caches: vec![
                LocationSpec::new("user_caches", "User Caches", "~/Library/Caches"),
                LocationSpec::new("user_logs", "User Logs", "~/Library/Logs"),
            ],
            application_caches: Vec::new(),
        }
    }

    /// All locations in catalogue order: system, user, then application caches.
    pub fn all(&self) -> Vec<LocationSpec> {
        self.system_caches
            .iter()
            .chain(self.user_caches.iter())
            .chain(self.application_caches.iter())
            .cloned()
            .collect()
    }
}

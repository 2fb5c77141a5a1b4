pub mod backup;
pub mod config;
pub mod deletion;
mod error;
pub mod logging;
pub mod notify;
pub mod ops;
pub mod safety;
pub mod scanner;
mod system;

pub use backup::{
    BackupManager, BackupManifest, BackupSession, IntegrityReport, RestoreManager, RestoreRequest,
    RestoreResult, SessionStatus,
};
pub use config::{CacheCatalogue, LocationSpec, Settings, SettingsProvider, SharedSettings};
pub use deletion::{
    ConfirmationDialog, ConfirmationResult, DeletionPipeline, DeletionRequest, DeletionResult,
    DeletionStatus, SafetyCheckResult,
};
pub use error::{CleanerError, CleanerResult, ErrorKind, FileFailure};
pub use ops::{OperationHandle, OperationStatus, ProgressManager, ProgressSnapshot};
pub use safety::{SafetyClassification, SafetyClassifier, SafetyLevel};
pub use scanner::{CacheLocation, CacheScanner, ScanResult};
pub use system::{CleanerSystem, CleanerSystemBuilder};

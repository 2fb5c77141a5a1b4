mod manager;
mod manifest;
mod restore;
mod storage;


pub use manager::{BackupManager, BackupProgress, BackupStatus, CleanupReport, IntegrityReport};
pub use manifest::{
    BackupEntry, BackupManifest, BackupSession, ManifestStore, SessionStatus, MANIFEST_VERSION,
};
pub use restore::{
    RestoreManager, RestorePreview, RestoreProgress, RestoreRequest, RestoreResult, RestoreStatus,
};

pub(crate) use storage::{path_size, remove_path};

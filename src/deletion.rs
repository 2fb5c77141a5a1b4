mod confirmation;
mod pipeline;
mod types;
mod validation;


pub use confirmation::{ConfirmationDialog, ConfirmationResult, ConfirmationService, ConfirmationStats};
pub use pipeline::DeletionPipeline;
pub use types::{
    BlockReason, BlockedFile, DeletionRequest, DeletionResult, DeletionStatus, DeletionSummary,
    SafetyCheckResult,
};

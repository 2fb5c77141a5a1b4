mod classifier;
mod context;
mod policy;
mod summary;

pub use classifier::{
    ClassifierConfig, FileMetadata, SafetyClassification, SafetyClassifier, SafetyLevel,
};
pub use policy::{critical_prefix_for, is_hard_protected};
pub use summary::ClassificationSummary;

pub(crate) use context::permission_string;

#[cfg(test)]
mod tests;

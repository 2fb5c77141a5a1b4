use serde::{Deserialize, Serialize};

use super::classifier::{SafetyClassification, SafetyLevel};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassificationSummary {
    pub total_files: usize,
    pub safe_count: usize,
    pub caution_count: usize,
    pub risky_count: usize,
    pub average_confidence: f64,
    pub safe_percentage: f64,
    pub caution_percentage: f64,
    pub risky_percentage: f64,
}

impl ClassificationSummary {
    pub fn from_classifications<'a, I>(classifications: I) -> Self
    where
        I: IntoIterator<Item = &'a SafetyClassification>,
    {
        let mut summary = ClassificationSummary::default();
        let mut confidence_sum = 0u64;
        for classification in classifications {
            summary.total_files += 1;
            confidence_sum += u64::from(classification.confidence);
            match classification.level {
                SafetyLevel::Safe => summary.safe_count += 1,
                SafetyLevel::Caution => summary.caution_count += 1,
                SafetyLevel::Risky => summary.risky_count += 1,
            }
        }
        if summary.total_files > 0 {
            let total = summary.total_files as f64;
            summary.average_confidence = confidence_sum as f64 / total;
            summary.safe_percentage = summary.safe_count as f64 / total * 100.0;
            summary.caution_percentage = summary.caution_count as f64 / total * 100.0;
            summary.risky_percentage = summary.risky_count as f64 / total * 100.0;
        }
        summary
    }
}

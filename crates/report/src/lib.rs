//! # Report
//!
//! Everything shown to a reader is derived from an [`AggregateResult`]:
//! plain-text reports, a block-based document layout and its PDF rendering.
//! Timestamps and identifiers come from the aggregate, so rendering the same
//! result twice produces identical output.

pub mod error;
pub mod layout;
pub mod pdf;
pub mod text;

use models::{AggregateResult, ConflictReason, Consistency};

pub use error::ReportError;
pub use layout::{batch_document, case_document, Block, Figure, ReportDocument};
pub use pdf::{render_pdf, write_case_pdf, write_pdf};
pub use text::{batch_report, case_report, quick_summary, view_report};

pub const MEDICAL_DISCLAIMER: &str = "This AI system is a demonstration project developed for \
educational and research purposes only. It is NOT a medical device and should NOT be used for \
actual medical diagnosis or treatment decisions. It is not medically validated, may produce \
incorrect or misleading results and should never replace professional medical consultation. \
Always consult qualified healthcare professionals for medical advice, diagnosis, or treatment.";

pub const SUPPRESSION_SUMMARY: &str = "Diagnostic Conflict Detected. AI Interpretation Halted.";

pub const SUPPRESSION_NOTICE: &str = "Automated interpretation was withheld because the analyzed \
views disagree. Only the raw per-view predictions are shown. Manual review by a radiologist is \
STRONGLY recommended.";

pub(crate) fn timestamp(result: &AggregateResult) -> String {
    result.generated_at.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

pub(crate) fn patient_label(result: &AggregateResult) -> &str {
    result.patient_id.as_deref().unwrap_or("ANONYMOUS")
}

/// One-sentence reason for a conflict, if there is one.
pub fn conflict_description(result: &AggregateResult) -> Option<String> {
    let Consistency::Conflict { reason, .. } = &result.consistency else {
        return None;
    };
    Some(match reason {
        ConflictReason::ClassDisagreement => format!(
            "Multiple different tumor types were predicted across the {} views.",
            result.views.len()
        ),
        ConflictReason::ConfidenceSpread { spread, limit } => format!(
            "All views predict the same class, but their confidences differ by {spread:.1} \
             points (allowed: {limit:.1})."
        ),
    })
}

/// `CASE_20250101_120000` style identifier for file names.
pub fn file_stem(result: &AggregateResult) -> String {
    match &result.patient_id {
        Some(patient) => format!("{}_{}", sanitize_file_part(patient), result.case_id),
        None => result.case_id.clone(),
    }
}

fn sanitize_file_part(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_description() {
        assert!(conflict_description(&fixtures::consistent()).is_none());
        let text = conflict_description(&fixtures::conflicting()).unwrap();
        assert!(text.contains("across the 2 views"));
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem(&fixtures::consistent()), "P-001_CASE_20250102_030405");
        let mut anonymous = fixtures::consistent();
        anonymous.patient_id = Some("a/b c".to_string());
        assert_eq!(file_stem(&anonymous), "a_b_c_CASE_20250102_030405");
        assert_eq!(file_stem(&fixtures::conflicting()), "CASE_20250102_030405");
    }
}

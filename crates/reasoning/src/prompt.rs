//! Prompts sent to the remote model.

use models::{Prediction, TumorClass, ViewResult};

fn probability_lines(prediction: &Prediction) -> String {
    TumorClass::ALL
        .iter()
        .map(|class| format!("- {}: {:.1}%", class, prediction.probability(*class) * 100.0))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn view_prompt(prediction: &Prediction) -> String {
    format!(
        "You are a medical AI assistant helping to explain brain tumor classification results.

Prediction Results:
- Predicted Type: {}
- Confidence: {:.1}%

All Probabilities:
{}

Please provide a brief, simple explanation (2-3 sentences) about:
1. What this result means
2. The confidence level
3. A reminder that this is AI-generated and needs professional verification

Keep it simple and easy to understand for non-medical users. Include the medical disclaimer.",
        prediction.class,
        prediction.confidence,
        probability_lines(prediction)
    )
}

/// Case-level prompt. Only built for views that agree with each other.
pub fn case_prompt(views: &[ViewResult]) -> String {
    let findings = views
        .iter()
        .enumerate()
        .map(|(idx, view)| {
            format!(
                "- View #{} ({}): {} at {:.1}% confidence",
                idx + 1,
                view.label,
                view.prediction.class,
                view.prediction.confidence
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are a medical AI assistant summarizing a multi-view brain MRI analysis for one patient.

The automated classifier analyzed {} views of the same encounter and all of them agree:

{}

Write a short case summary (3-4 sentences) for a non-medical reader that:
1. States the consistent finding across views
2. Comments on the overall confidence
3. Reminds the reader that this is AI-generated and must be verified by a radiologist

Do not speculate beyond the findings listed above.",
        views.len(),
        findings
    )
}

//! Template narratives used when no remote model is available or it fails.

use models::{ConfidenceLevel, Prediction, ViewResult};

pub const DISCLAIMER: &str = "Important: This is an AI-generated prediction for educational purposes \
only. It should NOT be used for medical diagnosis. Always consult qualified healthcare \
professionals for proper medical evaluation.";

pub fn confidence_sentence(level: ConfidenceLevel) -> &'static str {
    match level {
        ConfidenceLevel::High => "The model has high confidence in this prediction.",
        ConfidenceLevel::Moderate => "The model has moderate confidence in this prediction.",
        ConfidenceLevel::Low => "The model has low confidence - further analysis recommended.",
    }
}

pub fn view_text(prediction: &Prediction) -> String {
    format!(
        "AI Classification Result:\n\n\
         The system predicts: {}\n\
         Confidence: {:.1}%\n\n\
         {}\n\n\
         {}\n\n\
         {}",
        prediction.class.as_str().to_uppercase(),
        prediction.confidence,
        prediction.class.description(),
        confidence_sentence(prediction.confidence_level()),
        DISCLAIMER
    )
}

pub fn case_text(views: &[ViewResult]) -> String {
    let Some(first) = views.first() else {
        return "No scans to analyze.".to_string();
    };
    let class = first.prediction.class;
    let average =
        views.iter().map(|v| v.prediction.confidence).sum::<f32>() / views.len() as f32;

    let mut text = format!(
        "Multi-View Case Summary:\n\n\
         All {} analyzed views agree on: {}\n\
         Average confidence: {:.1}%\n\n\
         {}\n\n\
         {}\n",
        views.len(),
        class.as_str().to_uppercase(),
        average,
        class.description(),
        confidence_sentence(ConfidenceLevel::from_percent(average))
    );
    for (idx, view) in views.iter().enumerate() {
        text.push_str(&format!(
            "\n- View #{} ({}): {:.1}%",
            idx + 1,
            view.label,
            view.prediction.confidence
        ));
    }
    text.push_str("\n\n");
    text.push_str(DISCLAIMER);
    text
}

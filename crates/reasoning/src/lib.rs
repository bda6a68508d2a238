//! Narrative generation for classification results.
//!
//! A remote model is tried first when one is configured. Any failure (error,
//! timeout, empty answer) degrades to a fixed template so a narrative is
//! always produced.

pub mod fallback;
pub mod prompt;

use ai_client::{InlineImage, TextGenerator};
use models::{Narrative, Prediction, ViewResult};

pub use fallback::DISCLAIMER;

pub struct ReasoningGenerator {
    generator: Option<Box<dyn TextGenerator>>,
}

impl ReasoningGenerator {
    pub fn new(generator: Box<dyn TextGenerator>) -> Self {
        Self {
            generator: Some(generator),
        }
    }

    /// Template-only generator, used when no credential is configured.
    pub fn offline() -> Self {
        Self { generator: None }
    }

    pub fn is_enriched(&self) -> bool {
        self.generator.is_some()
    }

    pub fn backend_name(&self) -> &str {
        self.generator.as_ref().map(|g| g.name()).unwrap_or("fallback")
    }

    pub fn explain_view(&self, prediction: &Prediction, image: Option<&InlineImage>) -> Narrative {
        match self.try_remote(&prompt::view_prompt(prediction), image) {
            Some(text) => Narrative::remote(text),
            None => Narrative::fallback(fallback::view_text(prediction)),
        }
    }

    /// Case-level narrative over views that were found consistent.
    pub fn synthesize_case(&self, views: &[ViewResult]) -> Narrative {
        if views.is_empty() {
            return Narrative::fallback(fallback::case_text(views));
        }
        match self.try_remote(&prompt::case_prompt(views), None) {
            Some(text) => Narrative::remote(text),
            None => Narrative::fallback(fallback::case_text(views)),
        }
    }

    fn try_remote(&self, prompt: &str, image: Option<&InlineImage>) -> Option<String> {
        let generator = self.generator.as_ref()?;
        match generator.generate(prompt, image) {
            Ok(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
            Ok(_) => {
                tracing::warn!("{} returned an empty response, using fallback", generator.name());
                None
            }
            Err(e) => {
                tracing::warn!("{} generation failed, using fallback: {:#}", generator.name(), e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use models::{NarrativeSource, TumorClass};
    use std::cell::Cell;
    use std::path::PathBuf;
    use std::rc::Rc;

    struct Scripted {
        reply: anyhow::Result<String>,
        calls: Rc<Cell<usize>>,
        saw_image: Rc<Cell<bool>>,
    }

    impl Scripted {
        fn new(reply: anyhow::Result<String>) -> (Self, Rc<Cell<usize>>) {
            let calls = Rc::new(Cell::new(0));
            (
                Self {
                    reply,
                    calls: calls.clone(),
                    saw_image: Rc::new(Cell::new(false)),
                },
                calls,
            )
        }
    }

    impl TextGenerator for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn generate(&self, _prompt: &str, image: Option<&InlineImage>) -> anyhow::Result<String> {
            self.calls.set(self.calls.get() + 1);
            self.saw_image.set(image.is_some());
            match &self.reply {
                Ok(text) => Ok(text.clone()),
                Err(e) => Err(anyhow::anyhow!("{e}")),
            }
        }
    }

    fn prediction(class: TumorClass, confidence: f32) -> Prediction {
        let rest = (1.0 - confidence) / 3.0;
        let probs = TumorClass::ALL
            .iter()
            .map(|c| if *c == class { confidence } else { rest })
            .collect();
        Prediction::from_probabilities(probs).unwrap()
    }

    fn view(label: &str, class: TumorClass, confidence: f32) -> ViewResult {
        ViewResult {
            label: label.to_string(),
            source: PathBuf::from(format!("{label}.png")),
            prediction: prediction(class, confidence),
            image: image::RgbImage::new(2, 2),
            heatmap: None,
            heatmap_error: None,
            narrative: None,
        }
    }

    #[test]
    fn test_offline_uses_template() {
        let reasoning = ReasoningGenerator::offline();
        assert!(!reasoning.is_enriched());
        assert_eq!(reasoning.backend_name(), "fallback");

        let narrative = reasoning.explain_view(&prediction(TumorClass::Glioma, 0.9), None);
        assert_eq!(narrative.source, NarrativeSource::Fallback);
        assert!(narrative.text.contains("GLIOMA"));
        assert!(narrative.text.contains("high confidence"));
        assert!(narrative.text.contains("educational purposes only"));
    }

    #[test]
    fn test_remote_text_is_trimmed() {
        let (generator, calls) = Scripted::new(Ok("  A clear finding.\n".to_string()));
        let reasoning = ReasoningGenerator::new(Box::new(generator));

        let narrative = reasoning.explain_view(&prediction(TumorClass::Meningioma, 0.7), None);
        assert_eq!(narrative, Narrative::remote("A clear finding."));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_failure_and_empty_reply_fall_back() {
        let (failing, _) = Scripted::new(Err(anyhow::anyhow!("timed out")));
        let reasoning = ReasoningGenerator::new(Box::new(failing));
        let narrative = reasoning.explain_view(&prediction(TumorClass::Pituitary, 0.5), None);
        assert_eq!(narrative.source, NarrativeSource::Fallback);
        assert!(narrative.text.contains("low confidence"));

        let (empty, _) = Scripted::new(Ok("   ".to_string()));
        let reasoning = ReasoningGenerator::new(Box::new(empty));
        let narrative = reasoning.explain_view(&prediction(TumorClass::NoTumor, 0.65), None);
        assert_eq!(narrative.source, NarrativeSource::Fallback);
        assert!(narrative.text.contains("moderate confidence"));
    }

    #[test]
    fn test_unresponsive_backend_degrades_to_template() {
        use ai_client::{OllamaClient, OllamaClientConfig};
        use std::net::TcpListener;
        use std::time::{Duration, Instant};

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            if let Ok((_stream, _)) = listener.accept() {
                std::thread::sleep(Duration::from_secs(5));
            }
        });

        let config = OllamaClientConfig {
            timeout: Duration::from_secs(1),
            ..OllamaClientConfig::new(format!("http://{addr}"), "llava")
        };
        let reasoning = ReasoningGenerator::new(Box::new(OllamaClient::new(config).unwrap()));

        let started = Instant::now();
        let narrative = reasoning.explain_view(&prediction(TumorClass::Glioma, 0.9), None);
        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(narrative.source, NarrativeSource::Fallback);
        assert!(narrative.text.contains("GLIOMA"));
    }

    #[test]
    fn test_image_is_forwarded() {
        let (generator, _) = Scripted::new(Ok("ok".to_string()));
        let saw_image = generator.saw_image.clone();
        let reasoning = ReasoningGenerator::new(Box::new(generator));

        let image = InlineImage::new("image/png", vec![1, 2, 3]);
        reasoning.explain_view(&prediction(TumorClass::Glioma, 0.9), Some(&image));
        assert!(saw_image.get());
    }

    #[test]
    fn test_case_fallback_summarizes_views() {
        let reasoning = ReasoningGenerator::offline();
        let views = vec![
            view("axial", TumorClass::Glioma, 0.9),
            view("coronal", TumorClass::Glioma, 0.7),
        ];

        let narrative = reasoning.synthesize_case(&views);
        assert_eq!(narrative.source, NarrativeSource::Fallback);
        assert!(narrative.text.contains("All 2 analyzed views agree on: GLIOMA"));
        assert!(narrative.text.contains("Average confidence: 80.0%"));
        assert!(narrative.text.contains("View #2 (coronal): 70.0%"));
    }

    #[test]
    fn test_case_without_views_skips_remote() {
        let (generator, calls) = Scripted::new(Ok("should not be used".to_string()));
        let reasoning = ReasoningGenerator::new(Box::new(generator));

        let narrative = reasoning.synthesize_case(&[]);
        assert_eq!(narrative.text, "No scans to analyze.");
        assert_eq!(calls.get(), 0);
    }
}

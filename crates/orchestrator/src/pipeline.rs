use std::path::{Path, PathBuf};
use std::time::Duration;

use ai_client::{GeminiClient, GeminiClientConfig, InlineImage, OllamaClient, OllamaClientConfig};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use explainability::{Explainer, GradCamExplainer};
use models::{
    AggregateResult, AnalysisRequest, Consistency, ConsistencyPolicy, Interpretation, LlmProvider,
    LlmSettings, PipelineOptions, ReportSettings, Settings, ViewFailure, ViewInput, ViewResult,
};
use reasoning::ReasoningGenerator;
use tracing::{info, warn};
use vision::{load_image, PreparedImage, RemoteClassifier, VisionClassifier};

use crate::consistency::assess;
use crate::error::PipelineError;

/// `CASE_YYYYmmdd_HHMMSS` from the analysis time.
pub fn case_id(at: DateTime<Utc>) -> String {
    format!("CASE_{}", at.format("%Y%m%d_%H%M%S"))
}

/// Builds the narrative backend described by the settings. Without a usable
/// backend every narrative comes from the templates.
pub fn reasoning_from_settings(llm: &LlmSettings) -> ReasoningGenerator {
    let timeout = Duration::from_secs(llm.timeout_secs.max(1));
    match llm.provider {
        LlmProvider::Gemini => {
            let Some(api_key) = llm.api_key.as_deref().filter(|k| !k.trim().is_empty()) else {
                info!("GEMINI_API_KEY not set, narratives will use built-in templates");
                return ReasoningGenerator::offline();
            };
            let config = GeminiClientConfig {
                base_url: llm.base_url().to_string(),
                model: llm.model().to_string(),
                timeout,
                ..GeminiClientConfig::new(api_key.trim())
            };
            match GeminiClient::new(config) {
                Ok(client) => ReasoningGenerator::new(Box::new(client)),
                Err(e) => {
                    warn!("Gemini client unavailable, using templates: {:#}", e);
                    ReasoningGenerator::offline()
                }
            }
        }
        LlmProvider::Ollama => {
            let config = OllamaClientConfig {
                timeout,
                ..OllamaClientConfig::new(llm.base_url(), llm.model())
            };
            match OllamaClient::new(config) {
                Ok(client) => ReasoningGenerator::new(Box::new(client)),
                Err(e) => {
                    warn!("Ollama client unavailable, using templates: {:#}", e);
                    ReasoningGenerator::offline()
                }
            }
        }
    }
}

pub struct Orchestrator {
    classifier: Box<dyn VisionClassifier>,
    explainer: Option<Box<dyn Explainer>>,
    reasoning: ReasoningGenerator,
    options: PipelineOptions,
    policy: ConsistencyPolicy,
    image_size: u32,
}

impl Orchestrator {
    pub fn new(
        classifier: Box<dyn VisionClassifier>,
        explainer: Option<Box<dyn Explainer>>,
        reasoning: ReasoningGenerator,
    ) -> Self {
        Self {
            classifier,
            explainer,
            reasoning,
            options: PipelineOptions::default(),
            policy: ConsistencyPolicy::default(),
            image_size: vision::preprocess::DEFAULT_IMAGE_SIZE,
        }
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_policy(mut self, policy: ConsistencyPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_image_size(mut self, size: u32) -> Self {
        self.image_size = size;
        self
    }

    /// Wires the remote classifier, Grad-CAM model and narrative backend.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let server = &settings.model_server;
        let classifier = RemoteClassifier::new(server)
            .with_context(|| format!("Failed to set up classifier client for {}", server.base_url))?;
        if !classifier.is_ready() {
            warn!(
                "Model '{}' is not reported ready at {}",
                classifier.model(),
                server.base_url
            );
        }

        let explainer: Option<Box<dyn Explainer>> = if settings.pipeline.generate_heatmap {
            let gradcam = GradCamExplainer::new(server)
                .with_context(|| format!("Failed to set up Grad-CAM client for {}", server.base_url))?;
            Some(Box::new(gradcam))
        } else {
            None
        };

        let reasoning = reasoning_from_settings(&settings.llm);
        info!(
            "Pipeline ready (classifier: {}, heatmaps: {}, narratives: {})",
            classifier.model(),
            explainer.is_some(),
            reasoning.backend_name()
        );

        Ok(Self::new(Box::new(classifier), explainer, reasoning)
            .with_options(settings.pipeline)
            .with_policy(settings.consistency)
            .with_image_size(server.image_size))
    }

    pub fn reasoning(&self) -> &ReasoningGenerator {
        &self.reasoning
    }

    fn run_view(&self, input: &ViewInput) -> Result<(ViewResult, InlineImage), PipelineError> {
        let image = load_image(&input.path, self.image_size)?;
        let prediction = self.classifier.classify(&image)?;
        info!(
            "View '{}': {} ({:.1}%)",
            input.label, prediction.class, prediction.confidence
        );

        let (heatmap, heatmap_error) = match &self.explainer {
            Some(explainer) if self.options.generate_heatmap => {
                match explainer.explain(&image, prediction.class) {
                    Ok(heatmap) => (Some(heatmap), None),
                    Err(e) => {
                        warn!("Heatmap for view '{}' failed: {}", input.label, e);
                        (None, Some(e.to_string()))
                    }
                }
            }
            _ => (None, None),
        };

        let PreparedImage {
            original,
            format,
            encoded,
            ..
        } = image;
        let view = ViewResult {
            label: input.label.clone(),
            source: input.path.clone(),
            prediction,
            image: original,
            heatmap,
            heatmap_error,
            narrative: None,
        };
        Ok((view, InlineImage::new(format.mime_type(), encoded)))
    }

    /// Loads, classifies and explains one view. Narratives are added later,
    /// once the whole case is known to be consistent.
    pub fn process_view(&self, input: &ViewInput) -> Result<ViewResult, PipelineError> {
        self.run_view(input).map(|(view, _)| view)
    }

    pub fn analyze(&self, request: &AnalysisRequest) -> AggregateResult {
        let generated_at = Utc::now();
        let case_id = case_id(generated_at);
        info!("Analyzing {} with {} view(s)", case_id, request.views.len());

        let mut views = Vec::with_capacity(request.views.len());
        let mut images = Vec::with_capacity(request.views.len());
        let mut failures = Vec::new();
        for input in &request.views {
            match self.run_view(input) {
                Ok((view, image)) => {
                    views.push(view);
                    images.push(image);
                }
                Err(e) => {
                    warn!("View '{}' excluded: {}", input.label, e);
                    failures.push(ViewFailure {
                        label: input.label.clone(),
                        source: input.path.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        let consistency = assess(&views, &self.policy);
        let interpretation = match &consistency {
            Consistency::NoViews => {
                warn!("No view of {} could be classified", case_id);
                Interpretation::Unavailable
            }
            Consistency::Conflict { reason, tally } => {
                warn!(
                    "Diagnostic conflict in {} ({:?}, {:?}), interpretation suppressed",
                    case_id, reason, tally
                );
                Interpretation::Suppressed
            }
            Consistency::Consistent { .. } if self.options.generate_narrative => {
                for (view, image) in views.iter_mut().zip(&images) {
                    let attached = self.options.attach_images.then_some(image);
                    view.narrative = Some(self.reasoning.explain_view(&view.prediction, attached));
                }
                Interpretation::Synthesized(self.reasoning.synthesize_case(&views))
            }
            Consistency::Consistent { .. } => Interpretation::Unavailable,
        };

        AggregateResult {
            case_id,
            patient_id: request.patient_id.clone(),
            generated_at,
            views,
            failures,
            consistency,
            interpretation,
        }
    }

    /// Runs each scan as its own single-view case.
    pub fn analyze_batch(&self, paths: &[PathBuf]) -> Vec<AggregateResult> {
        paths
            .iter()
            .map(|path| {
                let label = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| path.display().to_string());
                self.analyze(&AnalysisRequest {
                    patient_id: None,
                    views: vec![ViewInput::new(label, path.clone())],
                })
            })
            .collect()
    }

    pub fn render_report(
        &self,
        result: &AggregateResult,
        settings: &ReportSettings,
        path: Option<&Path>,
    ) -> Result<PathBuf, PipelineError> {
        Ok(report::write_case_pdf(result, settings, path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::prediction;
    use ai_client::TextGenerator;
    use explainability::ExplainError;
    use image::{Rgb, RgbImage};
    use models::{ActivationMap, Heatmap, NarrativeSource, Prediction, TumorClass};
    use std::cell::Cell;
    use std::collections::VecDeque;
    use std::rc::Rc;
    use std::sync::Mutex;
    use vision::VisionError;

    struct ScriptedClassifier {
        replies: Mutex<VecDeque<Result<Prediction, String>>>,
    }

    impl ScriptedClassifier {
        fn boxed(replies: Vec<Result<Prediction, String>>) -> Box<dyn VisionClassifier> {
            Box::new(Self {
                replies: Mutex::new(replies.into()),
            })
        }
    }

    impl VisionClassifier for ScriptedClassifier {
        fn classify(&self, _image: &PreparedImage) -> Result<Prediction, VisionError> {
            let next = self.replies.lock().unwrap().pop_front();
            match next {
                Some(Ok(prediction)) => Ok(prediction),
                Some(Err(e)) => Err(VisionError::InvalidResponse(e)),
                None => Err(VisionError::InvalidResponse("no scripted reply".to_string())),
            }
        }
    }

    struct FlatExplainer {
        fail: bool,
    }

    impl Explainer for FlatExplainer {
        fn explain(&self, image: &PreparedImage, _class: TumorClass) -> Result<Heatmap, ExplainError> {
            if self.fail {
                return Err(ExplainError::InvalidActivation("gradcam offline".to_string()));
            }
            let (w, h) = image.resized.dimensions();
            Ok(Heatmap {
                activation: ActivationMap::new(w, h, vec![0.5; (w * h) as usize])?,
                overlay: image.resized.clone(),
            })
        }
    }

    struct CountingGenerator {
        calls: Rc<Cell<usize>>,
        images: Rc<Cell<usize>>,
    }

    impl TextGenerator for CountingGenerator {
        fn name(&self) -> &str {
            "counting"
        }

        fn generate(&self, _prompt: &str, image: Option<&InlineImage>) -> anyhow::Result<String> {
            self.calls.set(self.calls.get() + 1);
            if image.is_some() {
                self.images.set(self.images.get() + 1);
            }
            Ok("Remote narrative.".to_string())
        }
    }

    struct Harness {
        dir: tempfile::TempDir,
        calls: Rc<Cell<usize>>,
        images: Rc<Cell<usize>>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                dir: tempfile::tempdir().unwrap(),
                calls: Rc::new(Cell::new(0)),
                images: Rc::new(Cell::new(0)),
            }
        }

        fn scan(&self, name: &str) -> ViewInput {
            let path = self.dir.path().join(format!("{name}.png"));
            RgbImage::from_pixel(32, 32, Rgb([80, 80, 80])).save(&path).unwrap();
            ViewInput::new(name, path)
        }

        fn reasoning(&self) -> ReasoningGenerator {
            ReasoningGenerator::new(Box::new(CountingGenerator {
                calls: self.calls.clone(),
                images: self.images.clone(),
            }))
        }

        fn orchestrator(&self, replies: Vec<Result<Prediction, String>>) -> Orchestrator {
            Orchestrator::new(
                ScriptedClassifier::boxed(replies),
                Some(Box::new(FlatExplainer { fail: false })),
                self.reasoning(),
            )
            .with_image_size(16)
        }
    }

    fn request(views: Vec<ViewInput>) -> AnalysisRequest {
        AnalysisRequest {
            patient_id: Some("P-7".to_string()),
            views,
        }
    }

    #[test]
    fn test_single_view_is_never_suppressed() {
        let h = Harness::new();
        let orchestrator = h
            .orchestrator(vec![Ok(prediction(TumorClass::Meningioma, 0.45))])
            .with_policy(ConsistencyPolicy {
                max_confidence_spread: Some(0.0),
            });

        let result = orchestrator.analyze(&request(vec![h.scan("axial")]));
        assert!(!result.is_suppressed());
        assert_eq!(
            result.consistency,
            Consistency::Consistent {
                class: TumorClass::Meningioma
            }
        );
        assert!(result.synthesized_narrative().is_some());
    }

    #[test]
    fn test_conflicting_views_suppress_reasoning() {
        let h = Harness::new();
        let orchestrator = h.orchestrator(vec![
            Ok(prediction(TumorClass::Glioma, 0.9)),
            Ok(prediction(TumorClass::Pituitary, 0.8)),
        ]);

        let result = orchestrator.analyze(&request(vec![h.scan("axial"), h.scan("sagittal")]));
        assert!(result.is_suppressed());
        assert!(result.consistency.is_conflict());
        assert!(result.synthesized_narrative().is_none());
        assert!(result.views.iter().all(|v| v.narrative.is_none()));
        assert_eq!(h.calls.get(), 0);
    }

    #[test]
    fn test_agreeing_views_get_synthesized_narrative() {
        let h = Harness::new();
        let orchestrator = h.orchestrator(vec![
            Ok(prediction(TumorClass::Glioma, 0.9)),
            Ok(prediction(TumorClass::Glioma, 0.7)),
        ]);

        let result = orchestrator.analyze(&request(vec![h.scan("axial"), h.scan("coronal")]));
        let narrative = result.synthesized_narrative().unwrap();
        assert_eq!(narrative.source, NarrativeSource::Remote);
        assert!(result.views.iter().all(|v| v.narrative.is_some()));
        assert!(result.views.iter().all(|v| v.heatmap.is_some()));
        // two views plus the case summary
        assert_eq!(h.calls.get(), 3);
        assert_eq!(h.images.get(), 0);
        assert!(result.case_id.starts_with("CASE_"));
        assert_eq!(result.patient_id.as_deref(), Some("P-7"));
    }

    #[test]
    fn test_images_attached_when_enabled() {
        let h = Harness::new();
        let orchestrator = h
            .orchestrator(vec![Ok(prediction(TumorClass::NoTumor, 0.99))])
            .with_options(PipelineOptions {
                attach_images: true,
                ..PipelineOptions::default()
            });

        orchestrator.analyze(&request(vec![h.scan("axial")]));
        assert_eq!(h.images.get(), 1);
    }

    #[test]
    fn test_offline_still_classifies_and_reports() {
        let h = Harness::new();
        let orchestrator = Orchestrator::new(
            ScriptedClassifier::boxed(vec![
                Ok(prediction(TumorClass::Pituitary, 0.85)),
                Ok(prediction(TumorClass::Pituitary, 0.8)),
            ]),
            None,
            ReasoningGenerator::offline(),
        )
        .with_image_size(16);

        let result = orchestrator.analyze(&request(vec![h.scan("axial"), h.scan("coronal")]));
        assert_eq!(result.views.len(), 2);
        let narrative = result.synthesized_narrative().unwrap();
        assert_eq!(narrative.source, NarrativeSource::Fallback);
        assert!(result
            .views
            .iter()
            .all(|v| v.narrative.as_ref().map(|n| n.source) == Some(NarrativeSource::Fallback)));

        let settings = ReportSettings {
            output_dir: h.dir.path().join("out"),
            ..ReportSettings::default()
        };
        let path = orchestrator.render_report(&result, &settings, None).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_report_rendering_is_idempotent() {
        let h = Harness::new();
        let orchestrator = h.orchestrator(vec![
            Ok(prediction(TumorClass::Glioma, 0.9)),
            Ok(prediction(TumorClass::Meningioma, 0.6)),
        ]);
        let result = orchestrator.analyze(&request(vec![h.scan("axial"), h.scan("coronal")]));

        let settings = ReportSettings::default();
        let first = report::render_pdf(&report::case_document(&result, &settings)).unwrap();
        let second = report::render_pdf(&report::case_document(&result, &settings)).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            report::case_report(&result, "S"),
            report::case_report(&result, "S")
        );
    }

    #[test]
    fn test_failed_views_are_excluded() {
        let h = Harness::new();
        let garbage = h.dir.path().join("notes.txt");
        std::fs::write(&garbage, "not an image").unwrap();

        let orchestrator = h.orchestrator(vec![
            Ok(prediction(TumorClass::Glioma, 0.9)),
            Err("model crashed".to_string()),
            Ok(prediction(TumorClass::Glioma, 0.8)),
        ]);
        let result = orchestrator.analyze(&request(vec![
            h.scan("axial"),
            ViewInput::new("notes", garbage),
            h.scan("coronal"),
            h.scan("sagittal"),
        ]));

        assert_eq!(result.views.len(), 2);
        assert_eq!(result.failures.len(), 2);
        assert_eq!(result.failures[0].label, "notes");
        assert!(result.failures[0].error.contains("Unsupported image format"));
        assert_eq!(result.failures[1].label, "coronal");
        assert!(result.failures[1].error.contains("model crashed"));
        assert!(!result.is_suppressed());
    }

    #[test]
    fn test_heatmap_failure_is_not_fatal() {
        let h = Harness::new();
        let orchestrator = Orchestrator::new(
            ScriptedClassifier::boxed(vec![Ok(prediction(TumorClass::Glioma, 0.9))]),
            Some(Box::new(FlatExplainer { fail: true })),
            ReasoningGenerator::offline(),
        )
        .with_image_size(16);

        let result = orchestrator.analyze(&request(vec![h.scan("axial")]));
        assert_eq!(result.views.len(), 1);
        assert!(result.views[0].heatmap.is_none());
        assert!(result.views[0]
            .heatmap_error
            .as_deref()
            .unwrap()
            .contains("gradcam offline"));
        assert!(result.failures.is_empty());
    }

    #[test]
    fn test_no_views_and_disabled_narratives() {
        let h = Harness::new();
        let empty = h.orchestrator(vec![]).analyze(&request(vec![]));
        assert_eq!(empty.consistency, Consistency::NoViews);
        assert_eq!(empty.interpretation, Interpretation::Unavailable);

        let orchestrator = h
            .orchestrator(vec![Ok(prediction(TumorClass::Glioma, 0.9))])
            .with_options(PipelineOptions {
                generate_narrative: false,
                generate_heatmap: false,
                attach_images: false,
            });
        let result = orchestrator.analyze(&request(vec![h.scan("axial")]));
        assert_eq!(result.interpretation, Interpretation::Unavailable);
        assert!(result.views[0].heatmap.is_none());
        assert!(result.views[0].heatmap_error.is_none());
        assert_eq!(h.calls.get(), 0);
    }

    #[test]
    fn test_batch_runs_each_scan_alone() {
        let h = Harness::new();
        let orchestrator = h.orchestrator(vec![
            Ok(prediction(TumorClass::Glioma, 0.9)),
            Ok(prediction(TumorClass::Pituitary, 0.8)),
        ]);
        let paths = vec![h.scan("a").path, h.scan("b").path];

        let results = orchestrator.analyze_batch(&paths);
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| !r.is_suppressed()));
        assert_eq!(results[1].views[0].label, "b.png");
    }

    #[test]
    fn test_case_id_format() {
        use chrono::TimeZone;
        let at = Utc.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(case_id(at), "CASE_20250304_050607");
    }

    #[test]
    fn test_reasoning_from_settings_without_key_is_offline() {
        let settings = LlmSettings::default();
        assert!(!reasoning_from_settings(&settings).is_enriched());

        let with_key = LlmSettings {
            api_key: Some("test-key".to_string()),
            ..LlmSettings::default()
        };
        assert!(reasoning_from_settings(&with_key).is_enriched());

        let remote_ollama = LlmSettings {
            provider: LlmProvider::Ollama,
            base_url: Some("http://example.com:11434".to_string()),
            ..LlmSettings::default()
        };
        assert!(!reasoning_from_settings(&remote_ollama).is_enriched());
    }

    #[test]
    fn test_ollama_provider_alone_enables_local_backend() {
        let settings: Settings = serde_json::from_str(r#"{ "llm": { "provider": "ollama" } }"#).unwrap();
        let reasoning = reasoning_from_settings(&settings.llm);
        assert!(reasoning.is_enriched());
        assert_eq!(reasoning.backend_name(), "ollama");
    }
}

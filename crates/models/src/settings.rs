//! Layout of `settings.json`. Every field has a default so a partial (or
//! missing) file still yields a usable configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub model_server: ModelServerSettings,
    pub llm: LlmSettings,
    pub consistency: ConsistencyPolicy,
    pub pipeline: PipelineOptions,
    pub report: ReportSettings,
}

/// Where the classifier and Grad-CAM models are served (KServe v2 protocol).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelServerSettings {
    pub base_url: String,
    pub classifier_model: String,
    pub gradcam_model: String,
    pub input_name: String,
    pub timeout_secs: u64,
    pub image_size: u32,
}

impl Default for ModelServerSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            classifier_model: "brain_tumor_resnet18".to_string(),
            gradcam_model: "brain_tumor_resnet18_gradcam".to_string(),
            input_name: "input".to_string(),
            timeout_secs: 30,
            image_size: 224,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    Gemini,
    Ollama,
}

impl LlmProvider {
    pub fn default_model(self) -> &'static str {
        match self {
            LlmProvider::Gemini => "gemini-1.5-flash",
            LlmProvider::Ollama => "llama3.2",
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            LlmProvider::Gemini => "https://generativelanguage.googleapis.com/v1beta/",
            LlmProvider::Ollama => "http://localhost:11434",
        }
    }
}

/// `model` and `base_url` stay unset unless configured; the accessors fall
/// back to the defaults of whichever provider is selected.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub provider: LlmProvider,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    /// Only ever read from the environment; never written back to disk.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Gemini,
            model: None,
            base_url: None,
            timeout_secs: 20,
            api_key: None,
        }
    }
}

impl LlmSettings {
    pub fn model(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.provider.default_model())
    }

    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.provider.default_base_url())
    }

    /// Switches provider. Model and endpoint configured for the previous
    /// provider are dropped.
    pub fn set_provider(&mut self, provider: LlmProvider) {
        if self.provider == provider {
            return;
        }
        self.provider = provider;
        self.model = None;
        self.base_url = None;
        self.api_key = None;
    }
}

/// How strictly views of one patient must agree.
///
/// With `max_confidence_spread = None` views are consistent exactly when they
/// share a predicted class. With a limit (in percentage points), agreeing
/// views whose confidences differ by more than the limit also count as a
/// conflict.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsistencyPolicy {
    pub max_confidence_spread: Option<f32>,
}

impl ConsistencyPolicy {
    /// The configured limit, ignoring negative or non-finite values.
    pub fn spread_limit(&self) -> Option<f32> {
        self.max_confidence_spread
            .filter(|limit| limit.is_finite() && *limit >= 0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    pub generate_heatmap: bool,
    pub generate_narrative: bool,
    /// Send the scan itself along with per-view prompts. Off by default so
    /// only derived numbers leave the machine.
    pub attach_images: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            generate_heatmap: true,
            generate_narrative: true,
            attach_images: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportSettings {
    pub output_dir: PathBuf,
    pub system_name: String,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("reports"),
            system_name: "AI Brain Tumor Classifier (ResNet-18)".to_string(),
        }
    }
}

//! Remote LLM clients used for narrative generation.
//!
//! Two backends are supported: Google Gemini over its REST API (needs an API
//! key) and a local Ollama server. Both are blocking and carry a request
//! timeout so a slow model can never stall a pipeline run indefinitely.

pub mod gemini;
pub mod ollama;

use anyhow::Result;

pub use gemini::{GeminiClient, GeminiClientConfig};
pub use ollama::{OllamaClient, OllamaClientConfig};

/// An image attached to a prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl InlineImage {
    pub fn new(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data,
        }
    }

    pub(crate) fn to_base64(&self) -> String {
        use base64::{engine::general_purpose, Engine as _};
        general_purpose::STANDARD.encode(&self.data)
    }
}

/// A single-turn text generation backend.
pub trait TextGenerator {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Sends `prompt` (plus an optional image) and returns the model's text.
    fn generate(&self, prompt: &str, image: Option<&InlineImage>) -> Result<String>;
}

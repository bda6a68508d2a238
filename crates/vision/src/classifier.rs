use std::time::Duration;

use models::{ModelServerSettings, Prediction, TumorClass};

use crate::error::VisionError;
use crate::preprocess::PreparedImage;
use crate::protocol::{InferResponse, InferTensor, InferenceClient};

/// Anything that can turn a prepared image into a class prediction.
pub trait VisionClassifier: Send + Sync {
    fn classify(&self, image: &PreparedImage) -> Result<Prediction, VisionError>;
}

/// ResNet-18 classifier behind a v2 inference server.
///
/// The server returns raw logits; softmax is applied here so that the
/// probabilities always sum to one regardless of the model export.
#[derive(Debug, Clone)]
pub struct RemoteClassifier {
    client: InferenceClient,
    model: String,
    input_name: String,
}

impl RemoteClassifier {
    pub fn new(settings: &ModelServerSettings) -> Result<Self, VisionError> {
        let client = InferenceClient::new(
            &settings.base_url,
            Duration::from_secs(settings.timeout_secs.max(1)),
        )?;
        Ok(Self::with_client(
            client,
            &settings.classifier_model,
            &settings.input_name,
        ))
    }

    pub fn with_client(client: InferenceClient, model: &str, input_name: &str) -> Self {
        Self {
            client,
            model: model.to_string(),
            input_name: input_name.to_string(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn is_ready(&self) -> bool {
        self.client.is_ready(&self.model)
    }
}

impl VisionClassifier for RemoteClassifier {
    fn classify(&self, image: &PreparedImage) -> Result<Prediction, VisionError> {
        let input = InferTensor::fp32(
            self.input_name.clone(),
            image.shape().to_vec(),
            image.tensor.clone(),
        );
        let response = self.client.infer(&self.model, vec![input])?;
        let logits = logits_from(&response)?;
        let prediction = Prediction::from_probabilities(softmax(&logits))?;

        tracing::debug!(
            "{} -> {} ({:.1}%)",
            self.model,
            prediction.class,
            prediction.confidence
        );
        Ok(prediction)
    }
}

fn logits_from(response: &InferResponse) -> Result<Vec<f32>, VisionError> {
    let output = response.first_output()?;
    let logits = output.data.to_f32();
    if logits.len() != TumorClass::ALL.len() {
        return Err(VisionError::InvalidResponse(format!(
            "expected {} logits, got {}",
            TumorClass::ALL.len(),
            logits.len()
        )));
    }
    Ok(logits)
}

/// Numerically stable softmax.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

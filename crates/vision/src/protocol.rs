//! KServe / Triton v2 JSON inference protocol, as far as this pipeline needs
//! it: one infer call per image and a readiness probe.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::VisionError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TensorData {
    Int(Vec<i64>),
    Float(Vec<f32>),
}

impl TensorData {
    pub fn len(&self) -> usize {
        match self {
            TensorData::Int(v) => v.len(),
            TensorData::Float(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_f32(&self) -> Vec<f32> {
        match self {
            TensorData::Int(v) => v.iter().map(|x| *x as f32).collect(),
            TensorData::Float(v) => v.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferTensor {
    pub name: String,
    pub shape: Vec<usize>,
    pub datatype: String,
    pub data: TensorData,
}

impl InferTensor {
    pub fn fp32(name: impl Into<String>, shape: Vec<usize>, data: Vec<f32>) -> Self {
        Self {
            name: name.into(),
            shape,
            datatype: "FP32".to_string(),
            data: TensorData::Float(data),
        }
    }

    pub fn int64(name: impl Into<String>, shape: Vec<usize>, data: Vec<i64>) -> Self {
        Self {
            name: name.into(),
            shape,
            datatype: "INT64".to_string(),
            data: TensorData::Int(data),
        }
    }

    /// Product of the declared shape, `None` if it overflows.
    pub fn element_count(&self) -> Option<usize> {
        self.shape
            .iter()
            .try_fold(1usize, |acc, dim| acc.checked_mul(*dim))
    }

    /// Checks the payload length against the declared shape.
    pub fn validate(&self) -> Result<(), VisionError> {
        let count = self.element_count().ok_or_else(|| {
            VisionError::InvalidResponse(format!(
                "tensor '{}' declares an oversized shape {:?}",
                self.name, self.shape
            ))
        })?;
        if count != self.data.len() {
            return Err(VisionError::InvalidResponse(format!(
                "tensor '{}' declares shape {:?} but carries {} values",
                self.name,
                self.shape,
                self.data.len()
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct InferRequest {
    pub inputs: Vec<InferTensor>,
}

#[derive(Debug, Deserialize)]
pub struct InferResponse {
    #[serde(default)]
    pub model_name: String,
    #[serde(default)]
    pub outputs: Vec<InferTensor>,
}

impl InferResponse {
    pub fn first_output(&self) -> Result<&InferTensor, VisionError> {
        let output = self.outputs.first().ok_or_else(|| {
            VisionError::InvalidResponse(format!("model '{}' returned no outputs", self.model_name))
        })?;
        output.validate()?;
        Ok(output)
    }
}

/// Blocking client for a v2 inference server.
#[derive(Debug, Clone)]
pub struct InferenceClient {
    http: Client,
    base_url: Url,
}

impl InferenceClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, VisionError> {
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        let base_url = Url::parse(&normalized).map_err(|e| {
            VisionError::InvalidInput(format!("invalid model server URL '{base_url}': {e}"))
        })?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(VisionError::InvalidInput(format!(
                "unsupported model server scheme '{}'",
                base_url.scheme()
            )));
        }

        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn model_url(&self, model: &str, action: &str) -> Result<Url, VisionError> {
        self.base_url
            .join(&format!("v2/models/{model}/{action}"))
            .map_err(|e| VisionError::InvalidInput(format!("invalid model name '{model}': {e}")))
    }

    pub fn infer(&self, model: &str, inputs: Vec<InferTensor>) -> Result<InferResponse, VisionError> {
        let endpoint = self.model_url(model, "infer")?;
        let request = InferRequest { inputs };

        tracing::debug!("POST {} ({} input tensors)", endpoint, request.inputs.len());

        let response: InferResponse = self
            .http
            .post(endpoint)
            .json(&request)
            .send()?
            .error_for_status()?
            .json()?;
        Ok(response)
    }

    /// `GET v2/models/{model}/ready`; any failure counts as not ready.
    pub fn is_ready(&self, model: &str) -> bool {
        let Ok(endpoint) = self.model_url(model, "ready") else {
            return false;
        };
        self.http
            .get(endpoint)
            .send()
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

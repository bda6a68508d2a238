use models::ModelError;
use thiserror::Error;
use vision::VisionError;

#[derive(Debug, Error)]
pub enum ExplainError {
    #[error("Grad-CAM request failed: {0}")]
    Inference(#[from] VisionError),

    #[error("Invalid activation map: {0}")]
    InvalidActivation(String),

    #[error(transparent)]
    Model(#[from] ModelError),
}

use std::path::PathBuf;

use models::ModelError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VisionError {
    #[error("Cannot read image {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Unsupported image format: {0} (expected JPEG or PNG)")]
    UnsupportedFormat(String),

    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Model server request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Model server returned an invalid response: {0}")]
    InvalidResponse(String),

    #[error(transparent)]
    Model(#[from] ModelError),
}

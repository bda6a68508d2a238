//! Image loading and model-input preparation.
//!
//! Mirrors the training-time transform: RGB, resize to a square, scale to
//! [0, 1], normalise with ImageNet statistics, CHW layout.

use std::fs;
use std::path::Path;

use image::imageops::{self, FilterType};
use image::{ImageFormat, RgbImage};

use crate::error::VisionError;

pub const DEFAULT_IMAGE_SIZE: u32 = 224;
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Jpeg,
    Png,
}

impl SourceFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            SourceFormat::Jpeg => "image/jpeg",
            SourceFormat::Png => "image/png",
        }
    }

    fn detect(bytes: &[u8]) -> Result<Self, VisionError> {
        match image::guess_format(bytes) {
            Ok(ImageFormat::Jpeg) => Ok(SourceFormat::Jpeg),
            Ok(ImageFormat::Png) => Ok(SourceFormat::Png),
            Ok(other) => Err(VisionError::UnsupportedFormat(format!("{other:?}"))),
            Err(_) => Err(VisionError::UnsupportedFormat("unrecognised data".to_string())),
        }
    }

    fn image_format(self) -> ImageFormat {
        match self {
            SourceFormat::Jpeg => ImageFormat::Jpeg,
            SourceFormat::Png => ImageFormat::Png,
        }
    }
}

/// A decoded upload plus everything the model and the report need from it.
#[derive(Debug, Clone)]
pub struct PreparedImage {
    /// Full-resolution RGB decode of the upload.
    pub original: RgbImage,
    /// `size x size` resize fed to the model.
    pub resized: RgbImage,
    /// Normalised CHW tensor, `3 * size * size` values.
    pub tensor: Vec<f32>,
    pub size: u32,
    pub format: SourceFormat,
    /// The upload as received, for forwarding to vision-capable LLMs.
    pub encoded: Vec<u8>,
}

impl PreparedImage {
    /// Tensor shape in NCHW order.
    pub fn shape(&self) -> [usize; 4] {
        [1, 3, self.size as usize, self.size as usize]
    }
}

pub fn load_image(path: &Path, size: u32) -> Result<PreparedImage, VisionError> {
    let bytes = fs::read(path).map_err(|source| VisionError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    prepare_bytes(bytes, size)
}

pub fn prepare_bytes(bytes: Vec<u8>, size: u32) -> Result<PreparedImage, VisionError> {
    if size == 0 {
        return Err(VisionError::InvalidInput("image size must be positive".to_string()));
    }
    if bytes.is_empty() {
        return Err(VisionError::InvalidInput("empty image file".to_string()));
    }

    let format = SourceFormat::detect(&bytes)?;
    let original = image::load_from_memory_with_format(&bytes, format.image_format())?.to_rgb8();
    if original.width() == 0 || original.height() == 0 {
        return Err(VisionError::InvalidInput("image has no pixels".to_string()));
    }

    let resized = imageops::resize(&original, size, size, FilterType::Triangle);
    let tensor = to_tensor(&resized);

    tracing::debug!(
        "Prepared {}x{} {:?} image as {}x{} tensor",
        original.width(),
        original.height(),
        format,
        size,
        size
    );

    Ok(PreparedImage {
        original,
        resized,
        tensor,
        size,
        format,
        encoded: bytes,
    })
}

/// Normalised CHW layout of an RGB image.
pub fn to_tensor(image: &RgbImage) -> Vec<f32> {
    let (w, h) = image.dimensions();
    let plane = (w as usize) * (h as usize);
    let mut tensor = vec![0.0f32; plane * 3];

    for (x, y, pixel) in image.enumerate_pixels() {
        let offset = (y as usize) * (w as usize) + x as usize;
        for c in 0..3 {
            let value = pixel[c] as f32 / 255.0;
            tensor[c * plane + offset] = (value - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
        }
    }
    tensor
}

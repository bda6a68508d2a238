//! Grad-CAM heatmaps for classified views.
//!
//! The activation map itself comes from the model server; this crate turns it
//! into something a person can look at: resampled to the image size, colored
//! with the JET map and blended over the scan.

pub mod error;
pub mod gradcam;
pub mod overlay;

use models::{Heatmap, TumorClass};
use vision::PreparedImage;

pub use error::ExplainError;
pub use gradcam::GradCamExplainer;
pub use overlay::{jet, overlay_on_image, resample, IMAGE_WEIGHT};

/// Produces a heatmap showing which regions drove a prediction.
pub trait Explainer: Send + Sync {
    fn explain(&self, image: &PreparedImage, class: TumorClass) -> Result<Heatmap, ExplainError>;
}

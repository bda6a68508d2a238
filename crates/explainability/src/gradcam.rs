use std::time::Duration;

use models::{ActivationMap, Heatmap, ModelServerSettings, TumorClass};
use vision::protocol::InferResponse;
use vision::{InferTensor, InferenceClient, PreparedImage};

use crate::error::ExplainError;
use crate::overlay::{overlay_on_image, resample};
use crate::Explainer;

/// Name of the class-index input of the Grad-CAM model.
pub const TARGET_CLASS_INPUT: &str = "target_class";

/// Grad-CAM over the classifier's last convolutional block, served as a
/// separate model next to the classifier.
#[derive(Debug, Clone)]
pub struct GradCamExplainer {
    client: InferenceClient,
    model: String,
    input_name: String,
}

impl GradCamExplainer {
    pub fn new(settings: &ModelServerSettings) -> Result<Self, ExplainError> {
        let client = InferenceClient::new(
            &settings.base_url,
            Duration::from_secs(settings.timeout_secs.max(1)),
        )?;
        Ok(Self {
            client,
            model: settings.gradcam_model.clone(),
            input_name: settings.input_name.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn is_ready(&self) -> bool {
        self.client.is_ready(&self.model)
    }
}

impl Explainer for GradCamExplainer {
    fn explain(&self, image: &PreparedImage, class: TumorClass) -> Result<Heatmap, ExplainError> {
        let inputs = vec![
            InferTensor::fp32(
                self.input_name.clone(),
                image.shape().to_vec(),
                image.tensor.clone(),
            ),
            InferTensor::int64(TARGET_CLASS_INPUT, vec![1], vec![class.index() as i64]),
        ];
        let response = self.client.infer(&self.model, inputs)?;
        let activation = activation_from(&response)?;

        let (width, height) = image.resized.dimensions();
        let activation = resample(&activation, width, height)?;
        let overlay = overlay_on_image(&image.resized, &activation)?;

        tracing::debug!("Grad-CAM for {} peaks at {:?}", class, activation.peak());
        Ok(Heatmap {
            activation,
            overlay,
        })
    }
}

/// Reads an `[H, W]` map from the first output. Leading unit dimensions
/// (`[1, H, W]`, `[1, 1, H, W]`) are accepted.
fn activation_from(response: &InferResponse) -> Result<ActivationMap, ExplainError> {
    let output = response.first_output()?;
    let shape = &output.shape;
    if shape.len() < 2 {
        return Err(ExplainError::InvalidActivation(format!(
            "expected a 2-D map, got shape {shape:?}"
        )));
    }

    let (lead, spatial) = shape.split_at(shape.len() - 2);
    if lead.iter().any(|d| *d != 1) {
        return Err(ExplainError::InvalidActivation(format!(
            "expected a single map, got shape {shape:?}"
        )));
    }

    let height = u32::try_from(spatial[0])
        .map_err(|_| ExplainError::InvalidActivation(format!("height {} too large", spatial[0])))?;
    let width = u32::try_from(spatial[1])
        .map_err(|_| ExplainError::InvalidActivation(format!("width {} too large", spatial[1])))?;

    Ok(ActivationMap::new(width, height, output.data.to_f32())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use vision::preprocess::{to_tensor, SourceFormat};

    fn response(json: &str) -> InferResponse {
        serde_json::from_str(json).unwrap()
    }

    fn prepared(size: u32) -> PreparedImage {
        let resized = RgbImage::from_pixel(size, size, Rgb([90, 90, 90]));
        PreparedImage {
            original: resized.clone(),
            tensor: to_tensor(&resized),
            resized,
            size,
            format: SourceFormat::Png,
            encoded: vec![],
        }
    }

    #[test]
    fn test_activation_shapes() {
        let flat = response(
            r#"{"outputs":[{"name":"cam","shape":[2,3],"datatype":"FP32","data":[0,0,0,0,1,0]}]}"#,
        );
        let map = activation_from(&flat).unwrap();
        assert_eq!((map.width(), map.height()), (3, 2));
        assert_eq!(map.peak(), (1, 1));

        let batched = response(
            r#"{"outputs":[{"name":"cam","shape":[1,1,2,2],"datatype":"FP32","data":[0.1,0.2,0.3,0.4]}]}"#,
        );
        assert_eq!(activation_from(&batched).unwrap().width(), 2);
    }

    #[test]
    fn test_activation_rejects_multiple_maps() {
        let multi = response(
            r#"{"outputs":[{"name":"cam","shape":[2,1,2],"datatype":"FP32","data":[0,0,0,0]}]}"#,
        );
        assert!(matches!(
            activation_from(&multi),
            Err(ExplainError::InvalidActivation(_))
        ));

        let vector = response(r#"{"outputs":[{"name":"cam","shape":[4],"datatype":"FP32","data":[0,0,0,0]}]}"#);
        assert!(activation_from(&vector).is_err());
    }

    #[test]
    fn test_unreachable_server_fails() {
        let settings = ModelServerSettings {
            base_url: "http://127.0.0.1:9".to_string(),
            timeout_secs: 2,
            ..ModelServerSettings::default()
        };
        let explainer = GradCamExplainer::new(&settings).unwrap();

        let err = explainer.explain(&prepared(4), TumorClass::Glioma).unwrap_err();
        assert!(matches!(err, ExplainError::Inference(_)));
        assert!(!explainer.is_ready());
    }
}

use image::imageops::{self, FilterType};
use image::{ImageBuffer, Luma, Rgb, RgbImage};
use models::ActivationMap;

use crate::error::ExplainError;

/// Share of the original image in the blended overlay.
pub const IMAGE_WEIGHT: f32 = 0.5;

/// JET colormap, `value` in [0, 1], channels in [0, 1].
pub fn jet(value: f32) -> [f32; 3] {
    let v = value.clamp(0.0, 1.0);
    let channel = |center: f32| (1.5 - (4.0 * v - center).abs()).clamp(0.0, 1.0);
    [channel(3.0), channel(2.0), channel(1.0)]
}

/// Clamps the map to [0, 1] and bilinearly resamples it to `width x height`.
pub fn resample(map: &ActivationMap, width: u32, height: u32) -> Result<ActivationMap, ExplainError> {
    let clamped: Vec<f32> = map
        .values()
        .iter()
        .map(|v| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 })
        .collect();

    if map.width() == width && map.height() == height {
        return Ok(ActivationMap::new(width, height, clamped)?);
    }

    let buffer: ImageBuffer<Luma<f32>, Vec<f32>> =
        ImageBuffer::from_raw(map.width(), map.height(), clamped).ok_or_else(|| {
            ExplainError::InvalidActivation(format!(
                "{}x{} buffer does not match its values",
                map.width(),
                map.height()
            ))
        })?;
    let resized = imageops::resize(&buffer, width, height, FilterType::Triangle);
    let values = resized
        .into_raw()
        .into_iter()
        .map(|v| v.clamp(0.0, 1.0))
        .collect();
    Ok(ActivationMap::new(width, height, values)?)
}

/// Blends a JET-colored activation map over `image`.
///
/// `cam = (1 - w) * heat + w * img`, then rescaled so the brightest channel
/// value is 1. The map must already match the image size.
pub fn overlay_on_image(image: &RgbImage, map: &ActivationMap) -> Result<RgbImage, ExplainError> {
    let (width, height) = image.dimensions();
    if map.width() != width || map.height() != height {
        return Err(ExplainError::InvalidActivation(format!(
            "map is {}x{}, image is {}x{}",
            map.width(),
            map.height(),
            width,
            height
        )));
    }

    let mut blended = Vec::with_capacity((width as usize) * (height as usize) * 3);
    let mut max = 0.0f32;
    for (x, y, pixel) in image.enumerate_pixels() {
        let heat = jet(map.get(x, y));
        for c in 0..3 {
            let value = (1.0 - IMAGE_WEIGHT) * heat[c] + IMAGE_WEIGHT * (pixel[c] as f32 / 255.0);
            max = max.max(value);
            blended.push(value);
        }
    }
    if max <= 0.0 {
        max = 1.0;
    }

    let mut out = RgbImage::new(width, height);
    for (idx, pixel) in out.pixels_mut().enumerate() {
        let base = idx * 3;
        *pixel = Rgb([
            to_u8(blended[base] / max),
            to_u8(blended[base + 1] / max),
            to_u8(blended[base + 2] / max),
        ]);
    }
    Ok(out)
}

fn to_u8(value: f32) -> u8 {
    (value * 255.0).round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: [f32; 3], b: [f32; 3]) -> bool {
        a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() < 1e-5)
    }

    #[test]
    fn test_jet_endpoints() {
        assert!(approx(jet(0.0), [0.0, 0.0, 0.5]));
        assert!(approx(jet(0.5), [0.5, 1.0, 0.5]));
        assert!(approx(jet(1.0), [0.5, 0.0, 0.0]));
        assert!(approx(jet(-3.0), jet(0.0)));
        assert!(approx(jet(7.0), jet(1.0)));
    }

    #[test]
    fn test_resample_clamps_and_resizes() {
        let map = ActivationMap::new(2, 2, vec![-1.0, 0.5, 2.0, f32::NAN]).unwrap();
        let same = resample(&map, 2, 2).unwrap();
        assert_eq!(same.values(), &[0.0, 0.5, 1.0, 0.0]);

        let bigger = resample(&map, 8, 8).unwrap();
        assert_eq!((bigger.width(), bigger.height()), (8, 8));
        assert!(bigger.values().iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_overlay_is_max_normalised() {
        let image = RgbImage::from_pixel(4, 4, Rgb([40, 40, 40]));
        let map = ActivationMap::new(4, 4, vec![0.25; 16]).unwrap();

        let out = overlay_on_image(&image, &map).unwrap();
        let brightest = out.pixels().flat_map(|p| p.0).max().unwrap();
        assert_eq!(brightest, 255);
    }

    #[test]
    fn test_hot_region_is_red() {
        let image = RgbImage::new(2, 1);
        let map = ActivationMap::new(2, 1, vec![0.0, 1.0]).unwrap();

        let out = overlay_on_image(&image, &map).unwrap();
        let cold = out.get_pixel(0, 0);
        let hot = out.get_pixel(1, 0);
        assert!(cold[2] > cold[0]);
        assert!(hot[0] > hot[2]);
    }

    #[test]
    fn test_overlay_size_mismatch() {
        let image = RgbImage::new(4, 4);
        let map = ActivationMap::new(2, 2, vec![0.0; 4]).unwrap();
        assert!(matches!(
            overlay_on_image(&image, &map),
            Err(ExplainError::InvalidActivation(_))
        ));
    }
}

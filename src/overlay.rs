pub mod blend;
pub mod palette;

use base64::{engine::general_purpose, Engine as _};
use image::{codecs::png::PngEncoder, imageops, imageops::FilterType, ImageEncoder, RgbImage};
use ndarray::prelude::*;
use ndarray::Zip;

use crate::errors::{PredictorError, Result};
use crate::preprocess::INPUT_SIZE;

/// Weight of the original image in the composite; the mask gets the rest.
pub const BASE_WEIGHT: f64 = 0.6;

/// Per-pixel class id over a `[1, C, H, W]` score tensor.
///
/// Ties resolve to the lowest channel index.
pub fn segmentation_mask(scores: ArrayView4<f32>) -> Result<Array2<u32>> {
    let (batch, channels, height, width) = scores.dim();
    if batch != 1 || channels == 0 {
        return Err(PredictorError::shape_mismatch(
            "segmentation decode",
            "[1, C, H, W] with C > 0",
            scores.shape(),
        ));
    }

    let per_pixel = scores.index_axis(Axis(0), 0);
    let mut mask = Array2::<u32>::zeros((height, width));
    Zip::from(&mut mask)
        .and(per_pixel.lanes(Axis(0)))
        .for_each(|label, lane| *label = first_max(lane));
    Ok(mask)
}

fn first_max(lane: ArrayView1<f32>) -> u32 {
    let mut best = 0;
    for (index, &value) in lane.iter().enumerate().skip(1) {
        if value > lane[best] {
            best = index;
        }
    }
    best as u32
}

/// Scales the mask into `[0, 1]` by its own maximum.
///
/// An all-background mask (maximum 0) stays all zero.
pub fn normalize_mask(mask: &Array2<u32>) -> Array2<f32> {
    match mask.iter().copied().max() {
        Some(max) if max > 0 => mask.mapv(|v| v as f32 / max as f32),
        _ => Array2::zeros(mask.raw_dim()),
    }
}

/// Blends the color-mapped segmentation over the original image.
///
/// `scores` must be `[1, C, 224, 224]`. The original is resized to 224x224 on
/// its own, independent of the model input.
pub fn compose_image(scores: ArrayView4<f32>, original: &RgbImage) -> Result<RgbImage> {
    let size = INPUT_SIZE as usize;
    if scores.dim().2 != size || scores.dim().3 != size {
        return Err(PredictorError::shape_mismatch(
            "overlay compose",
            format!("[1, C, {}, {}]", size, size),
            scores.shape(),
        ));
    }

    let mask = segmentation_mask(scores)?;
    let colored = palette::colorize(normalize_mask(&mask).view());
    let resized = imageops::resize(original, INPUT_SIZE, INPUT_SIZE, FilterType::CatmullRom);

    blend::blend(&resized, &colored, BASE_WEIGHT).map_err(|e| PredictorError::Encoding {
        operation: "overlay blend".to_string(),
        source: e.into(),
    })
}

/// Lossless PNG, then standard base64.
pub fn encode_png_base64(image: &RgbImage) -> Result<String> {
    let mut png_data = Vec::new();
    PngEncoder::new(&mut png_data).write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        image::ExtendedColorType::Rgb8,
    )?;
    Ok(general_purpose::STANDARD.encode(&png_data))
}

/// `compose_image` followed by `encode_png_base64`.
pub fn compose(scores: ArrayView4<f32>, original: &RgbImage) -> Result<String> {
    encode_png_base64(&compose_image(scores, original)?)
}

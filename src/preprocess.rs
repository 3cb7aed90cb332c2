use image::{imageops, imageops::FilterType, RgbImage};
use ndarray::prelude::*;
use nshare::AsNdarray3;

use crate::errors::{PredictorError, Result};

/// Side length of the square input both networks expect.
pub const INPUT_SIZE: u32 = 224;

/// Decodes any supported raster and converts it to 8-bit RGB.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage> {
    let image = image::load_from_memory(bytes)
        .map_err(|source| PredictorError::UnsupportedImage { source })?;
    Ok(image.into_rgb8())
}

/// Maps an image of any size to a `[1, 3, 224, 224]` tensor in `[0, 1]`.
///
/// Bilinear resize straight to the target size (aspect ratio is not kept),
/// then channel values divided by 255. No mean/std normalization.
pub fn prepare(image: &RgbImage) -> Array4<f32> {
    let resized = imageops::resize(image, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);
    resized
        .as_ndarray3()
        .insert_axis(Axis(0))
        .mapv(|v| f32::from(v) / 255.0)
}

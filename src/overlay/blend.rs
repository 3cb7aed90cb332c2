use anyhow::{ensure, Result};
use image::{Rgb, RgbImage};

/// `base_weight * base + (1 - base_weight) * overlay`, truncated to u8.
pub fn blend(base: &RgbImage, overlay: &RgbImage, base_weight: f64) -> Result<RgbImage> {
    ensure!(
        base.dimensions() == overlay.dimensions(),
        "Image and overlay dimensions do not match: {:?} vs {:?}",
        base.dimensions(),
        overlay.dimensions()
    );
    ensure!(
        (0.0..=1.0).contains(&base_weight),
        "Blend weight {} outside [0, 1]",
        base_weight
    );

    let overlay_weight = 1.0 - base_weight;
    let mix = |a: u8, b: u8| {
        (base_weight * f64::from(a) + overlay_weight * f64::from(b)).clamp(0.0, 255.0) as u8
    };

    let (width, height) = base.dimensions();
    Ok(RgbImage::from_fn(width, height, |x, y| {
        let Rgb([r0, g0, b0]) = *base.get_pixel(x, y);
        let Rgb([r1, g1, b1]) = *overlay.get_pixel(x, y);
        Rgb([mix(r0, r1), mix(g0, g1), mix(b0, b1)])
    }))
}

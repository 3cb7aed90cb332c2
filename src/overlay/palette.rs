use image::{Rgb, RgbImage};
use ndarray::ArrayView2;

/// Ten evenly spaced stops of the perceptually uniform "plasma" colormap.
///
/// Linear interpolation between these approximates matplotlib's 256-entry
/// `plasma` table; intermediate levels can differ from it by about one unit
/// per channel.
const PLASMA: [[u8; 3]; 10] = [
    [13, 8, 135],
    [70, 3, 159],
    [114, 1, 168],
    [156, 23, 158],
    [189, 55, 134],
    [216, 87, 107],
    [237, 121, 83],
    [251, 159, 58],
    [253, 202, 38],
    [240, 249, 33],
];

/// Color for a scalar in `[0, 1]`; values outside are clamped.
pub fn plasma(value: f32) -> Rgb<u8> {
    let value = if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) };
    let position = value * (PLASMA.len() - 1) as f32;
    let lower = (position.floor() as usize).min(PLASMA.len() - 2);
    let t = position - lower as f32;

    let [r0, g0, b0] = PLASMA[lower];
    let [r1, g1, b1] = PLASMA[lower + 1];
    let lerp = |a: u8, b: u8| (f32::from(a) + (f32::from(b) - f32::from(a)) * t).round() as u8;
    Rgb([lerp(r0, r1), lerp(g0, g1), lerp(b0, b1)])
}

/// Maps a `[H, W]` scalar field to an RGB image of the same size.
pub fn colorize(field: ArrayView2<f32>) -> RgbImage {
    let (height, width) = field.dim();
    RgbImage::from_fn(width as u32, height as u32, |x, y| {
        plasma(field[[y as usize, x as usize]])
    })
}

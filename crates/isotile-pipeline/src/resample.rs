//! Bicubic downscaling to the working resolution.
//!
//! Inputs that exceed the working resolution on either axis are
//! resampled to exactly the working size (aspect ratio is not kept;
//! the grid and the tiles only care about the working raster).
//! Inputs at or below it pass through untouched. There is no upscaling.
//!
//! The same row-band kernel backs the sequential [`resample`] and the
//! per-worker resample phase, so both paths produce identical bytes.

use std::ops::Range;

use crate::types::{Dimensions, RgbImage};

/// Bytes per pixel in an [`RgbImage`] buffer.
pub const CHANNELS: usize = 3;

/// Whether an image of `source` size must be resampled to fit `target`.
///
/// An empty source has no pixels to interpolate from and always passes
/// through, whatever its other extent.
#[must_use]
pub const fn needs_resample(source: Dimensions, target: Dimensions) -> bool {
    source.width > 0
        && source.height > 0
        && (source.width > target.width || source.height > target.height)
}

/// Downscale `image` to `target` if it is larger on either axis.
///
/// Returns the input unchanged (moved, not copied) when it already
/// fits.
#[must_use]
pub fn resample(image: RgbImage, target: Dimensions) -> RgbImage {
    if !needs_resample(Dimensions::of(&image), target) {
        return image;
    }

    let mut out = RgbImage::new(target.width, target.height);
    resample_rows(&image, target, 0..target.height, &mut out);
    out
}

/// Resample destination rows `rows` of a `target`-sized image into
/// `band`.
///
/// `band` holds exactly `rows.len()` rows of `target.width` pixels.
/// Each destination pixel `(x, y)` maps to normalized coordinates
/// `(x / (w - 1), y / (h - 1))` and is interpolated from the 4×4 source
/// neighbourhood.
pub fn resample_rows(source: &RgbImage, target: Dimensions, rows: Range<u32>, band: &mut [u8]) {
    let stride = target.width as usize * CHANNELS;
    debug_assert_eq!(band.len(), rows.len() * stride, "band does not match row range");

    #[allow(clippy::cast_precision_loss)]
    let (last_x, last_y) = (
        (target.width.saturating_sub(1)).max(1) as f32,
        (target.height.saturating_sub(1)).max(1) as f32,
    );

    for (y, dst_row) in rows.zip(band.chunks_exact_mut(stride)) {
        #[allow(clippy::cast_precision_loss)]
        let v = y as f32 / last_y;
        for (x, dst) in (0..target.width).zip(dst_row.chunks_exact_mut(CHANNELS)) {
            #[allow(clippy::cast_precision_loss)]
            let u = x as f32 / last_x;
            dst.copy_from_slice(&sample_bicubic(source, u, v));
        }
    }
}

/// Cubic Hermite (Catmull-Rom) interpolation between `b` and `c` with
/// outer support points `a` and `d`, at `t` in `[0, 1)`.
fn cubic_hermite(a: f32, b: f32, c: f32, d: f32, t: f32) -> f32 {
    let c3 = (-a + 3.0 * b - 3.0 * c + d) / 2.0;
    let c2 = a - 2.5 * b + 2.0 * c - d / 2.0;
    let c1 = (c - a) / 2.0;
    c3.mul_add(t, c2).mul_add(t, c1).mul_add(t, b)
}

/// Source pixel at `(x, y)`, with out-of-range coordinates clamped to
/// the nearest edge pixel.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn pixel_clamped(image: &RgbImage, x: i64, y: i64) -> [u8; 3] {
    let max_x = i64::from(image.width()) - 1;
    let max_y = i64::from(image.height()) - 1;
    image.get_pixel(x.clamp(0, max_x) as u32, y.clamp(0, max_y) as u32).0
}

/// Sample `image` at normalized coordinates `(u, v)` with a bicubic
/// kernel. Each channel is interpolated independently and clamped to
/// `[0, 255]`.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn sample_bicubic(image: &RgbImage, u: f32, v: f32) -> [u8; 3] {
    let x = u.mul_add(image.width() as f32, -0.5);
    let y = v.mul_add(image.height() as f32, -0.5);
    let (x_floor, y_floor) = (x.floor(), y.floor());
    let (x_fract, y_fract) = (x - x_floor, y - y_floor);
    let (xi, yi) = (x_floor as i64, y_floor as i64);

    // 4×4 neighbourhood, row-major from (xi - 1, yi - 1).
    let mut patch = [[[0u8; 3]; 4]; 4];
    for (dy, patch_row) in (-1..=2).zip(patch.iter_mut()) {
        for (dx, px) in (-1..=2).zip(patch_row.iter_mut()) {
            *px = pixel_clamped(image, xi + dx, yi + dy);
        }
    }

    let mut sample = [0u8; 3];
    for (channel, out) in sample.iter_mut().enumerate() {
        let row = |r: usize| {
            let p = &patch[r];
            cubic_hermite(
                f32::from(p[0][channel]),
                f32::from(p[1][channel]),
                f32::from(p[2][channel]),
                f32::from(p[3][channel]),
                x_fract,
            )
        };
        let value = cubic_hermite(row(0), row(1), row(2), row(3), y_fract);
        *out = value.clamp(0.0, 255.0) as u8;
    }
    sample
}

//! Marching squares: classify each grid cell and stamp its tile.
//!
//! A cell's configuration code packs its four corner samples,
//! clockwise from the top-left, into four bits:
//!
//! ```text
//!  TL (8) ── TR (4)
//!   │          │
//!  BL (1) ── BR (2)
//! ```
//!
//! The code selects one of the sixteen tiles, which is copied over the
//! cell's pixels. Pixels right of or below the last whole cell keep
//! their working-image values.

use std::ops::Range;

use crate::resample::CHANNELS;
use crate::sample::Grid;
use crate::tiles::{TILE_COUNT, TileSet};
use crate::types::{PipelineError, RgbImage};

/// How many cells were stamped with each configuration code.
pub type ConfigurationCounts = [u64; TILE_COUNT];

/// Configuration code of the cell whose top-left sample is
/// `(col, row)`.
#[must_use]
pub fn configuration(grid: &Grid, col: usize, row: usize) -> u8 {
    8 * grid.get(col, row)
        + 4 * grid.get(col + 1, row)
        + 2 * grid.get(col + 1, row + 1)
        + grid.get(col, row + 1)
}

/// Stamp the tiles of grid rows `rows` into `band`.
///
/// `band` holds the image rows covered by those cells: exactly
/// `rows.len() * step_y` rows of `image_width` pixels, starting at
/// image row `rows.start * step_y`. The tiles must be
/// `step_x × step_y`.
pub fn stamp_rows(
    band: &mut [u8],
    image_width: u32,
    grid: &Grid,
    tiles: &TileSet,
    rows: Range<usize>,
) -> ConfigurationCounts {
    let shape = grid.shape();
    let stride = image_width as usize * CHANNELS;
    let tile_stride = shape.step_x as usize * CHANNELS;
    let tile_height = shape.step_y as usize;
    debug_assert_eq!(band.len(), rows.len() * tile_height * stride);

    let mut counts = [0; TILE_COUNT];
    for (band_row, r) in rows.enumerate() {
        for c in 0..shape.cols {
            let code = configuration(grid, c, r);
            counts[usize::from(code)] += 1;

            let tile = tiles.tile(code).as_raw();
            for (t, src) in tile.chunks_exact(tile_stride).enumerate() {
                let start = (band_row * tile_height + t) * stride + c * tile_stride;
                band[start..start + tile_stride].copy_from_slice(src);
            }
        }
    }
    counts
}

/// Stamp every cell of `grid` into `image` on a single thread.
///
/// # Errors
///
/// Returns [`PipelineError::TileStepMismatch`] if the tiles are not
/// exactly one grid step in size.
pub fn stamp(
    image: &mut RgbImage,
    grid: &Grid,
    tiles: &TileSet,
) -> Result<ConfigurationCounts, PipelineError> {
    let shape = grid.shape();
    tiles.ensure_step(shape.step_x, shape.step_y)?;

    let width = image.width();
    let covered = shape.rows * shape.step_y as usize * width as usize * CHANNELS;
    let pixels: &mut [u8] = image;
    Ok(stamp_rows(
        &mut pixels[..covered],
        width,
        grid,
        tiles,
        0..shape.rows,
    ))
}

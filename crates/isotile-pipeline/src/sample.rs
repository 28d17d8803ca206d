//! Grid sampling: threshold the working image at regular steps.
//!
//! The grid has one sample per `step_x × step_y` cell corner. With
//! `p = width / step_x` and `q = height / step_y` there are `p + 1`
//! sample columns and `q + 1` sample rows. The extra column and row
//! have no regular sample point inside the image, so they read the
//! image's last pixel column and last pixel row instead. The corner
//! sample `(p, q)` is always 0.
//!
//! A sample is 1 ("inside") when the integer average of its three
//! channels is at most `sigma`, and 0 otherwise.

use std::ops::Range;

use crate::resample::CHANNELS;
use crate::types::{Dimensions, PipelineConfig, RgbImage};

/// Extent of the marching cells over an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridShape {
    /// Cells across (`p`). The grid is one sample wider.
    pub cols: usize,
    /// Cells down (`q`). The grid is one sample taller.
    pub rows: usize,
    /// Horizontal pixel distance between samples.
    pub step_x: u32,
    /// Vertical pixel distance between samples.
    pub step_y: u32,
}

impl GridShape {
    /// Grid shape for an image of `image` size, capped at the working
    /// resolution.
    ///
    /// An empty image yields a single corner sample and no cells.
    #[must_use]
    pub fn new(image: Dimensions, config: &PipelineConfig) -> Self {
        let (cols, rows) = if image.width == 0 || image.height == 0 {
            (0, 0)
        } else {
            (
                (image.width.min(config.working_width) / config.step_x) as usize,
                (image.height.min(config.working_height) / config.step_y) as usize,
            )
        };
        Self {
            cols,
            rows,
            step_x: config.step_x,
            step_y: config.step_y,
        }
    }

    /// Samples per grid row (`p + 1`).
    #[must_use]
    pub const fn width(&self) -> usize {
        self.cols + 1
    }

    /// Samples per grid column (`q + 1`).
    #[must_use]
    pub const fn height(&self) -> usize {
        self.rows + 1
    }
}

/// Binary sample grid, stored flat in row-major order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grid {
    shape: GridShape,
    cells: Vec<u8>,
}

impl Grid {
    /// An all-zero grid of the given shape.
    #[must_use]
    pub fn zeroed(shape: GridShape) -> Self {
        Self {
            shape,
            cells: vec![0; shape.width() * shape.height()],
        }
    }

    /// Shape of the cell lattice this grid samples.
    #[must_use]
    pub const fn shape(&self) -> GridShape {
        self.shape
    }

    /// Samples per row (`p + 1`).
    #[must_use]
    pub const fn width(&self) -> usize {
        self.shape.width()
    }

    /// Samples per column (`q + 1`).
    #[must_use]
    pub const fn height(&self) -> usize {
        self.shape.height()
    }

    /// Sample at grid column `col`, grid row `row`.
    ///
    /// # Panics
    ///
    /// Panics if the coordinate lies outside the grid.
    #[must_use]
    pub fn get(&self, col: usize, row: usize) -> u8 {
        self.cells[row * self.width() + col]
    }

    /// Row-major sample buffer.
    #[must_use]
    pub fn as_raw(&self) -> &[u8] {
        &self.cells
    }

    /// Number of samples that are inside the contour.
    #[must_use]
    pub fn inside_count(&self) -> usize {
        self.cells.iter().filter(|&&v| v == 1).count()
    }

    /// Copy full grid rows starting at `first_row`, as produced by
    /// [`sample_rows`].
    pub fn write_rows(&mut self, first_row: usize, band: &[u8]) {
        let start = first_row * self.width();
        self.cells[start..start + band.len()].copy_from_slice(band);
    }

    /// Copy the boundary-row samples starting at `first_col`, as
    /// produced by [`sample_boundary_row`].
    pub fn write_boundary_row(&mut self, first_col: usize, band: &[u8]) {
        let start = self.shape.rows * self.width() + first_col;
        self.cells[start..start + band.len()].copy_from_slice(band);
    }

    /// Clear the corner sample `(p, q)`, which has no sample point.
    pub fn clear_corner(&mut self) {
        let corner = self.cells.len() - 1;
        self.cells[corner] = 0;
    }
}

/// 1 if the pixel's channel average is at most `sigma`, else 0.
#[must_use]
pub fn threshold(pixel: [u8; 3], sigma: u8) -> u8 {
    let sum = u16::from(pixel[0]) + u16::from(pixel[1]) + u16::from(pixel[2]);
    u8::from(sum / 3 <= u16::from(sigma))
}

/// Read access to an RGB raster one pixel row at a time.
///
/// Sampling only ever touches whole rows, so it can read images that
/// are not held in a single [`RgbImage`].
pub trait PixelRows {
    /// Width in pixels.
    fn width(&self) -> u32;

    /// Height in pixels.
    fn height(&self) -> u32;

    /// Call `read` with the `width * 3` bytes of pixel row `y`.
    fn with_row<R>(&self, y: u32, read: impl FnOnce(&[u8]) -> R) -> R;
}

impl PixelRows for RgbImage {
    fn width(&self) -> u32 {
        self.dimensions().0
    }

    fn height(&self) -> u32 {
        self.dimensions().1
    }

    fn with_row<R>(&self, y: u32, read: impl FnOnce(&[u8]) -> R) -> R {
        let stride = self.dimensions().0 as usize * CHANNELS;
        let start = y as usize * stride;
        read(&self.as_raw()[start..start + stride])
    }
}

/// Sample grid rows `rows` (each `p + 1` samples wide, boundary column
/// included).
///
/// The returned buffer is ready for [`Grid::write_rows`].
#[must_use]
pub fn sample_rows<I: PixelRows + ?Sized>(
    image: &I,
    shape: &GridShape,
    sigma: u8,
    rows: Range<usize>,
) -> Vec<u8> {
    let mut band = Vec::with_capacity(rows.len() * shape.width());
    let last_x = image.width().saturating_sub(1);
    for r in rows {
        image.with_row(pixel_coord(r, shape.step_y), |row| {
            for c in 0..shape.cols {
                band.push(threshold(pixel_at(row, pixel_coord(c, shape.step_x)), sigma));
            }
            band.push(threshold(pixel_at(row, last_x), sigma));
        });
    }
    band
}

/// Sample the boundary row (grid row `q`) at grid columns `cols`, from
/// the image's last pixel row.
///
/// The returned buffer is ready for [`Grid::write_boundary_row`].
#[must_use]
pub fn sample_boundary_row<I: PixelRows + ?Sized>(
    image: &I,
    shape: &GridShape,
    sigma: u8,
    cols: Range<usize>,
) -> Vec<u8> {
    if cols.is_empty() {
        return Vec::new();
    }
    let last_y = image.height().saturating_sub(1);
    image.with_row(last_y, |row| {
        cols.map(|c| threshold(pixel_at(row, pixel_coord(c, shape.step_x)), sigma))
            .collect()
    })
}

/// Sample the whole grid of `image` on a single thread.
#[must_use]
pub fn sample_grid(image: &RgbImage, config: &PipelineConfig) -> Grid {
    let shape = GridShape::new(Dimensions::of(image), config);
    let mut grid = Grid::zeroed(shape);
    grid.write_rows(0, &sample_rows(image, &shape, config.sigma, 0..shape.rows));
    grid.write_boundary_row(0, &sample_boundary_row(image, &shape, config.sigma, 0..shape.cols));
    grid.clear_corner();
    grid
}

/// The pixel at column `x` of a packed RGB row.
fn pixel_at(row: &[u8], x: u32) -> [u8; 3] {
    let i = x as usize * CHANNELS;
    [row[i], row[i + 1], row[i + 2]]
}

/// Pixel coordinate of grid index `index` at `step`.
///
/// Grid indices are bounded by `extent / step`, so the product fits in
/// `u32`.
#[allow(clippy::cast_possible_truncation)]
const fn pixel_coord(index: usize, step: u32) -> u32 {
    index as u32 * step
}

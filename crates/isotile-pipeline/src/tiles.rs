//! The contour tile set: one pre-rendered image per configuration code.
//!
//! Tiles are loaded once, validated to share a single size, and then
//! only read. Every worker holds a shared reference; no locking is
//! involved.

use crate::codec;
use crate::types::{Dimensions, PipelineError, RgbImage};

/// Number of marching-squares configurations (four binary corners).
pub const TILE_COUNT: usize = 16;

/// Sixteen equally sized contour tiles indexed by configuration code.
#[derive(Debug, Clone)]
pub struct TileSet {
    tiles: [RgbImage; TILE_COUNT],
}

impl TileSet {
    /// Build a tile set from already decoded images, in code order.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::TileShape`] if any tile differs in size
    /// from tile 0.
    pub fn from_images(tiles: [RgbImage; TILE_COUNT]) -> Result<Self, PipelineError> {
        let expected = Dimensions::of(&tiles[0]);
        for (index, tile) in tiles.iter().enumerate().skip(1) {
            if Dimensions::of(tile) != expected {
                return Err(PipelineError::TileShape {
                    index,
                    actual_width: tile.width(),
                    actual_height: tile.height(),
                    expected_width: expected.width,
                    expected_height: expected.height,
                });
            }
        }
        Ok(Self { tiles })
    }

    /// Decode a tile set from encoded images, in code order.
    ///
    /// Decoding stops at the first failure; no partial set is returned.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::TileCount`] unless exactly
    /// [`TILE_COUNT`] buffers are given, [`PipelineError::TileDecode`]
    /// for an unreadable tile, and [`PipelineError::TileShape`] for
    /// mismatched sizes.
    pub fn from_encoded<B: AsRef<[u8]>>(encoded: &[B]) -> Result<Self, PipelineError> {
        if encoded.len() != TILE_COUNT {
            return Err(PipelineError::TileCount {
                found: encoded.len(),
            });
        }

        let decoded = encoded
            .iter()
            .enumerate()
            .map(|(index, bytes)| {
                codec::decode_rgb(bytes.as_ref()).map_err(|e| match e {
                    PipelineError::ImageDecode(source) => {
                        PipelineError::TileDecode { index, source }
                    }
                    other => other,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let tiles: [RgbImage; TILE_COUNT] = decoded
            .try_into()
            .map_err(|v: Vec<RgbImage>| PipelineError::TileCount { found: v.len() })?;
        Self::from_images(tiles)
    }

    /// The tile for a configuration code.
    ///
    /// Only the low four bits of `code` are used.
    #[must_use]
    pub fn tile(&self, code: u8) -> &RgbImage {
        &self.tiles[usize::from(code & 0x0F)]
    }

    /// Size shared by every tile.
    #[must_use]
    pub fn dimensions(&self) -> Dimensions {
        Dimensions::of(&self.tiles[0])
    }

    /// Check that the tiles exactly cover one grid cell.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::TileStepMismatch`] otherwise.
    pub fn ensure_step(&self, step_x: u32, step_y: u32) -> Result<(), PipelineError> {
        let dims = self.dimensions();
        if dims.width == step_x && dims.height == step_y {
            Ok(())
        } else {
            Err(PipelineError::TileStepMismatch {
                tile_width: dims.width,
                tile_height: dims.height,
                step_x,
                step_y,
            })
        }
    }
}

/// File name of the tile for a configuration code inside a tile
/// directory (`0.ppm` .. `15.ppm`).
#[must_use]
pub fn tile_file_name(index: usize) -> String {
    format!("{index}.ppm")
}

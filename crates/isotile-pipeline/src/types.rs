//! Shared types for the isotile contour pipeline.

use serde::{Deserialize, Serialize};

/// Re-export `RgbImage` so downstream crates can hand images to the
/// pipeline without depending on `image` directly.
pub use image::RgbImage;

/// Image or grid dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Horizontal extent.
    pub width: u32,
    /// Vertical extent.
    pub height: u32,
}

impl Dimensions {
    /// Create new dimensions.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Dimensions of an existing image.
    #[must_use]
    pub fn of(image: &RgbImage) -> Self {
        Self::new(image.width(), image.height())
    }

    /// Total cell count (`width * height`).
    #[must_use]
    pub fn area(self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// Configuration for the contour pipeline.
///
/// The command-line front end only sets `threads`; everything else keeps
/// its default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Horizontal distance in pixels between grid samples. Must equal
    /// the tile width.
    pub step_x: u32,

    /// Vertical distance in pixels between grid samples. Must equal the
    /// tile height.
    pub step_y: u32,

    /// Intensity threshold. A sample whose channel average is at most
    /// `sigma` is inside the contour (grid value 1).
    pub sigma: u8,

    /// Maximum working width. Wider (or taller) inputs are resampled to
    /// exactly `working_width × working_height`.
    pub working_width: u32,

    /// Maximum working height.
    pub working_height: u32,

    /// Number of worker threads.
    pub threads: usize,
}

impl PipelineConfig {
    /// Default tile edge length and grid step.
    pub const DEFAULT_STEP: u32 = 8;
    /// Default sampling threshold.
    pub const DEFAULT_SIGMA: u8 = 200;
    /// Default maximum working width and height.
    pub const DEFAULT_WORKING_RESOLUTION: u32 = 2048;
    /// Default worker count.
    pub const DEFAULT_THREADS: usize = 1;

    /// The resampling target as [`Dimensions`].
    #[must_use]
    pub const fn working_dimensions(&self) -> Dimensions {
        Dimensions::new(self.working_width, self.working_height)
    }

    /// Check the invariants the pipeline relies on.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if `threads` is zero,
    /// either step is zero, or the working resolution is smaller than
    /// 2 pixels on either axis (bicubic coordinates divide by
    /// `extent - 1`).
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.threads == 0 {
            return Err(PipelineError::InvalidConfig(
                "thread count must be at least 1".to_string(),
            ));
        }
        if self.step_x == 0 || self.step_y == 0 {
            return Err(PipelineError::InvalidConfig(format!(
                "grid step must be non-zero, got {}x{}",
                self.step_x, self.step_y
            )));
        }
        if self.working_width < 2 || self.working_height < 2 {
            return Err(PipelineError::InvalidConfig(format!(
                "working resolution must be at least 2x2, got {}x{}",
                self.working_width, self.working_height
            )));
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            step_x: Self::DEFAULT_STEP,
            step_y: Self::DEFAULT_STEP,
            sigma: Self::DEFAULT_SIGMA,
            working_width: Self::DEFAULT_WORKING_RESOLUTION,
            working_height: Self::DEFAULT_WORKING_RESOLUTION,
            threads: Self::DEFAULT_THREADS,
        }
    }
}

/// Result of running the full contour pipeline.
#[derive(Debug, Clone)]
pub struct ProcessResult {
    /// The working image with every grid cell's tile stamped in.
    pub image: RgbImage,

    /// Dimensions of the decoded source image.
    pub source_dimensions: Dimensions,

    /// Whether the source was resampled down to the working resolution.
    pub resampled: bool,
}

/// Errors that can occur during pipeline processing.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Failed to decode the input image.
    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] image::ImageError),

    /// The input image bytes were empty.
    #[error("input image data is empty")]
    EmptyInput,

    /// Failed to encode the output image.
    #[error("failed to encode image: {0}")]
    ImageEncode(#[source] image::ImageError),

    /// Pipeline configuration is invalid.
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    /// The wrong number of contour tiles was supplied.
    #[error("expected {expected} contour tiles, found {found}", expected = crate::tiles::TILE_COUNT)]
    TileCount {
        /// Number of tiles actually supplied.
        found: usize,
    },

    /// A contour tile could not be decoded.
    #[error("failed to decode contour tile {index}: {source}")]
    TileDecode {
        /// Configuration code of the tile.
        index: usize,
        /// Underlying decode error.
        #[source]
        source: image::ImageError,
    },

    /// A contour tile does not share the size of tile 0.
    #[error("contour tile {index} is {actual_width}x{actual_height}, expected {expected_width}x{expected_height}")]
    TileShape {
        /// Configuration code of the offending tile.
        index: usize,
        /// Width of the offending tile.
        actual_width: u32,
        /// Height of the offending tile.
        actual_height: u32,
        /// Width of tile 0.
        expected_width: u32,
        /// Height of tile 0.
        expected_height: u32,
    },

    /// The tile size does not match the configured grid step.
    #[error("contour tiles are {tile_width}x{tile_height} but the grid step is {step_x}x{step_y}")]
    TileStepMismatch {
        /// Tile width.
        tile_width: u32,
        /// Tile height.
        tile_height: u32,
        /// Configured horizontal step.
        step_x: u32,
        /// Configured vertical step.
        step_y: u32,
    },

    /// The operating system refused to start a worker thread.
    #[error("failed to spawn worker {worker}: {source}")]
    WorkerSpawn {
        /// Index of the worker that could not be started.
        worker: usize,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// A worker thread panicked.
    #[error("worker {worker} panicked")]
    WorkerPanicked {
        /// Index of the worker that panicked.
        worker: usize,
    },

    /// A phase barrier was released early because another worker failed.
    #[error("phase barrier abandoned after a worker failure")]
    PhaseAbandoned,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_constants() {
        let config = PipelineConfig::default();
        assert_eq!(config.step_x, 8);
        assert_eq!(config.step_y, 8);
        assert_eq!(config.sigma, 200);
        assert_eq!(config.working_dimensions(), Dimensions::new(2048, 2048));
        assert_eq!(config.threads, 1);
    }

    #[test]
    fn default_config_is_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_threads_rejected() {
        let config = PipelineConfig {
            threads: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn zero_step_rejected() {
        let config = PipelineConfig {
            step_y: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn degenerate_working_resolution_rejected() {
        let config = PipelineConfig {
            working_width: 1,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn config_deserializes_with_missing_fields() {
        let config: PipelineConfig = serde_json::from_str(r#"{"threads": 4}"#).unwrap();
        assert_eq!(config.threads, 4);
        assert_eq!(config.step_x, PipelineConfig::DEFAULT_STEP);
    }

    #[test]
    fn dimensions_area() {
        assert_eq!(Dimensions::new(2048, 2048).area(), 4_194_304);
        assert_eq!(Dimensions::new(0, 10).area(), 0);
    }

    #[test]
    fn tile_count_error_mentions_expected() {
        let msg = PipelineError::TileCount { found: 3 }.to_string();
        assert_eq!(msg, "expected 16 contour tiles, found 3");
    }
}

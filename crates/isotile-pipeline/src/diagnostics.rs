//! Pipeline diagnostics: timing and counts for each phase of a run.
//!
//! [`process_with_diagnostics`] runs the same pipeline as
//! [`process`](crate::process) and additionally reports how long each
//! phase took and what it produced. Timestamps come from a caller
//! supplied [`Clock`], so the crate itself never reads the system time.
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::march::ConfigurationCounts;
use crate::tiles::TileSet;
use crate::types::{Dimensions, PipelineConfig, PipelineError, ProcessResult};
use crate::{codec, parallel};

/// Source of timestamps for diagnostics.
pub trait Clock {
    /// A point in time.
    type Instant;

    /// The current time.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Diagnostics collected from a single pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDiagnostics {
    /// Image decoding.
    pub decode: StageDiagnostics,
    /// Downscale to the working resolution (a pass-through when the
    /// source already fits).
    pub resample: StageDiagnostics,
    /// Grid sampling.
    pub sample: StageDiagnostics,
    /// Classification and tile stamping.
    pub march: StageDiagnostics,
    /// Total wall-clock duration of the entire pipeline (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Summary across all phases.
    pub summary: PipelineSummary,
}

/// Diagnostics for a single pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics.
    pub metrics: StageMetrics,
}

/// Stage-specific metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Image decoding metrics.
    Decode {
        /// Size of the input image bytes.
        input_bytes: usize,
        /// Decoded image width in pixels.
        width: u32,
        /// Decoded image height in pixels.
        height: u32,
        /// Total pixel count (`width * height`).
        pixel_count: u64,
    },
    /// Resampling metrics.
    Resample {
        /// Working image width in pixels.
        width: u32,
        /// Working image height in pixels.
        height: u32,
        /// Whether the source was downscaled.
        resampled: bool,
    },
    /// Grid sampling metrics.
    Sample {
        /// Samples per grid row (`p + 1`).
        grid_width: usize,
        /// Samples per grid column (`q + 1`).
        grid_height: usize,
        /// Threshold used.
        sigma: u8,
        /// Samples inside the contour.
        inside_count: usize,
    },
    /// Stamping metrics.
    March {
        /// Number of cells stamped.
        cell_count: u64,
        /// Distinct configuration codes that occurred.
        distinct_configurations: usize,
    },
}

/// High-level summary for the entire run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSummary {
    /// Source image width in pixels.
    pub image_width: u32,
    /// Source image height in pixels.
    pub image_height: u32,
    /// Output image width in pixels.
    pub working_width: u32,
    /// Output image height in pixels.
    pub working_height: u32,
    /// Worker threads used.
    pub threads: usize,
    /// Cells stamped with each configuration code, indexed by code.
    pub configuration_histogram: ConfigurationCounts,
}

/// Run the full pipeline, collecting per-phase diagnostics.
///
/// # Errors
///
/// Same as [`process`](crate::process).
pub fn process_with_diagnostics<C>(
    image_bytes: &[u8],
    tiles: &TileSet,
    config: &PipelineConfig,
    clock: &C,
) -> Result<(ProcessResult, PipelineDiagnostics), PipelineError>
where
    C: Clock + Sync,
    C::Instant: Sync,
{
    let start = clock.now();

    let image = codec::decode_rgb(image_bytes)?;
    let source = Dimensions::of(&image);
    let decode = StageDiagnostics {
        duration: clock.elapsed(&start),
        metrics: StageMetrics::Decode {
            input_bytes: image_bytes.len(),
            width: source.width,
            height: source.height,
            pixel_count: source.area(),
        },
    };

    let run = parallel::run(image, tiles, config, clock)?;
    let working = Dimensions::of(&run.image);
    let grid = &run.grid;

    let diagnostics = PipelineDiagnostics {
        decode,
        resample: StageDiagnostics {
            duration: run.timings.resample,
            metrics: StageMetrics::Resample {
                width: working.width,
                height: working.height,
                resampled: run.resampled,
            },
        },
        sample: StageDiagnostics {
            duration: run.timings.sample,
            metrics: StageMetrics::Sample {
                grid_width: grid.width(),
                grid_height: grid.height(),
                sigma: config.sigma,
                inside_count: grid.inside_count(),
            },
        },
        march: StageDiagnostics {
            duration: run.timings.march,
            metrics: StageMetrics::March {
                cell_count: run.counts.iter().sum(),
                distinct_configurations: run.counts.iter().filter(|&&n| n > 0).count(),
            },
        },
        total_duration: clock.elapsed(&start),
        summary: PipelineSummary {
            image_width: source.width,
            image_height: source.height,
            working_width: working.width,
            working_height: working.height,
            threads: config.threads,
            configuration_histogram: run.counts,
        },
    };

    Ok((
        ProcessResult {
            image: run.image,
            source_dimensions: source,
            resampled: run.resampled,
        },
        diagnostics,
    ))
}

impl PipelineDiagnostics {
    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Pipeline Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Image: {}x{} -> {}x{} ({} threads)",
            self.summary.image_width,
            self.summary.image_height,
            self.summary.working_width,
            self.summary.working_height,
            self.summary.threads,
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<24} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);
        let stages = [
            ("Decode", &self.decode),
            ("Resample", &self.resample),
            ("Sample", &self.sample),
            ("March", &self.march),
        ];
        for (name, diag) in stages {
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            lines.push(format!("{name:<24} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        }

        lines.push(String::new());
        lines.push("Configurations:".to_string());
        for (chunk, counts) in self.summary.configuration_histogram.chunks(4).enumerate() {
            let cells: Vec<String> = counts
                .iter()
                .enumerate()
                .map(|(i, n)| format!("{:>2}: {n:>8}", chunk * 4 + i))
                .collect();
            lines.push(format!("  {}", cells.join("  ")));
        }

        lines.join("\n")
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Format stage metrics into a compact detail string.
fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Decode {
            input_bytes,
            width,
            height,
            ..
        } => format!("{input_bytes} bytes -> {width}x{height}"),
        StageMetrics::Resample {
            width,
            height,
            resampled,
        } => {
            if *resampled {
                format!("bicubic -> {width}x{height}")
            } else {
                format!("pass-through {width}x{height}")
            }
        }
        StageMetrics::Sample {
            grid_width,
            grid_height,
            sigma,
            inside_count,
        } => {
            let total = grid_width * grid_height;
            #[allow(clippy::cast_precision_loss)]
            let density = if total > 0 {
                *inside_count as f64 / total as f64 * 100.0
            } else {
                0.0
            };
            format!("{grid_width}x{grid_height} sigma={sigma} inside={inside_count} ({density:.1}%)")
        }
        StageMetrics::March {
            cell_count,
            distinct_configurations,
        } => format!("{cell_count} cells, {distinct_configurations}/16 configurations"),
    }
}

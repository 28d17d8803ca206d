//! The multi-threaded contour run.
//!
//! A fixed number of scoped worker threads each execute three phases on
//! a static slice of the work:
//!
//! 1. **Resample**: destination rows `partition(id, n, working_height)`.
//!    Skipped when the source already fits the working resolution.
//! 2. **Sample**: grid rows `partition(id, n, q)` plus boundary-row
//!    columns `partition(id, n, p)`.
//! 3. **March**: grid rows `partition(id, n, q)`, every column.
//!
//! Phases are separated by a [`PhaseBarrier`]. The working image is a
//! single buffer, split before the workers start into the pixel-row
//! bands the march phase stamps (one per worker, plus the rows below
//! the last cell row). Each band has its own [`RwLock`]. Resampling
//! writes rows through it, sampling reads through it, and marching
//! locks the worker's own band and stamps it in place. Sampled grid
//! bands are deposited at the rendezvous and the first worker past the
//! second barrier assembles the grid every worker marches over.

use std::ops::Range;
use std::sync::{Mutex, OnceLock, PoisonError, RwLock};
use std::thread;
use std::time::Duration;

use crate::barrier::PhaseBarrier;
use crate::diagnostics::Clock;
use crate::march::{self, ConfigurationCounts};
use crate::partition::partition;
use crate::resample::{self, CHANNELS};
use crate::sample::{self, Grid, GridShape, PixelRows};
use crate::tiles::{TILE_COUNT, TileSet};
use crate::types::{Dimensions, PipelineConfig, PipelineError, RgbImage};

/// Everything a parallel run produced.
#[derive(Debug, Clone)]
pub struct ParallelRun {
    /// The stamped working image.
    pub image: RgbImage,
    /// Whether the source was downscaled.
    pub resampled: bool,
    /// The sample grid the tiles were chosen from.
    pub grid: Grid,
    /// Cells stamped per configuration code, summed over all workers.
    pub counts: ConfigurationCounts,
    /// Wall-clock time spent in each phase.
    pub timings: PhaseTimings,
}

/// Wall-clock duration of each phase, barrier waits included.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseTimings {
    /// Spawn to working image complete.
    pub resample: Duration,
    /// Working image complete to grid published.
    pub sample: Duration,
    /// Grid published to every worker joined.
    pub march: Duration,
}

/// Read-only inputs shared by every worker.
#[derive(Clone, Copy)]
struct Inputs<'a> {
    /// The image to downscale; `None` when the source is the working
    /// image.
    source: Option<&'a RgbImage>,
    tiles: &'a TileSet,
    sigma: u8,
    shape: GridShape,
    threads: usize,
}

/// The working image, split into pixel-row bands that are locked
/// independently.
struct BandedImage<'a> {
    dimensions: Dimensions,
    stride: usize,
    /// Contiguous row ranges covering `0..height`, with their bytes.
    bands: Vec<(Range<usize>, RwLock<&'a mut [u8]>)>,
}

impl<'a> BandedImage<'a> {
    /// Split `image` at the contiguous row ranges `ranges`, which start
    /// at row 0. The rows below the last range form one more band.
    fn new(image: &'a mut RgbImage, ranges: impl IntoIterator<Item = Range<usize>>) -> Self {
        let dimensions = Dimensions::of(image);
        let stride = working_stride(dimensions);
        let mut ranges: Vec<_> = ranges.into_iter().collect();
        let covered = ranges.last().map_or(0, |rows| rows.end);
        ranges.push(covered..dimensions.height as usize);

        let mut rest: &'a mut [u8] = image;
        let mut bands = Vec::with_capacity(ranges.len());
        for rows in ranges {
            let (band, tail) = std::mem::take(&mut rest).split_at_mut(rows.len() * stride);
            rest = tail;
            bands.push((rows, RwLock::new(band)));
        }
        Self {
            dimensions,
            stride,
            bands,
        }
    }

    /// Call `fill` with every run of `rows` that falls in one band,
    /// holding that band's write lock.
    fn write_rows(&self, rows: Range<usize>, mut fill: impl FnMut(Range<usize>, &mut [u8])) {
        for (band_rows, lock) in &self.bands {
            let overlap = rows.start.max(band_rows.start)..rows.end.min(band_rows.end);
            if overlap.is_empty() {
                continue;
            }
            let offset = (overlap.start - band_rows.start) * self.stride;
            let len = overlap.len() * self.stride;
            let mut band = lock.write().unwrap_or_else(PoisonError::into_inner);
            fill(overlap, &mut band[offset..offset + len]);
        }
    }
}

impl PixelRows for BandedImage<'_> {
    fn width(&self) -> u32 {
        self.dimensions.width
    }

    fn height(&self) -> u32 {
        self.dimensions.height
    }

    fn with_row<R>(&self, y: u32, read: impl FnOnce(&[u8]) -> R) -> R {
        let y = y as usize;
        let Some((rows, lock)) = self.bands.iter().find(|(rows, _)| rows.contains(&y)) else {
            return read(&[]);
        };
        let band = lock.read().unwrap_or_else(PoisonError::into_inner);
        let offset = (y - rows.start) * self.stride;
        read(&band[offset..offset + self.stride])
    }
}

/// A contiguous run of grid samples written by one worker.
#[derive(Debug)]
struct Band {
    /// Index of the first grid row or column.
    first: usize,
    bytes: Vec<u8>,
}

/// The sample-phase output of one worker.
#[derive(Debug)]
struct GridBands {
    rows: Band,
    boundary: Band,
}

/// One deposit slot per worker.
struct Exchange<T> {
    slots: Mutex<Vec<Option<T>>>,
}

impl<T> Exchange<T> {
    fn new(workers: usize) -> Self {
        Self {
            slots: Mutex::new(std::iter::repeat_with(|| None).take(workers).collect()),
        }
    }

    fn deposit(&self, worker: usize, value: T) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots[worker] = Some(value);
    }

    fn take_all(&self) -> Vec<T> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.iter_mut().filter_map(Option::take).collect()
    }
}

/// A value assembled once after a barrier, with the time it became
/// available.
struct Published<T> {
    value: T,
    at: Duration,
}

/// Shared state the workers meet at.
struct Rendezvous {
    barrier: PhaseBarrier,
    grid_bands: Exchange<GridBands>,
    /// When every resampled row was written.
    resampled_at: OnceLock<Duration>,
    grid: OnceLock<Published<Grid>>,
}

impl Rendezvous {
    fn new(workers: usize) -> Self {
        Self {
            barrier: PhaseBarrier::new(workers),
            grid_bands: Exchange::new(workers),
            resampled_at: OnceLock::new(),
            grid: OnceLock::new(),
        }
    }
}

/// Run the resample, sample and march phases over `config.threads`
/// workers.
///
/// The output is byte-identical for every thread count.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] for an invalid `config`,
/// [`PipelineError::TileStepMismatch`] if the tiles are not one grid
/// step in size, [`PipelineError::WorkerSpawn`] if a thread cannot be
/// started and [`PipelineError::WorkerPanicked`] if one panics.
pub fn run<C>(
    mut source: RgbImage,
    tiles: &TileSet,
    config: &PipelineConfig,
    clock: &C,
) -> Result<ParallelRun, PipelineError>
where
    C: Clock + Sync,
    C::Instant: Sync,
{
    config.validate()?;
    tiles.ensure_step(config.step_x, config.step_y)?;

    let target = config.working_dimensions();
    let resample = resample::needs_resample(Dimensions::of(&source), target);
    let working = if resample { target } else { Dimensions::of(&source) };
    let shape = GridShape::new(working, config);
    let threads = config.threads;

    tracing::info!(
        source_width = source.width(),
        source_height = source.height(),
        working_width = working.width,
        working_height = working.height,
        resample,
        threads,
        "starting contour run"
    );

    let mut downscaled = resample.then(|| RgbImage::new(working.width, working.height));
    let rendezvous = Rendezvous::new(threads);
    let start = clock.now();

    let (spawn_error, results) = {
        let (input, working_image) = match downscaled.as_mut() {
            Some(out) => (Some(&source), out),
            None => (None, &mut source),
        };
        let image = BandedImage::new(
            working_image,
            (0..threads).map(|id| march_pixel_rows(&partition(id, threads, shape.rows), shape)),
        );
        let inputs = Inputs {
            source: input,
            tiles,
            sigma: config.sigma,
            shape,
            threads,
        };
        let image = &image;
        let rendezvous = &rendezvous;
        let start = &start;

        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(threads);
            let mut spawn_error = None;
            for id in 0..threads {
                let spawned = thread::Builder::new()
                    .name(format!("isotile-worker-{id}"))
                    .spawn_scoped(scope, move || {
                        worker(id, inputs, image, rendezvous, clock, start)
                    });
                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(err) => {
                        tracing::error!(worker = id, error = %err, "failed to spawn worker");
                        rendezvous.barrier.abandon();
                        spawn_error = Some(PipelineError::WorkerSpawn {
                            worker: id,
                            source: err,
                        });
                        break;
                    }
                }
            }

            let results: Vec<_> = handles
                .into_iter()
                .enumerate()
                .map(|(worker, handle)| {
                    handle
                        .join()
                        .map_err(|_| PipelineError::WorkerPanicked { worker })
                        .and_then(|result| result)
                })
                .collect();
            (spawn_error, results)
        })
    };

    let worker_counts = collect_outputs(spawn_error, results)?;

    let Rendezvous {
        resampled_at,
        grid: published_grid,
        ..
    } = rendezvous;
    let (Some(resampled_at), Some(published_grid)) =
        (resampled_at.into_inner(), published_grid.into_inner())
    else {
        // Every worker returned Ok, so both barriers were passed.
        return Err(PipelineError::PhaseAbandoned);
    };

    let image = downscaled.unwrap_or(source);
    let mut counts = [0; TILE_COUNT];
    for worker in worker_counts {
        for (total, n) in counts.iter_mut().zip(worker) {
            *total += n;
        }
    }

    let finished = clock.elapsed(&start);
    let timings = PhaseTimings {
        resample: resampled_at,
        sample: published_grid.at.saturating_sub(resampled_at),
        march: finished.saturating_sub(published_grid.at),
    };
    tracing::info!(
        cells = counts.iter().sum::<u64>(),
        elapsed_ms = finished.as_secs_f64() * 1000.0,
        "contour run finished"
    );

    Ok(ParallelRun {
        image,
        resampled: resample,
        grid: published_grid.value,
        counts,
        timings,
    })
}

/// Pick the error to report, or unwrap every worker's counts.
///
/// A spawn failure or a worker's own error explains the run better
/// than the [`PipelineError::PhaseAbandoned`] it caused elsewhere.
fn collect_outputs(
    spawn_error: Option<PipelineError>,
    results: Vec<Result<ConfigurationCounts, PipelineError>>,
) -> Result<Vec<ConfigurationCounts>, PipelineError> {
    if let Some(e) = spawn_error {
        return Err(e);
    }

    let mut outputs = Vec::with_capacity(results.len());
    let mut abandoned = false;
    for result in results {
        match result {
            Ok(output) => outputs.push(output),
            Err(PipelineError::PhaseAbandoned) => abandoned = true,
            Err(e) => return Err(e),
        }
    }
    if abandoned {
        return Err(PipelineError::PhaseAbandoned);
    }
    Ok(outputs)
}

fn worker<C: Clock>(
    id: usize,
    inputs: Inputs<'_>,
    image: &BandedImage<'_>,
    rendezvous: &Rendezvous,
    clock: &C,
    start: &C::Instant,
) -> Result<ConfigurationCounts, PipelineError> {
    let guard = rendezvous.barrier.abandon_on_drop();
    let n = inputs.threads;
    let shape = inputs.shape;

    // Phase R.
    if let Some(source) = inputs.source {
        let rows = partition(id, n, image.dimensions.height as usize);
        tracing::debug!(worker = id, rows = ?rows, "resample");
        image.write_rows(rows, |overlap, band| {
            resample::resample_rows(source, image.dimensions, to_u32(&overlap), band);
        });
    }
    rendezvous.barrier.wait()?;
    rendezvous.resampled_at.get_or_init(|| clock.elapsed(start));

    // Phase S.
    let rows = partition(id, n, shape.rows);
    let cols = partition(id, n, shape.cols);
    tracing::debug!(worker = id, rows = ?rows, boundary_cols = ?cols, "sample");
    rendezvous.grid_bands.deposit(
        id,
        GridBands {
            rows: Band {
                first: rows.start,
                bytes: sample::sample_rows(image, &shape, inputs.sigma, rows.clone()),
            },
            boundary: Band {
                first: cols.start,
                bytes: sample::sample_boundary_row(image, &shape, inputs.sigma, cols),
            },
        },
    );
    rendezvous.barrier.wait()?;
    let grid = &rendezvous
        .grid
        .get_or_init(|| Published {
            value: assemble_grid(shape, rendezvous.grid_bands.take_all()),
            at: clock.elapsed(start),
        })
        .value;

    // Phase M. Band `id` holds exactly the pixel rows of grid rows `rows`.
    tracing::debug!(worker = id, rows = ?rows, "march");
    let (_, lock) = &image.bands[id];
    let mut band = lock.write().unwrap_or_else(PoisonError::into_inner);
    let counts = march::stamp_rows(&mut band, image.dimensions.width, grid, inputs.tiles, rows);
    drop(band);

    guard.disarm();
    Ok(counts)
}

fn assemble_grid(shape: GridShape, bands: Vec<GridBands>) -> Grid {
    let mut grid = Grid::zeroed(shape);
    for band in bands {
        grid.write_rows(band.rows.first, &band.rows.bytes);
        grid.write_boundary_row(band.boundary.first, &band.boundary.bytes);
    }
    grid.clear_corner();
    grid
}

/// Pixel rows covered by the cells of grid rows `rows`.
const fn march_pixel_rows(rows: &Range<usize>, shape: GridShape) -> Range<usize> {
    let step_y = shape.step_y as usize;
    rows.start * step_y..rows.end * step_y
}

/// Bytes per image row.
const fn working_stride(dimensions: Dimensions) -> usize {
    dimensions.width as usize * CHANNELS
}

/// Row ranges are partitions of a `u32` extent and always fit.
#[allow(clippy::cast_possible_truncation)]
const fn to_u32(rows: &Range<usize>) -> Range<u32> {
    rows.start as u32..rows.end as u32
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::Untimed;
    use crate::tiles::tests::solid_tiles;

    fn config(threads: usize) -> PipelineConfig {
        PipelineConfig {
            threads,
            ..PipelineConfig::default()
        }
    }

    fn pattern(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| {
            let v = if (x / 7 + y / 11) % 3 == 0 { 30 } else { 240 };
            image::Rgb([v, v.wrapping_add(5), v])
        })
    }

    fn sequential(source: RgbImage, tiles: &TileSet, config: &PipelineConfig) -> RgbImage {
        let mut image = resample::resample(source, config.working_dimensions());
        let grid = sample::sample_grid(&image, config);
        march::stamp(&mut image, &grid, tiles).unwrap();
        image
    }

    #[test]
    fn single_worker_matches_sequential() {
        let tiles = solid_tiles(8);
        let source = pattern(61, 45);
        let expected = sequential(source.clone(), &tiles, &config(1));
        let result = run(source, &tiles, &config(1), &Untimed).unwrap();
        assert_eq!(result.image, expected);
        assert!(!result.resampled);
    }

    #[test]
    fn worker_count_does_not_change_output() {
        let tiles = solid_tiles(8);
        let source = pattern(83, 70);
        let expected = sequential(source.clone(), &tiles, &config(1));
        for threads in [2, 3, 4, 8, 16] {
            let result = run(source.clone(), &tiles, &config(threads), &Untimed).unwrap();
            assert_eq!(result.image, expected, "{threads} workers");
        }
    }

    #[test]
    fn resampled_run_matches_sequential() {
        let tiles = solid_tiles(8);
        let small = PipelineConfig {
            working_width: 40,
            working_height: 32,
            ..config(1)
        };
        let source = pattern(100, 90);
        let expected = sequential(source.clone(), &tiles, &small);
        for threads in [1, 3, 5] {
            let threaded = PipelineConfig {
                threads,
                ..small.clone()
            };
            let result = run(source.clone(), &tiles, &threaded, &Untimed).unwrap();
            assert!(result.resampled);
            assert_eq!(Dimensions::of(&result.image), Dimensions::new(40, 32));
            assert_eq!(result.image, expected, "{threads} workers");
        }
    }

    #[test]
    fn counts_cover_every_cell() {
        let tiles = solid_tiles(8);
        let result = run(pattern(64, 40), &tiles, &config(3), &Untimed).unwrap();
        assert_eq!(result.counts.iter().sum::<u64>(), 8 * 5);
        assert_eq!((result.grid.width(), result.grid.height()), (9, 6));
    }

    #[test]
    fn more_workers_than_rows() {
        let tiles = solid_tiles(8);
        let source = pattern(16, 16);
        let expected = sequential(source.clone(), &tiles, &config(1));
        let result = run(source, &tiles, &config(8), &Untimed).unwrap();
        assert_eq!(result.image, expected);
    }

    #[test]
    fn passthrough_keeps_source_allocation() {
        let tiles = solid_tiles(8);
        let source = pattern(32, 32);
        let ptr = source.as_raw().as_ptr();
        let result = run(source, &tiles, &config(2), &Untimed).unwrap();
        assert_eq!(result.image.as_raw().as_ptr(), ptr);
    }

    #[test]
    fn resampled_run_writes_into_one_buffer() {
        let tiles = solid_tiles(8);
        let small = PipelineConfig {
            working_width: 24,
            working_height: 40,
            threads: 4,
            ..PipelineConfig::default()
        };
        let result = run(pattern(50, 50), &tiles, &small, &Untimed).unwrap();
        assert_eq!(result.image.as_raw().len(), 24 * 40 * CHANNELS);
        assert_eq!(result.image.as_raw().capacity(), 24 * 40 * CHANNELS);
    }

    #[test]
    fn bands_share_the_image_buffer() {
        let mut image = pattern(5, 10);
        let expected = image.clone();
        let ptr = image.as_raw().as_ptr();
        let banded = BandedImage::new(&mut image, [0..3, 3..3, 3..8]);

        let rows: Vec<_> = banded.bands.iter().map(|(rows, _)| rows.clone()).collect();
        assert_eq!(rows, [0..3, 3..3, 3..8, 8..10]);
        assert_eq!(banded.bands[0].1.read().unwrap().as_ptr(), ptr);
        for y in 0..10 {
            assert_eq!(
                banded.with_row(y, <[u8]>::to_vec),
                expected.with_row(y, <[u8]>::to_vec),
                "row {y}"
            );
        }
    }

    #[test]
    fn row_writes_span_band_edges() {
        let mut image = pattern(5, 10);
        let banded = BandedImage::new(&mut image, [0..3, 3..8]);
        let mut runs = Vec::new();
        banded.write_rows(2..9, |rows, bytes| {
            assert_eq!(bytes.len(), rows.len() * 5 * CHANNELS);
            bytes.fill(7);
            runs.push(rows);
        });
        drop(banded);

        assert_eq!(runs, [2..3, 3..8, 8..9]);
        for y in 0..10 {
            let written = image.get_pixel(0, y).0 == [7, 7, 7];
            assert_eq!(written, (2..9).contains(&y), "row {y}");
        }
    }

    #[test]
    fn zero_threads_rejected() {
        let tiles = solid_tiles(8);
        assert!(matches!(
            run(pattern(16, 16), &tiles, &config(0), &Untimed),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn wrong_tile_size_rejected_before_spawning() {
        let tiles = solid_tiles(6);
        assert!(matches!(
            run(pattern(16, 16), &tiles, &config(4), &Untimed),
            Err(PipelineError::TileStepMismatch { .. })
        ));
    }

    #[test]
    fn worker_error_preferred_over_abandonment() {
        let results = vec![
            Err(PipelineError::PhaseAbandoned),
            Err(PipelineError::WorkerPanicked { worker: 1 }),
            Err(PipelineError::PhaseAbandoned),
        ];
        assert!(matches!(
            collect_outputs(None, results),
            Err(PipelineError::WorkerPanicked { worker: 1 })
        ));
    }

    #[test]
    fn spawn_error_reported_first() {
        let spawn = PipelineError::WorkerSpawn {
            worker: 2,
            source: std::io::Error::other("no threads left"),
        };
        let results = vec![Err(PipelineError::WorkerPanicked { worker: 0 })];
        assert!(matches!(
            collect_outputs(Some(spawn), results),
            Err(PipelineError::WorkerSpawn { worker: 2, .. })
        ));
    }

    #[test]
    fn empty_image_produces_empty_output() {
        let tiles = solid_tiles(8);
        let result = run(RgbImage::new(0, 0), &tiles, &config(2), &Untimed).unwrap();
        assert_eq!(Dimensions::of(&result.image), Dimensions::new(0, 0));
        assert_eq!(result.counts.iter().sum::<u64>(), 0);
    }
}

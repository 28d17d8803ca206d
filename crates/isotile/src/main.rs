//! isotile: render a marching-squares contour overlay for an image.
//!
//! Reads the input image and the sixteen contour tiles from disk, runs
//! the pipeline on the requested number of worker threads, and writes
//! the stamped image.
//!
//! # Usage
//!
//! ```text
//! isotile [OPTIONS] <INPUT> <OUTPUT> <THREADS>
//! ```
//!
//! Exit status is 0 on success, 1 for a usage error and 2 for any
//! failure while loading, processing or writing.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::Parser;
use image::ImageFormat;
use isotile_pipeline::diagnostics::Clock;
use isotile_pipeline::{PipelineConfig, TILE_COUNT, TileSet, codec, tile_file_name};
use tracing_subscriber::EnvFilter;

/// Exit status for malformed command lines.
const EXIT_USAGE: u8 = 1;
/// Exit status for every failure after argument parsing.
const EXIT_FAILURE: u8 = 2;

/// Render a marching-squares contour overlay for an image.
///
/// The input is downscaled to 2048x2048 if it is larger, sampled on an
/// 8-pixel grid, and every grid cell is replaced by the contour tile
/// matching its four corners.
#[derive(Parser, Debug)]
#[command(name = "isotile", version)]
struct Cli {
    /// Input image (PPM, PNG, JPEG, BMP, WebP).
    input: PathBuf,

    /// Output image. The format follows the extension; PPM when the
    /// extension is missing, unknown or not writable.
    output: PathBuf,

    /// Number of worker threads (at least 1).
    #[arg(value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    threads: usize,

    /// Directory holding the contour tiles `0.ppm` through `15.ppm`.
    #[arg(long, default_value = "./contours")]
    tiles: PathBuf,

    /// Print a per-phase diagnostics report to stderr.
    #[arg(long)]
    diagnostics: bool,

    /// Print diagnostics as JSON to stdout.
    #[arg(long)]
    json: bool,
}

/// [`Clock`] implementation backed by [`std::time::Instant`].
struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn elapsed(&self, since: &Instant) -> Duration {
        since.elapsed()
    }
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let status = parse_error_status(&e);
            // Nothing useful is left to report if stderr is gone.
            let _ = e.print();
            return ExitCode::from(status);
        }
    };

    init_tracing();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("error: {msg}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

/// Exit status for a failed parse: `--help` and `--version` also come
/// back as errors but are not failures.
fn parse_error_status(err: &clap::Error) -> u8 {
    if err.use_stderr() { EXIT_USAGE } else { 0 }
}

/// Log to stderr, filtered by `RUST_LOG` (default `warn`).
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: &Cli) -> Result<(), String> {
    let tiles = load_tiles(&cli.tiles)?;

    let input = std::fs::read(&cli.input)
        .map_err(|e| format!("reading {}: {e}", cli.input.display()))?;
    tracing::info!(path = %cli.input.display(), bytes = input.len(), "read input");

    let config = PipelineConfig {
        threads: cli.threads,
        ..PipelineConfig::default()
    };

    let image = if cli.diagnostics || cli.json {
        let (result, diagnostics) =
            isotile_pipeline::process_with_diagnostics(&input, &tiles, &config, &StdClock)
                .map_err(|e| format!("processing {}: {e}", cli.input.display()))?;
        if cli.json {
            let json = serde_json::to_string_pretty(&diagnostics)
                .map_err(|e| format!("serializing diagnostics: {e}"))?;
            println!("{json}");
        } else {
            eprintln!("{}", diagnostics.report());
        }
        result.image
    } else {
        isotile_pipeline::process(&input, &tiles, &config)
            .map_err(|e| format!("processing {}: {e}", cli.input.display()))?
            .image
    };

    let format = output_format(&cli.output);
    let encoded = codec::encode_rgb(&image, format)
        .map_err(|e| format!("encoding {}: {e}", cli.output.display()))?;
    std::fs::write(&cli.output, &encoded)
        .map_err(|e| format!("writing {}: {e}", cli.output.display()))?;
    tracing::info!(path = %cli.output.display(), bytes = encoded.len(), "wrote output");
    Ok(())
}

/// Read `0.ppm` .. `15.ppm` from `dir`, stopping at the first failure.
fn load_tiles(dir: &Path) -> Result<TileSet, String> {
    let encoded = (0..TILE_COUNT)
        .map(|index| {
            let path = dir.join(tile_file_name(index));
            std::fs::read(&path)
                .map_err(|e| format!("reading contour tile {}: {e}", path.display()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    TileSet::from_encoded(&encoded)
        .map_err(|e| format!("loading tiles from {}: {e}", dir.display()))
}

/// Output format from the file extension.
///
/// Binary PPM when the extension is missing, unknown, or names a format
/// this build cannot encode.
fn output_format(path: &Path) -> ImageFormat {
    ImageFormat::from_path(path)
        .ok()
        .filter(|format| format.writing_enabled())
        .unwrap_or(ImageFormat::Pnm)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use clap::error::ErrorKind;
    use isotile_pipeline::RgbImage;

    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("isotile").chain(args.iter().copied()))
    }

    /// Write a full tile set where tile `k` is solid `(k, k, k)`.
    fn write_tiles(dir: &Path) {
        for k in 0..TILE_COUNT {
            let v = u8::try_from(k).unwrap();
            let tile = RgbImage::from_pixel(8, 8, image::Rgb([v, v, v]));
            let bytes = codec::encode_rgb(&tile, ImageFormat::Pnm).unwrap();
            std::fs::write(dir.join(tile_file_name(k)), bytes).unwrap();
        }
    }

    fn write_input(path: &Path, image: &RgbImage) {
        std::fs::write(path, codec::encode_rgb(image, ImageFormat::Pnm).unwrap()).unwrap();
    }

    #[test]
    fn parses_positional_arguments() {
        let cli = parse(&["in.ppm", "out.ppm", "4"]).unwrap();
        assert_eq!(cli.input, PathBuf::from("in.ppm"));
        assert_eq!(cli.output, PathBuf::from("out.ppm"));
        assert_eq!(cli.threads, 4);
        assert_eq!(cli.tiles, PathBuf::from("./contours"));
        assert!(!cli.diagnostics && !cli.json);
    }

    #[test]
    fn missing_arguments_are_usage_errors() {
        let err = parse(&["in.ppm", "out.ppm"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
        assert_eq!(parse_error_status(&err), EXIT_USAGE);
    }

    #[test]
    fn zero_threads_is_a_usage_error() {
        let err = parse(&["in.ppm", "out.ppm", "0"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
        assert_eq!(parse_error_status(&err), EXIT_USAGE);
    }

    #[test]
    fn non_numeric_threads_is_a_usage_error() {
        let err = parse(&["in.ppm", "out.ppm", "many"]).unwrap_err();
        assert_eq!(parse_error_status(&err), EXIT_USAGE);
    }

    #[test]
    fn help_exits_cleanly() {
        let err = parse(&["--help"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DisplayHelp);
        assert_eq!(parse_error_status(&err), 0);
    }

    #[test]
    fn output_format_defaults_to_ppm() {
        assert_eq!(output_format(Path::new("out.ppm")), ImageFormat::Pnm);
        assert_eq!(output_format(Path::new("out")), ImageFormat::Pnm);
        assert_eq!(output_format(Path::new("out.xyz")), ImageFormat::Pnm);
        assert_eq!(output_format(Path::new("out.png")), ImageFormat::Png);
    }

    #[test]
    fn unwritable_formats_fall_back_to_ppm() {
        for name in ["out.tga", "out.tiff", "out.gif", "out.qoi", "out.avif"] {
            assert_eq!(output_format(Path::new(name)), ImageFormat::Pnm, "{name}");
        }
    }

    #[test]
    fn unwritable_extension_still_writes_output() {
        let dir = tempfile::tempdir().unwrap();
        write_tiles(dir.path());
        let input = dir.path().join("in.ppm");
        let output = dir.path().join("out.tga");
        write_input(&input, &RgbImage::from_pixel(16, 8, image::Rgb([0, 0, 0])));

        let cli = Cli {
            input,
            output: output.clone(),
            threads: 2,
            tiles: dir.path().to_path_buf(),
            diagnostics: false,
            json: false,
        };
        run(&cli).unwrap();
        assert!(std::fs::read(&output).unwrap().starts_with(b"P6"));
    }

    #[test]
    fn end_to_end_writes_stamped_ppm() {
        let dir = tempfile::tempdir().unwrap();
        let tiles = dir.path().join("contours");
        std::fs::create_dir(&tiles).unwrap();
        write_tiles(&tiles);

        let input = dir.path().join("in.ppm");
        let output = dir.path().join("out.ppm");
        write_input(&input, &RgbImage::from_pixel(16, 16, image::Rgb([0, 0, 0])));

        let cli = Cli {
            input,
            output: output.clone(),
            threads: 2,
            tiles,
            diagnostics: false,
            json: false,
        };
        run(&cli).unwrap();

        let bytes = std::fs::read(&output).unwrap();
        assert!(bytes.starts_with(b"P6"));
        let stamped = codec::decode_rgb(&bytes).unwrap();
        assert_eq!(stamped.dimensions(), (16, 16));
        assert_eq!(stamped.get_pixel(0, 0).0, [15, 15, 15]);
        assert_eq!(stamped.get_pixel(15, 15).0, [13, 13, 13]);
    }

    #[test]
    fn missing_tile_is_reported_and_nothing_written() {
        let dir = tempfile::tempdir().unwrap();
        let tiles = dir.path().join("contours");
        std::fs::create_dir(&tiles).unwrap();
        write_tiles(&tiles);
        std::fs::remove_file(tiles.join("7.ppm")).unwrap();

        let input = dir.path().join("in.ppm");
        let output = dir.path().join("out.ppm");
        write_input(&input, &RgbImage::new(16, 16));

        let cli = Cli {
            input,
            output: output.clone(),
            threads: 1,
            tiles,
            diagnostics: false,
            json: false,
        };
        let err = run(&cli).unwrap_err();
        assert!(err.contains("7.ppm"), "{err}");
        assert!(!output.exists());
    }

    #[test]
    fn missing_input_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        write_tiles(dir.path());
        let cli = Cli {
            input: dir.path().join("absent.ppm"),
            output: dir.path().join("out.ppm"),
            threads: 1,
            tiles: dir.path().to_path_buf(),
            diagnostics: false,
            json: false,
        };
        let err = run(&cli).unwrap_err();
        assert!(err.contains("absent.ppm"), "{err}");
    }
}

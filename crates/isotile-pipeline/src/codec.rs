//! Image decoding and encoding.
//!
//! Accepts raw image bytes (PPM and the other formats the `image` crate
//! is built with) and produces the three-channel [`RgbImage`] every
//! later stage works on. Encoding goes the other way for the stamped
//! output. No filesystem access happens here.

use std::io::Cursor;

use image::codecs::pnm::{PnmEncoder, PnmSubtype, SampleEncoding};
use image::{ExtendedColorType, ImageEncoder, ImageFormat};

use crate::types::{PipelineError, RgbImage};

/// Decode raw image bytes into an 8-bit RGB image.
///
/// Alpha is discarded and grayscale inputs are expanded to three equal
/// channels.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyInput`] if `bytes` is empty.
/// Returns [`PipelineError::ImageDecode`] if the image format is
/// unrecognized or the data is corrupt.
#[must_use = "returns the decoded image"]
pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage, PipelineError> {
    if bytes.is_empty() {
        return Err(PipelineError::EmptyInput);
    }

    let img = image::load_from_memory(bytes)?;
    Ok(img.to_rgb8())
}

/// Encode an RGB image in the given format.
///
/// [`ImageFormat::Pnm`] always produces a binary pixmap (`P6`), which is
/// what the contour tiles and most PPM consumers expect; the `image`
/// crate would otherwise pick a PAM header.
///
/// # Errors
///
/// Returns [`PipelineError::ImageEncode`] if the format is not enabled
/// or the encoder rejects the image.
pub fn encode_rgb(image: &RgbImage, format: ImageFormat) -> Result<Vec<u8>, PipelineError> {
    let mut buf = Vec::new();
    if format == ImageFormat::Pnm {
        let encoder =
            PnmEncoder::new(&mut buf).with_subtype(PnmSubtype::Pixmap(SampleEncoding::Binary));
        encoder
            .write_image(
                image.as_raw(),
                image.width(),
                image.height(),
                ExtendedColorType::Rgb8,
            )
            .map_err(PipelineError::ImageEncode)?;
    } else {
        image
            .write_to(&mut Cursor::new(&mut buf), format)
            .map_err(PipelineError::ImageEncode)?;
    }
    Ok(buf)
}

//! Raw pixel format conversions.
//!
//! Render targets usually come back as BGRA or RGBA; consumers usually want
//! RGB or a single luminance channel.  Conversion goes through one RGBA
//! pixel at a time, so every raw format converts to every other.
//!
//! Grayscale uses the ITU-R BT.601 luma weights (0.299, 0.587, 0.114)
//! unless the caller supplies its own through [`convert_weighted`].

use thiserror::Error;

use crate::protocol::messages::PixelFormat;

/// BT.601 luma weights applied to `[R, G, B]`.
pub const LUMA_COEFFICIENTS: [f32; 3] = [0.299, 0.587, 0.114];

/// Errors from [`convert`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConversionError {
    /// One side of the conversion is a compressed format.
    #[error("cannot convert {from:?} to {to:?}: only raw formats are convertible")]
    Unsupported { from: PixelFormat, to: PixelFormat },

    /// The input buffer does not hold exactly `width * height` pixels.
    #[error("buffer holds {actual} bytes, {width}x{height} {format:?} needs {expected}")]
    SizeMismatch {
        format: PixelFormat,
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
}

/// BT.601 luminance of one pixel, rounded to the nearest integer.
pub fn luminance(r: u8, g: u8, b: u8) -> u8 {
    weighted_luminance(LUMA_COEFFICIENTS, r, g, b)
}

/// Luminance of one pixel under `weights`, rounded and clamped to `0..=255`.
pub fn weighted_luminance(weights: [f32; 3], r: u8, g: u8, b: u8) -> u8 {
    let [wr, wg, wb] = weights;
    let y = wr * f32::from(r) + wg * f32::from(g) + wb * f32::from(b);
    y.round().clamp(0.0, 255.0) as u8
}

/// Converts a raw buffer from one pixel format to another.
///
/// Returns a copy of `data` when `from == to`.
///
/// # Errors
///
/// - [`ConversionError::Unsupported`] if either format is compressed.
/// - [`ConversionError::SizeMismatch`] if `data` does not match the
///   dimensions.
pub fn convert(
    data: &[u8],
    width: u32,
    height: u32,
    from: PixelFormat,
    to: PixelFormat,
) -> Result<Vec<u8>, ConversionError> {
    convert_weighted(data, width, height, from, to, LUMA_COEFFICIENTS)
}

/// [`convert`] with caller-supplied luma weights for grayscale output.
///
/// # Errors
///
/// As [`convert`].
pub fn convert_weighted(
    data: &[u8],
    width: u32,
    height: u32,
    from: PixelFormat,
    to: PixelFormat,
    luma: [f32; 3],
) -> Result<Vec<u8>, ConversionError> {
    let (Some(src_bpp), Some(dst_bpp)) = (from.bytes_per_pixel(), to.bytes_per_pixel()) else {
        return Err(ConversionError::Unsupported { from, to });
    };
    let expected = from
        .raw_payload_len(width, height)
        .ok_or(ConversionError::Unsupported { from, to })?;
    if data.len() != expected {
        return Err(ConversionError::SizeMismatch {
            format: from,
            width,
            height,
            expected,
            actual: data.len(),
        });
    }
    if from == to {
        return Ok(data.to_vec());
    }

    let mut out = Vec::with_capacity(data.len() / src_bpp * dst_bpp);
    for px in data.chunks_exact(src_bpp) {
        let (r, g, b, a) = read_rgba(from, px);
        write_rgba(to, luma, &mut out, [r, g, b, a]);
    }
    Ok(out)
}

fn read_rgba(format: PixelFormat, px: &[u8]) -> (u8, u8, u8, u8) {
    match format {
        PixelFormat::Rgb8 => (px[0], px[1], px[2], u8::MAX),
        PixelFormat::Rgba8 => (px[0], px[1], px[2], px[3]),
        PixelFormat::Bgra8 => (px[2], px[1], px[0], px[3]),
        PixelFormat::Gray8 => (px[0], px[0], px[0], u8::MAX),
        // Compressed formats never reach here: `convert` rejects them.
        PixelFormat::Jpeg | PixelFormat::Png => (0, 0, 0, 0),
    }
}

fn write_rgba(format: PixelFormat, luma: [f32; 3], out: &mut Vec<u8>, [r, g, b, a]: [u8; 4]) {
    match format {
        PixelFormat::Rgb8 => out.extend_from_slice(&[r, g, b]),
        PixelFormat::Rgba8 => out.extend_from_slice(&[r, g, b, a]),
        PixelFormat::Bgra8 => out.extend_from_slice(&[b, g, r, a]),
        PixelFormat::Gray8 => out.push(weighted_luminance(luma, r, g, b)),
        PixelFormat::Jpeg | PixelFormat::Png => {}
    }
}

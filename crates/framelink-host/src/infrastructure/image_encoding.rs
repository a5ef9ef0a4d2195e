//! Turning raw render-target pixels into publishable payloads.
//!
//! [`RawImageEncoder`] covers the uncompressed outputs (RGB and grayscale).
//! [`CompressingImageEncoder`] adds JPEG (color or grayscale, quality 85 by
//! default) and PNG on top of it, using the `image` crate's codecs.
//!
//! Grayscale outputs take the camera's own luma weights, so two cameras on
//! one host can reduce color differently.

use std::fmt;
use std::str::FromStr;

use framelink_core::domain::{convert_weighted, ConversionError};
use framelink_core::PixelFormat;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder as _};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::infrastructure::frame_source::RawFrame;

/// JPEG quality used when none is configured.
pub const DEFAULT_JPEG_QUALITY: u8 = 85;

/// What a camera publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Three-channel RGB.
    #[default]
    Color,
    /// Single luminance channel.
    Grayscale,
    /// Color JPEG.
    Jpeg,
    /// Single-channel JPEG of the luminance.
    GrayscaleJpeg,
    Png,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Color => "color",
            OutputFormat::Grayscale => "grayscale",
            OutputFormat::Jpeg => "jpeg",
            OutputFormat::GrayscaleJpeg => "grayscale_jpeg",
            OutputFormat::Png => "png",
        }
    }

    /// Pixel format of the encoded payload.
    pub fn pixel_format(self) -> PixelFormat {
        match self {
            OutputFormat::Color => PixelFormat::Rgb8,
            OutputFormat::Grayscale => PixelFormat::Gray8,
            OutputFormat::Jpeg | OutputFormat::GrayscaleJpeg => PixelFormat::Jpeg,
            OutputFormat::Png => PixelFormat::Png,
        }
    }

    /// The raw layout fed to the compressor, or the payload itself for raw
    /// outputs.
    fn raw_source(self) -> PixelFormat {
        match self {
            OutputFormat::Grayscale | OutputFormat::GrayscaleJpeg => PixelFormat::Gray8,
            OutputFormat::Color | OutputFormat::Jpeg | OutputFormat::Png => PixelFormat::Rgb8,
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "color" => Ok(OutputFormat::Color),
            "grayscale" => Ok(OutputFormat::Grayscale),
            "jpeg" => Ok(OutputFormat::Jpeg),
            "grayscale_jpeg" => Ok(OutputFormat::GrayscaleJpeg),
            "png" => Ok(OutputFormat::Png),
            other => Err(format!("unknown output format `{other}`")),
        }
    }
}

/// An encoded frame payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

/// Error type for image encoding.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// The encoder cannot produce this output.
    #[error("output format {0} is not supported by this encoder")]
    Unsupported(OutputFormat),

    /// The raw frame could not be converted.
    #[error(transparent)]
    Conversion(#[from] ConversionError),

    /// The encoder backend failed.
    #[error("encoder failed: {0}")]
    Failed(String),
}

/// Encodes one raw frame into the requested output.
///
/// `luma` weights `[R, G, B]` when the output is grayscale.
#[cfg_attr(test, mockall::automock)]
pub trait ImageEncoder: Send + Sync {
    fn encode(
        &self,
        frame: &RawFrame,
        output: OutputFormat,
        luma: [f32; 3],
    ) -> Result<EncodedImage, EncodeError>;

    /// Whether `encode` can ever produce `output`.
    fn supports(&self, output: OutputFormat) -> bool;
}

// ── Raw ───────────────────────────────────────────────────────────────────────

/// Pixel-format conversion only; no compression.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawImageEncoder;

impl ImageEncoder for RawImageEncoder {
    fn encode(
        &self,
        frame: &RawFrame,
        output: OutputFormat,
        luma: [f32; 3],
    ) -> Result<EncodedImage, EncodeError> {
        if !self.supports(output) {
            return Err(EncodeError::Unsupported(output));
        }
        let target = output.raw_source();
        let data = convert_weighted(&frame.data, frame.width, frame.height, frame.format, target, luma)?;
        Ok(EncodedImage {
            width: frame.width,
            height: frame.height,
            format: target,
            data,
        })
    }

    fn supports(&self, output: OutputFormat) -> bool {
        !output.pixel_format().is_compressed()
    }
}

// ── Compressed ────────────────────────────────────────────────────────────────

/// Every [`OutputFormat`]: raw outputs as [`RawImageEncoder`], plus JPEG and
/// PNG.
#[derive(Debug, Clone, Copy)]
pub struct CompressingImageEncoder {
    jpeg_quality: u8,
}

impl Default for CompressingImageEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}

impl CompressingImageEncoder {
    /// `jpeg_quality` is clamped to `1..=100`.
    pub fn new(jpeg_quality: u8) -> Self {
        Self {
            jpeg_quality: jpeg_quality.clamp(1, 100),
        }
    }

    pub fn jpeg_quality(&self) -> u8 {
        self.jpeg_quality
    }
}

impl ImageEncoder for CompressingImageEncoder {
    fn encode(
        &self,
        frame: &RawFrame,
        output: OutputFormat,
        luma: [f32; 3],
    ) -> Result<EncodedImage, EncodeError> {
        let raw = RawImageEncoder.encode(frame, raw_stage(output), luma)?;
        let color = match raw.format {
            PixelFormat::Gray8 => ExtendedColorType::L8,
            _ => ExtendedColorType::Rgb8,
        };

        let mut data = Vec::new();
        let result = match output {
            OutputFormat::Color | OutputFormat::Grayscale => return Ok(raw),
            OutputFormat::Jpeg | OutputFormat::GrayscaleJpeg => {
                JpegEncoder::new_with_quality(&mut data, self.jpeg_quality).encode(
                    &raw.data,
                    raw.width,
                    raw.height,
                    color,
                )
            }
            OutputFormat::Png => {
                PngEncoder::new(&mut data).write_image(&raw.data, raw.width, raw.height, color)
            }
        };
        result.map_err(|e| EncodeError::Failed(e.to_string()))?;

        Ok(EncodedImage {
            width: raw.width,
            height: raw.height,
            format: output.pixel_format(),
            data,
        })
    }

    fn supports(&self, _output: OutputFormat) -> bool {
        true
    }
}

/// The raw output a compressed output is built from.
fn raw_stage(output: OutputFormat) -> OutputFormat {
    match output.raw_source() {
        PixelFormat::Gray8 => OutputFormat::Grayscale,
        _ => OutputFormat::Color,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framelink_core::domain::LUMA_COEFFICIENTS;

    fn bgra_frame() -> RawFrame {
        RawFrame {
            width: 2,
            height: 1,
            format: PixelFormat::Bgra8,
            // blue, then white
            data: vec![255, 0, 0, 255, 255, 255, 255, 255],
        }
    }

    fn gradient(width: u32, height: u32) -> RawFrame {
        let mut data = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&[(x * 8) as u8, (y * 8) as u8, 128]);
            }
        }
        RawFrame {
            width,
            height,
            format: PixelFormat::Rgb8,
            data,
        }
    }

    #[test]
    fn test_color_output_is_rgb() {
        // Act
        let img = RawImageEncoder
            .encode(&bgra_frame(), OutputFormat::Color, LUMA_COEFFICIENTS)
            .unwrap();

        // Assert
        assert_eq!(img.format, PixelFormat::Rgb8);
        assert_eq!(img.data, vec![0, 0, 255, 255, 255, 255]);
    }

    #[test]
    fn test_grayscale_output_is_one_byte_per_pixel() {
        let img = RawImageEncoder
            .encode(&bgra_frame(), OutputFormat::Grayscale, LUMA_COEFFICIENTS)
            .unwrap();
        assert_eq!(img.format, PixelFormat::Gray8);
        assert_eq!(img.data, vec![29, 255]);
    }

    #[test]
    fn test_grayscale_uses_the_given_weights() {
        let img = RawImageEncoder
            .encode(&bgra_frame(), OutputFormat::Grayscale, [0.0, 0.0, 1.0])
            .unwrap();
        assert_eq!(img.data, vec![255, 255]);
    }

    #[test]
    fn test_raw_encoder_rejects_compressed_output() {
        let result = RawImageEncoder.encode(&bgra_frame(), OutputFormat::Jpeg, LUMA_COEFFICIENTS);
        assert!(matches!(result, Err(EncodeError::Unsupported(OutputFormat::Jpeg))));
        assert!(!RawImageEncoder.supports(OutputFormat::Png));
        assert!(RawImageEncoder.supports(OutputFormat::Grayscale));
    }

    #[test]
    fn test_truncated_frame_is_conversion_error() {
        let mut frame = bgra_frame();
        frame.data.pop();
        let result = RawImageEncoder.encode(&frame, OutputFormat::Color, LUMA_COEFFICIENTS);
        assert!(matches!(result, Err(EncodeError::Conversion(_))));
    }

    #[test]
    fn test_jpeg_output_is_a_decodable_color_jpeg() {
        // Arrange
        let encoder = CompressingImageEncoder::default();

        // Act
        let img = encoder
            .encode(&gradient(16, 8), OutputFormat::Jpeg, LUMA_COEFFICIENTS)
            .unwrap();

        // Assert
        assert_eq!(img.format, PixelFormat::Jpeg);
        assert_eq!((img.width, img.height), (16, 8));
        assert_eq!(&img.data[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory_with_format(&img.data, image::ImageFormat::Jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 8));
        assert_eq!(decoded.color(), image::ColorType::Rgb8);
    }

    #[test]
    fn test_grayscale_jpeg_is_single_channel() {
        let img = CompressingImageEncoder::default()
            .encode(&gradient(8, 8), OutputFormat::GrayscaleJpeg, LUMA_COEFFICIENTS)
            .unwrap();

        let decoded = image::load_from_memory_with_format(&img.data, image::ImageFormat::Jpeg).unwrap();
        assert_eq!(img.format, PixelFormat::Jpeg);
        assert_eq!(decoded.color(), image::ColorType::L8);
    }

    #[test]
    fn test_png_output_is_lossless() {
        // Arrange
        let frame = gradient(4, 4);

        // Act
        let img = CompressingImageEncoder::default()
            .encode(&frame, OutputFormat::Png, LUMA_COEFFICIENTS)
            .unwrap();

        // Assert
        assert_eq!(img.format, PixelFormat::Png);
        let decoded = image::load_from_memory_with_format(&img.data, image::ImageFormat::Png).unwrap();
        assert_eq!(decoded.to_rgb8().into_raw(), frame.data);
    }

    #[test]
    fn test_lower_quality_gives_smaller_jpeg() {
        let frame = gradient(32, 32);

        let high = CompressingImageEncoder::new(95)
            .encode(&frame, OutputFormat::Jpeg, LUMA_COEFFICIENTS)
            .unwrap();
        let low = CompressingImageEncoder::new(10)
            .encode(&frame, OutputFormat::Jpeg, LUMA_COEFFICIENTS)
            .unwrap();

        assert!(low.data.len() < high.data.len());
    }

    #[test]
    fn test_compressing_encoder_passes_raw_outputs_through() {
        let img = CompressingImageEncoder::default()
            .encode(&bgra_frame(), OutputFormat::Color, LUMA_COEFFICIENTS)
            .unwrap();
        assert_eq!(img.data, vec![0, 0, 255, 255, 255, 255]);
        assert_eq!(CompressingImageEncoder::new(0).jpeg_quality(), 1);
    }

    #[test]
    fn test_output_format_parses_case_insensitively() {
        assert_eq!("GrayScale".parse::<OutputFormat>(), Ok(OutputFormat::Grayscale));
        assert_eq!("grayscale_jpeg".parse::<OutputFormat>(), Ok(OutputFormat::GrayscaleJpeg));
        assert!("sepia".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_every_output_name_is_a_set_format_choice() {
        for format in [
            OutputFormat::Color,
            OutputFormat::Grayscale,
            OutputFormat::Jpeg,
            OutputFormat::GrayscaleJpeg,
            OutputFormat::Png,
        ] {
            assert!(framelink_core::protocol::schema::FORMAT_CHOICES.contains(&format.as_str()));
        }
    }
}

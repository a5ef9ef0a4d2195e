//! Animated test pattern used when no render host is attached.
//!
//! Produces BGRA frames (the usual render-target layout) with a diagonal
//! gradient that shifts by one pixel per frame, so consumers can see motion
//! and spot dropped frames by eye.

use framelink_core::PixelFormat;

use super::{CaptureError, FrameSource, RawFrame};

/// Largest side accepted by [`SyntheticFrameSource::resize`].
pub const MAX_DIMENSION: u32 = 8192;

pub struct SyntheticFrameSource {
    width: u32,
    height: u32,
    frame: u32,
}

impl SyntheticFrameSource {
    /// # Errors
    ///
    /// Returns [`CaptureError::InvalidResolution`] for a zero or oversized side.
    pub fn new(width: u32, height: u32) -> Result<Self, CaptureError> {
        check_dimensions(width, height)?;
        Ok(Self {
            width,
            height,
            frame: 0,
        })
    }

    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn render(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.width as usize * self.height as usize * 4);
        for y in 0..self.height {
            for x in 0..self.width {
                let r = (x.wrapping_add(self.frame) % 256) as u8;
                let g = (y % 256) as u8;
                let b = (x.wrapping_add(y).wrapping_add(self.frame) / 2 % 256) as u8;
                data.extend_from_slice(&[b, g, r, u8::MAX]);
            }
        }
        data
    }
}

fn check_dimensions(width: u32, height: u32) -> Result<(), CaptureError> {
    let reject = |reason: &str| CaptureError::InvalidResolution {
        width,
        height,
        reason: reason.to_string(),
    };
    if width == 0 || height == 0 {
        return Err(reject("dimensions must be positive"));
    }
    if width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(reject("exceeds the maximum side of 8192"));
    }
    Ok(())
}

impl FrameSource for SyntheticFrameSource {
    fn current_frame(&mut self) -> Result<Option<RawFrame>, CaptureError> {
        let data = self.render();
        self.frame = self.frame.wrapping_add(1);
        Ok(Some(RawFrame {
            width: self.width,
            height: self.height,
            format: PixelFormat::Bgra8,
            data,
        }))
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<(), CaptureError> {
        check_dimensions(width, height)?;
        self.width = width;
        self.height = height;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_has_exact_bgra_size() {
        // Arrange
        let mut source = SyntheticFrameSource::new(16, 8).unwrap();

        // Act
        let frame = source.current_frame().unwrap().unwrap();

        // Assert
        assert_eq!(frame.format, PixelFormat::Bgra8);
        assert_eq!(frame.data.len(), 16 * 8 * 4);
    }

    #[test]
    fn test_consecutive_frames_differ() {
        let mut source = SyntheticFrameSource::new(4, 4).unwrap();
        let a = source.current_frame().unwrap().unwrap();
        let b = source.current_frame().unwrap().unwrap();
        assert_ne!(a.data, b.data);
    }

    #[test]
    fn test_resize_applies_to_next_frame() {
        let mut source = SyntheticFrameSource::new(4, 4).unwrap();
        source.resize(2, 3).unwrap();
        let frame = source.current_frame().unwrap().unwrap();
        assert_eq!((frame.width, frame.height), (2, 3));
        assert_eq!(frame.data.len(), 2 * 3 * 4);
    }

    #[test]
    fn test_zero_and_oversized_resolutions_are_rejected() {
        assert!(SyntheticFrameSource::new(0, 10).is_err());
        let mut source = SyntheticFrameSource::new(1, 1).unwrap();
        assert!(matches!(
            source.resize(MAX_DIMENSION + 1, 1),
            Err(CaptureError::InvalidResolution { .. })
        ));
        assert_eq!(source.resolution(), (1, 1));
    }
}

//! Raw camera frames.

use image::{DynamicImage, GrayImage, ImageBuffer, Luma, Rgb};
use std::borrow::Cow;
use std::time::Instant;

/// Memory layout of [`RawFrame::data`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    /// 8-bit grayscale, one byte per pixel.
    Gray8,
    /// Packed 8-bit RGB, three bytes per pixel.
    Rgb8,
}

impl PixelLayout {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelLayout::Gray8 => 1,
            PixelLayout::Rgb8 => 3,
        }
    }
}

/// One capture from a frame source. Never persisted.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
    pub timestamp: Instant,
    pub sequence: u32,
    /// Set by sources that can tell the sensor saw (almost) nothing.
    pub is_dark: bool,
}

impl RawFrame {
    pub fn gray(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Self {
        Self {
            data,
            width,
            height,
            layout: PixelLayout::Gray8,
            timestamp: Instant::now(),
            sequence,
            is_dark: false,
        }
    }

    /// Wrap a decoded image. Grayscale images stay single-channel,
    /// everything else is flattened to RGB.
    pub fn from_image(image: &DynamicImage, sequence: u32) -> Self {
        let (data, layout) = match image {
            DynamicImage::ImageLuma8(gray) => (gray.as_raw().clone(), PixelLayout::Gray8),
            other => (other.to_rgb8().into_raw(), PixelLayout::Rgb8),
        };
        Self {
            data,
            width: image.width(),
            height: image.height(),
            layout,
            timestamp: Instant::now(),
            sequence,
            is_dark: false,
        }
    }

    fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.layout.bytes_per_pixel()
    }

    fn check_len(&self) -> Result<(), FrameError> {
        let expected = self.expected_len();
        if self.data.len() < expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: self.data.len(),
            });
        }
        Ok(())
    }

    /// Borrowed grayscale view of a `Gray8` frame.
    pub(crate) fn gray_view(&self) -> Result<ImageBuffer<Luma<u8>, &[u8]>, FrameError> {
        self.check_len()?;
        ImageBuffer::from_raw(self.width, self.height, &self.data[..self.expected_len()])
            .ok_or(FrameError::InvalidLength {
                expected: self.expected_len(),
                actual: self.data.len(),
            })
    }

    /// Borrowed RGB view of an `Rgb8` frame.
    pub(crate) fn rgb_view(&self) -> Result<ImageBuffer<Rgb<u8>, &[u8]>, FrameError> {
        self.check_len()?;
        ImageBuffer::from_raw(self.width, self.height, &self.data[..self.expected_len()])
            .ok_or(FrameError::InvalidLength {
                expected: self.expected_len(),
                actual: self.data.len(),
            })
    }

    /// Grayscale intensities, `width * height` bytes. Borrowed when the
    /// frame is already gray.
    pub fn luma(&self) -> Result<Cow<'_, [u8]>, FrameError> {
        match self.layout {
            PixelLayout::Gray8 => {
                self.check_len()?;
                Ok(Cow::Borrowed(&self.data[..self.expected_len()]))
            }
            PixelLayout::Rgb8 => {
                let gray: GrayImage = image::imageops::grayscale(&self.rgb_view()?);
                Ok(Cow::Owned(gray.into_raw()))
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn test_gray_luma_is_borrowed() {
        let frame = RawFrame::gray(vec![7u8; 12], 4, 3, 0);
        let luma = frame.luma().unwrap();
        assert!(matches!(luma, Cow::Borrowed(_)));
        assert_eq!(luma.len(), 12);
    }

    #[test]
    fn test_rgb_luma_converts() {
        let rgb = RgbImage::from_pixel(3, 2, Rgb([255, 255, 255]));
        let frame = RawFrame::from_image(&DynamicImage::ImageRgb8(rgb), 1);
        assert_eq!(frame.layout, PixelLayout::Rgb8);
        let luma = frame.luma().unwrap();
        assert_eq!(luma.len(), 6);
        assert!(luma.iter().all(|&p| p >= 254));
    }

    #[test]
    fn test_short_buffer_rejected() {
        let frame = RawFrame::gray(vec![0u8; 5], 4, 3, 0);
        assert!(matches!(
            frame.luma(),
            Err(FrameError::InvalidLength { expected: 12, actual: 5 })
        ));
    }
}

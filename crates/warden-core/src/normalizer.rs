//! Crop a detected region and resample it to the canonical face size.

use crate::frame::{FrameError, PixelLayout, RawFrame};
use crate::types::{DetectedRegion, NormalizedFace, CANONICAL_FACE_SIZE};
use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("region {x},{y} {width}x{height} is not inside the {frame_width}x{frame_height} frame")]
    RegionOutOfBounds {
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        frame_width: u32,
        frame_height: u32,
    },
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Produces [`NormalizedFace`]s: crop, grayscale, bilinear resize.
#[derive(Debug, Clone, Copy, Default)]
pub struct Normalizer;

impl Normalizer {
    pub fn new() -> Self {
        Self
    }

    /// Regions that are not fully contained in the frame are rejected,
    /// never clipped.
    pub fn normalize(
        &self,
        frame: &RawFrame,
        region: &DetectedRegion,
    ) -> Result<NormalizedFace, NormalizeError> {
        if !region.is_within(frame.width, frame.height) {
            return Err(NormalizeError::RegionOutOfBounds {
                x: region.x,
                y: region.y,
                width: region.width,
                height: region.height,
                frame_width: frame.width,
                frame_height: frame.height,
            });
        }

        let (x, y) = (region.x as u32, region.y as u32);
        let crop: GrayImage = match frame.layout {
            PixelLayout::Gray8 => {
                let view = frame.gray_view()?;
                GrayImage::from_fn(region.width, region.height, |i, j| {
                    *view.get_pixel(x + i, y + j)
                })
            }
            PixelLayout::Rgb8 => {
                let view = frame.rgb_view()?;
                let rgb = RgbImage::from_fn(region.width, region.height, |i, j| {
                    *view.get_pixel(x + i, y + j)
                });
                imageops::grayscale(&rgb)
            }
        };

        let resized = if crop.dimensions() == (CANONICAL_FACE_SIZE, CANONICAL_FACE_SIZE) {
            crop
        } else {
            imageops::resize(&crop, CANONICAL_FACE_SIZE, CANONICAL_FACE_SIZE, FilterType::Triangle)
        };

        Ok(NormalizedFace::from_resampled(resized))
    }
}

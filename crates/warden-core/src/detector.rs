//! Face detection.
//!
//! The production backend is the SeetaFace funnel-structured cascade
//! (via `rustface`). Regions below the configured minimum size are dropped
//! and overlapping regions are suppressed with greedy NMS.

use crate::frame::RawFrame;
use crate::types::DetectedRegion;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

// rustface asserts on these bounds; check them up front instead of panicking.
const SEETA_MIN_FACE_SIZE: u32 = 20;
const SEETA_MIN_SCALE: f32 = 0.01;
const SEETA_MAX_SCALE: f32 = 0.99;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}; download seeta_fd_frontal_v1.0.bin and point WARDEN_DETECTOR_MODEL at it")]
    ModelNotFound(String),
    #[error("failed to load detector model {path}: {reason}")]
    ModelLoad { path: String, reason: String },
    #[error("invalid detector configuration: {0}")]
    InvalidConfig(String),
    #[error("unusable frame: {0}")]
    Frame(#[from] crate::frame::FrameError),
}

/// Locates candidate face regions in a frame.
///
/// Implementations may keep scratch buffers between calls, hence `&mut self`,
/// but the output depends only on the frame and the fixed configuration.
pub trait FaceDetector {
    fn detect(&mut self, frame: &RawFrame) -> Result<Vec<DetectedRegion>, DetectorError>;
}

impl<D: FaceDetector + ?Sized> FaceDetector for Box<D> {
    fn detect(&mut self, frame: &RawFrame) -> Result<Vec<DetectedRegion>, DetectorError> {
        (**self).detect(frame)
    }
}

/// Fixed detector configuration, set once at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Smallest face side length reported, in pixels.
    pub min_face_size: u32,
    /// Image pyramid scale step, in (0.01, 0.99). Smaller is coarser and faster.
    pub pyramid_scale: f32,
    /// Sliding window step in pixels, both axes.
    pub window_step: u32,
    /// Cascade score a window must reach to count as a face.
    pub score_threshold: f64,
    /// Overlap above which the lower-scoring of two regions is suppressed.
    pub nms_iou: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_face_size: 100,
            pyramid_scale: 0.8,
            window_step: 4,
            score_threshold: 2.0,
            nms_iou: 0.4,
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<(), DetectorError> {
        if self.min_face_size < SEETA_MIN_FACE_SIZE {
            return Err(DetectorError::InvalidConfig(format!(
                "min_face_size must be at least {SEETA_MIN_FACE_SIZE}, got {}",
                self.min_face_size
            )));
        }
        if !(SEETA_MIN_SCALE..=SEETA_MAX_SCALE).contains(&self.pyramid_scale) {
            return Err(DetectorError::InvalidConfig(format!(
                "pyramid_scale must be within [{SEETA_MIN_SCALE}, {SEETA_MAX_SCALE}], got {}",
                self.pyramid_scale
            )));
        }
        if self.window_step == 0 {
            return Err(DetectorError::InvalidConfig("window_step must be positive".into()));
        }
        if self.score_threshold <= 0.0 {
            return Err(DetectorError::InvalidConfig(format!(
                "score_threshold must be positive, got {}",
                self.score_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.nms_iou) {
            return Err(DetectorError::InvalidConfig(format!(
                "nms_iou must be within [0, 1], got {}",
                self.nms_iou
            )));
        }
        Ok(())
    }
}

/// SeetaFace frontal face detector.
pub struct SeetaDetector {
    inner: Box<dyn rustface::Detector>,
    config: DetectorConfig,
}

impl SeetaDetector {
    /// Load the SeetaFace model from `model_path` and apply `config`.
    pub fn load(model_path: &str, config: DetectorConfig) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }
        config.validate()?;

        let mut inner = rustface::create_detector(model_path).map_err(|e| DetectorError::ModelLoad {
            path: model_path.to_string(),
            reason: e.to_string(),
        })?;
        inner.set_min_face_size(config.min_face_size);
        inner.set_pyramid_scale_factor(config.pyramid_scale);
        inner.set_slide_window_step(config.window_step, config.window_step);
        inner.set_score_thresh(config.score_threshold);

        tracing::info!(
            path = model_path,
            min_face_size = config.min_face_size,
            pyramid_scale = config.pyramid_scale,
            score_threshold = config.score_threshold,
            "loaded SeetaFace detector"
        );

        Ok(Self { inner, config })
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }
}

impl FaceDetector for SeetaDetector {
    fn detect(&mut self, frame: &RawFrame) -> Result<Vec<DetectedRegion>, DetectorError> {
        if frame.width == 0 || frame.height == 0 {
            return Ok(Vec::new());
        }
        let luma = frame.luma()?;
        let mut image = rustface::ImageData::new(&luma, frame.width, frame.height);

        let raw: Vec<DetectedRegion> = self
            .inner
            .detect(&mut image)
            .into_iter()
            .map(|face| {
                let bbox = face.bbox();
                DetectedRegion {
                    x: bbox.x(),
                    y: bbox.y(),
                    width: bbox.width(),
                    height: bbox.height(),
                    score: face.score() as f32,
                }
            })
            .collect();

        let regions = postprocess(raw, &self.config);
        tracing::trace!(sequence = frame.sequence, faces = regions.len(), "detect");
        Ok(regions)
    }
}

/// Drop undersized regions, then suppress overlaps.
pub(crate) fn postprocess(regions: Vec<DetectedRegion>, config: &DetectorConfig) -> Vec<DetectedRegion> {
    let sized = regions
        .into_iter()
        .filter(|r| r.width >= config.min_face_size && r.height >= config.min_face_size)
        .collect();
    nms(sized, config.nms_iou)
}

/// Non-Maximum Suppression: remove overlapping detections, highest score first.
fn nms(mut detections: Vec<DetectedRegion>, iou_threshold: f32) -> Vec<DetectedRegion> {
    detections.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    let mut suppressed = vec![false; detections.len()];

    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(detections[i].clone());

        for j in (i + 1)..detections.len() {
            if !suppressed[j] && detections[i].iou(&detections[j]) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(x: i32, y: i32, w: u32, h: u32, score: f32) -> DetectedRegion {
        DetectedRegion { x, y, width: w, height: h, score }
    }

    #[test]
    fn test_nms_suppresses_overlapping() {
        let detections = vec![
            scored(0, 0, 100, 100, 0.9),
            scored(5, 5, 100, 100, 0.8),
            scored(200, 200, 50, 50, 0.7),
        ];
        let result = nms(detections, 0.4);
        assert_eq!(result.len(), 2);
        assert!((result[0].score - 0.9).abs() < 1e-6);
        assert!((result[1].score - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_nms_no_suppression() {
        let detections = vec![scored(0, 0, 10, 10, 0.9), scored(50, 50, 10, 10, 0.8)];
        assert_eq!(nms(detections, 0.4).len(), 2);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(vec![], 0.4).is_empty());
    }

    #[test]
    fn test_postprocess_drops_small_regions() {
        let config = DetectorConfig {
            min_face_size: 100,
            ..DetectorConfig::default()
        };
        let regions = vec![
            scored(0, 0, 99, 150, 5.0),
            scored(300, 0, 120, 120, 3.0),
            scored(0, 300, 150, 80, 4.0),
        ];
        let kept = postprocess(regions, &config);
        assert_eq!(kept, vec![scored(300, 0, 120, 120, 3.0)]);
    }

    #[test]
    fn test_default_config_is_valid() {
        DetectorConfig::default().validate().unwrap();
    }

    #[test]
    fn test_config_rejects_tiny_faces() {
        let config = DetectorConfig {
            min_face_size: 10,
            ..DetectorConfig::default()
        };
        assert!(matches!(config.validate(), Err(DetectorError::InvalidConfig(_))));
    }

    #[test]
    fn test_config_rejects_bad_scale() {
        let config = DetectorConfig {
            pyramid_scale: 1.2,
            ..DetectorConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_model() {
        let result = SeetaDetector::load("/nonexistent/seeta.bin", DetectorConfig::default());
        assert!(matches!(result, Err(DetectorError::ModelNotFound(_))));
    }
}

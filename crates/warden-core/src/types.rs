use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Side length of every normalized face sample, in pixels.
pub const CANONICAL_FACE_SIZE: u32 = 200;

/// Small contiguous integer identifying one subject inside a trained model.
pub type Label = u32;

/// Candidate face bounding box reported by a detector.
///
/// Coordinates are not clipped: a region may extend past the frame edges,
/// and it is up to the normalizer to reject it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedRegion {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    /// Detector-specific confidence. Only comparable within one backend.
    pub score: f32,
}

impl DetectedRegion {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height, score: 0.0 }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// True if the whole region lies within a `width` × `height` frame.
    pub fn is_within(&self, width: u32, height: u32) -> bool {
        self.x >= 0
            && self.y >= 0
            && self.width > 0
            && self.height > 0
            && self.x as u64 + self.width as u64 <= width as u64
            && self.y as u64 + self.height as u64 <= height as u64
    }

    /// Intersection-over-Union with another region.
    pub fn iou(&self, other: &DetectedRegion) -> f32 {
        let x1 = self.x.max(other.x) as i64;
        let y1 = self.y.max(other.y) as i64;
        let x2 = (self.x as i64 + self.width as i64).min(other.x as i64 + other.width as i64);
        let y2 = (self.y as i64 + self.height as i64).min(other.y as i64 + other.height as i64);

        let inter = ((x2 - x1).max(0) * (y2 - y1).max(0)) as f32;
        let union = self.area() as f32 + other.area() as f32 - inter;

        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }
}

/// A canonical-size grayscale face sample.
///
/// Only the normalizer and the dataset loader construct these; the size
/// is fixed at [`CANONICAL_FACE_SIZE`] on both paths.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedFace {
    image: GrayImage,
}

impl NormalizedFace {
    pub(crate) fn from_image(image: GrayImage) -> Option<Self> {
        let (w, h) = image.dimensions();
        (w == CANONICAL_FACE_SIZE && h == CANONICAL_FACE_SIZE).then_some(Self { image })
    }

    /// For images the caller has just resampled to the canonical size.
    pub(crate) fn from_resampled(image: GrayImage) -> Self {
        debug_assert_eq!(image.dimensions(), (CANONICAL_FACE_SIZE, CANONICAL_FACE_SIZE));
        Self { image }
    }

    pub fn image(&self) -> &GrayImage {
        &self.image
    }

    /// Row-major intensity values, `CANONICAL_FACE_SIZE²` bytes.
    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn size(&self) -> u32 {
        CANONICAL_FACE_SIZE
    }
}

/// Opaque, immutable subject identifier. This is the join key between the
/// dataset, the identity store and trained models; display names are not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(Uuid);

impl SubjectId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SubjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for SubjectId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// An enrolled person.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: SubjectId,
    pub name: String,
}

impl Subject {
    /// A new subject with a freshly minted id. The name is trimmed.
    pub fn new(name: &str) -> Self {
        Self::with_id(SubjectId::new(), name)
    }

    pub fn with_id(id: SubjectId, name: &str) -> Self {
        Self {
            id,
            name: name.trim().to_string(),
        }
    }
}

/// Outcome of scoring one face against a trained model.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionResult {
    pub label: Label,
    pub subject: String,
    /// Chi-square distance to the nearest training sample. Lower = more similar.
    pub score: f64,
}

/// Terminal result of one verification session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecisionOutcome {
    Admit(String),
    Deny,
    NoFaceFound,
}

impl DecisionOutcome {
    pub fn is_admit(&self) -> bool {
        matches!(self, DecisionOutcome::Admit(_))
    }
}

impl fmt::Display for DecisionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecisionOutcome::Admit(name) => write!(f, "admit ({name})"),
            DecisionOutcome::Deny => f.write_str("deny"),
            DecisionOutcome::NoFaceFound => f.write_str("deny (no face found)"),
        }
    }
}

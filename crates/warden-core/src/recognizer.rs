//! Nearest-neighbour matching of a face against a trained model.

use crate::lbph;
use crate::model::{TrainedModel, TrainedSample};
use crate::types::{Label, NormalizedFace, RecognitionResult};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum RecognizeError {
    #[error("model has no samples")]
    EmptyModel,
    #[error("label {label} is not bound in the model registry")]
    ModelLabelMismatch { label: Label },
}

/// Nearest stored sample to a probe histogram.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Nearest {
    pub label: Label,
    pub index: usize,
    pub distance: f64,
}

/// Strategy for comparing a probe histogram against the stored samples.
pub trait Matcher {
    fn nearest(&self, probe: &[f32], samples: &[TrainedSample]) -> Option<Nearest>;
}

/// Chi-square nearest neighbour.
///
/// Always visits every sample, so timing does not depend on where the
/// best match sits. Ties keep the earliest sample.
pub struct ChiSquareMatcher;

impl Matcher for ChiSquareMatcher {
    fn nearest(&self, probe: &[f32], samples: &[TrainedSample]) -> Option<Nearest> {
        let mut best: Option<Nearest> = None;

        for (index, sample) in samples.iter().enumerate() {
            let distance = lbph::chi_square(probe, &sample.histogram);
            if best.map_or(true, |b| distance < b.distance) {
                best = Some(Nearest {
                    label: sample.label,
                    index,
                    distance,
                });
            }
        }

        best
    }
}

/// Score `face` against `model` with the default matcher.
pub fn classify(model: &TrainedModel, face: &NormalizedFace) -> Result<RecognitionResult, RecognizeError> {
    classify_with(&ChiSquareMatcher, model, face)
}

pub fn classify_with<M: Matcher + ?Sized>(
    matcher: &M,
    model: &TrainedModel,
    face: &NormalizedFace,
) -> Result<RecognitionResult, RecognizeError> {
    let probe = lbph::histogram(face.pixels(), face.size(), model.params());
    let nearest = matcher
        .nearest(&probe, model.samples())
        .ok_or(RecognizeError::EmptyModel)?;

    let subject = model
        .registry()
        .name_of(nearest.label)
        .map_err(|_| RecognizeError::ModelLabelMismatch { label: nearest.label })?;

    tracing::trace!(
        label = nearest.label,
        subject,
        score = nearest.distance,
        "face classified"
    );

    Ok(RecognitionResult {
        label: nearest.label,
        subject: subject.to_string(),
        score: nearest.distance,
    })
}

//! Builds a [`TrainedModel`] from the enrolled dataset.

use crate::dataset::DatasetEntry;
use crate::lbph::{self, LbphError, LbphParams};
use crate::model::{ModelError, TrainedModel, TrainedSample};
use crate::registry::{LabelRegistry, RegistryError};
use crate::types::CANONICAL_FACE_SIZE;
use std::time::Instant;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrainError {
    #[error("no training data")]
    NoTrainingData,
    #[error("invalid LBPH parameters: {0}")]
    Params(#[from] LbphError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Builds an LBPH model from the whole dataset.
#[derive(Debug, Clone, Default)]
pub struct Trainer {
    params: LbphParams,
}

impl Trainer {
    pub fn new(params: LbphParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &LbphParams {
        &self.params
    }

    /// Train on every entry. The label registry is rebuilt from scratch,
    /// so labels depend only on the set of subject names present.
    pub fn train(&self, entries: &[DatasetEntry]) -> Result<TrainedModel, TrainError> {
        if entries.is_empty() {
            return Err(TrainError::NoTrainingData);
        }
        self.params.validate(CANONICAL_FACE_SIZE)?;

        let start = Instant::now();
        let registry = LabelRegistry::build(entries);

        let samples = entries
            .iter()
            .map(|entry| {
                let label = registry.label_of(&entry.subject.name)?;
                let histogram = lbph::histogram(entry.face.pixels(), entry.face.size(), &self.params);
                Ok(TrainedSample { label, histogram })
            })
            .collect::<Result<Vec<_>, RegistryError>>()?;

        let model = TrainedModel::new(self.params, registry, samples)?;

        tracing::info!(
            subjects = model.registry().len(),
            samples = model.samples().len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "training complete"
        );
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NormalizedFace, Subject};
    use image::GrayImage;

    fn entry(subject: &Subject, sequence: u32, shade: u8) -> DatasetEntry {
        let img = GrayImage::from_fn(CANONICAL_FACE_SIZE, CANONICAL_FACE_SIZE, |x, y| {
            image::Luma([((x / 10 + y / 10) as u8).wrapping_mul(shade)])
        });
        DatasetEntry {
            subject: subject.clone(),
            sequence,
            face: NormalizedFace::from_image(img).unwrap(),
            key: format!("{}/{sequence}", subject.id),
        }
    }

    #[test]
    fn test_empty_dataset() {
        let err = Trainer::default().train(&[]).unwrap_err();
        assert!(matches!(err, TrainError::NoTrainingData));
    }

    #[test]
    fn test_one_sample_per_entry() {
        let bob = Subject::new("Bob");
        let alice = Subject::new("Alice");
        let entries = vec![entry(&bob, 1, 3), entry(&alice, 1, 5), entry(&bob, 2, 7)];

        let model = Trainer::default().train(&entries).unwrap();
        assert_eq!(model.samples().len(), 3);
        assert_eq!(model.registry().len(), 2);
        // Labels follow sorted names, not entry order.
        assert_eq!(model.samples()[0].label, 1);
        assert_eq!(model.samples()[1].label, 0);
    }

    #[test]
    fn test_invalid_params() {
        let trainer = Trainer::new(LbphParams { neighbors: 0, ..Default::default() });
        let entries = vec![entry(&Subject::new("Alice"), 1, 3)];
        assert!(matches!(trainer.train(&entries), Err(TrainError::Params(_))));
    }
}

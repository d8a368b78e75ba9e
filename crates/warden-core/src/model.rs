//! Trained LBPH model and its on-disk artifact.

use crate::dataset::write_atomic;
use crate::lbph::LbphParams;
use crate::registry::LabelRegistry;
use crate::types::{Label, CANONICAL_FACE_SIZE};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("failed to load model {path}: {reason}")]
    Load { path: PathBuf, reason: String },
    #[error("failed to write model {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode model: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("invalid model: {0}")]
    Invalid(String),
}

/// One training sample's feature vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedSample {
    pub label: Label,
    pub histogram: Vec<f32>,
}

/// Classifier produced by the trainer. Immutable once built; a new
/// training run replaces it wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    params: LbphParams,
    face_size: u32,
    registry: LabelRegistry,
    samples: Vec<TrainedSample>,
    trained_at: DateTime<Utc>,
}

impl TrainedModel {
    pub(crate) fn new(
        params: LbphParams,
        registry: LabelRegistry,
        samples: Vec<TrainedSample>,
    ) -> Result<Self, ModelError> {
        let model = Self {
            params,
            face_size: CANONICAL_FACE_SIZE,
            registry,
            samples,
            trained_at: Utc::now(),
        };
        model.validate()?;
        Ok(model)
    }

    pub fn params(&self) -> &LbphParams {
        &self.params
    }

    pub fn registry(&self) -> &LabelRegistry {
        &self.registry
    }

    pub fn samples(&self) -> &[TrainedSample] {
        &self.samples
    }

    pub fn trained_at(&self) -> DateTime<Utc> {
        self.trained_at
    }

    /// Labels carried by the stored samples, deduplicated, ascending.
    pub fn labels(&self) -> Vec<Label> {
        let mut labels: Vec<Label> = self.samples.iter().map(|s| s.label).collect();
        labels.sort_unstable();
        labels.dedup();
        labels
    }

    fn validate(&self) -> Result<(), ModelError> {
        if self.face_size != CANONICAL_FACE_SIZE {
            return Err(ModelError::Invalid(format!(
                "face size {} does not match {CANONICAL_FACE_SIZE}",
                self.face_size
            )));
        }
        self.params
            .validate(self.face_size)
            .map_err(|e| ModelError::Invalid(e.to_string()))?;
        if self.samples.is_empty() {
            return Err(ModelError::Invalid("no samples".into()));
        }

        let expected = self.params.histogram_len();
        for (i, sample) in self.samples.iter().enumerate() {
            if !self.registry.contains_label(sample.label) {
                return Err(ModelError::Invalid(format!(
                    "sample {i} has label {} outside the registry",
                    sample.label
                )));
            }
            if sample.histogram.len() != expected {
                return Err(ModelError::Invalid(format!(
                    "sample {i} histogram has {} bins, expected {expected}",
                    sample.histogram.len()
                )));
            }
        }
        Ok(())
    }

    /// Write the model as JSON, replacing any previous artifact atomically.
    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        let bytes = serde_json::to_vec(self)?;
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|source| ModelError::Write {
                path: path.to_path_buf(),
                source,
            })?;
        }
        write_atomic(path, &bytes).map_err(|source| ModelError::Write {
            path: path.to_path_buf(),
            source,
        })?;

        tracing::info!(
            path = %path.display(),
            subjects = self.registry.len(),
            samples = self.samples.len(),
            "model saved"
        );
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let load_err = |reason: String| ModelError::Load {
            path: path.to_path_buf(),
            reason,
        };

        let bytes = fs::read(path).map_err(|e| load_err(e.to_string()))?;
        let model: TrainedModel =
            serde_json::from_slice(&bytes).map_err(|e| load_err(e.to_string()))?;
        model.validate().map_err(|e| load_err(e.to_string()))?;

        tracing::info!(
            path = %path.display(),
            subjects = model.registry.len(),
            samples = model.samples.len(),
            trained_at = %model.trained_at,
            "model loaded"
        );
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(label: Label) -> TrainedSample {
        let params = LbphParams::default();
        let mut histogram = vec![0.0; params.histogram_len()];
        histogram[label as usize] = 1.0;
        TrainedSample { label, histogram }
    }

    fn model() -> TrainedModel {
        TrainedModel::new(
            LbphParams::default(),
            LabelRegistry::from_names(["Alice", "Bob"]),
            vec![sample(0), sample(1), sample(1)],
        )
        .unwrap()
    }

    #[test]
    fn test_labels() {
        assert_eq!(model().labels(), vec![0, 1]);
    }

    #[test]
    fn test_rejects_label_outside_registry() {
        let err = TrainedModel::new(
            LbphParams::default(),
            LabelRegistry::from_names(["Alice"]),
            vec![sample(0), sample(1)],
        )
        .unwrap_err();
        assert!(matches!(err, ModelError::Invalid(_)));
    }

    #[test]
    fn test_rejects_short_histogram() {
        let err = TrainedModel::new(
            LbphParams::default(),
            LabelRegistry::from_names(["Alice"]),
            vec![TrainedSample { label: 0, histogram: vec![1.0; 4] }],
        )
        .unwrap_err();
        assert!(matches!(err, ModelError::Invalid(_)));
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/model.json");
        let original = model();
        original.save(&path).unwrap();

        let loaded = TrainedModel::load(&path).unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = TrainedModel::load(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, ModelError::Load { .. }));
    }

    #[test]
    fn test_load_rejects_tampered_labels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        model().save(&path).unwrap();

        let mut json: serde_json::Value =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        json["registry"] = serde_json::json!(["Alice"]);
        fs::write(&path, serde_json::to_vec(&json).unwrap()).unwrap();

        assert!(matches!(
            TrainedModel::load(&path),
            Err(ModelError::Load { .. })
        ));
    }

    #[test]
    fn test_load_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        fs::write(&path, b"not json").unwrap();
        assert!(matches!(
            TrainedModel::load(&path),
            Err(ModelError::Load { .. })
        ));
    }
}

//! Bijective subject name ↔ label table.
//!
//! Labels are assigned in lexicographic order of subject names, so two
//! training runs over the same set of subjects always produce the same
//! labels regardless of how the dataset happens to be enumerated.

use crate::dataset::DatasetEntry;
use crate::types::Label;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown label: {0}")]
    UnknownLabel(Label),
    #[error("unknown subject: {0}")]
    UnknownSubject(String),
    #[error("subject listed twice: {0}")]
    DuplicateSubject(String),
}

/// Label `i` is bound to `names[i]`. Serialized as the plain name list.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct LabelRegistry {
    names: Vec<String>,
    labels: BTreeMap<String, Label>,
}

impl LabelRegistry {
    /// Build from any collection of names; duplicates collapse.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = names.into_iter().map(Into::into).collect();
        names.sort();
        names.dedup();
        let labels = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i as Label))
            .collect();
        Self { names, labels }
    }

    /// Registry over every subject that has at least one entry.
    pub fn build(entries: &[DatasetEntry]) -> Self {
        Self::from_names(entries.iter().map(|e| e.subject.name.clone()))
    }

    pub fn label_of(&self, name: &str) -> Result<Label, RegistryError> {
        self.labels
            .get(name)
            .copied()
            .ok_or_else(|| RegistryError::UnknownSubject(name.to_string()))
    }

    pub fn name_of(&self, label: Label) -> Result<&str, RegistryError> {
        self.names
            .get(label as usize)
            .map(String::as_str)
            .ok_or(RegistryError::UnknownLabel(label))
    }

    pub fn contains_label(&self, label: Label) -> bool {
        (label as usize) < self.names.len()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// `(label, name)` pairs in label order.
    pub fn iter(&self) -> impl Iterator<Item = (Label, &str)> {
        self.names
            .iter()
            .enumerate()
            .map(|(i, name)| (i as Label, name.as_str()))
    }
}

impl TryFrom<Vec<String>> for LabelRegistry {
    type Error = RegistryError;

    /// Accepts the stored order as-is; only the bijection is checked.
    fn try_from(names: Vec<String>) -> Result<Self, Self::Error> {
        let mut labels = BTreeMap::new();
        for (i, name) in names.iter().enumerate() {
            if labels.insert(name.clone(), i as Label).is_some() {
                return Err(RegistryError::DuplicateSubject(name.clone()));
            }
        }
        Ok(Self { names, labels })
    }
}

impl From<LabelRegistry> for Vec<String> {
    fn from(registry: LabelRegistry) -> Self {
        registry.names
    }
}

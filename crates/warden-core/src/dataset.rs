//! Labeled face samples on disk.
//!
//! Layout under the store root:
//!
//! ```text
//! manifest.json                   subjects, their ids and sample counts
//! <subject-id>/<slug>_<seq>.png   one canonical-size sample each, seq from 1
//! ```
//!
//! Samples are always enumerated from the manifest. Filenames are derived
//! from the subject, never parsed back into identities.

use crate::types::{NormalizedFace, Subject, SubjectId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const MANIFEST_FILE: &str = "manifest.json";

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("dataset I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("sample image: {0}")]
    Image(#[from] image::ImageError),
    #[error("manifest: {0}")]
    Manifest(#[from] serde_json::Error),
    #[error("invalid subject name: {0:?}")]
    InvalidSubjectName(String),
    #[error("subject name {name:?} already belongs to {existing}")]
    SubjectNameTaken { name: String, existing: SubjectId },
    #[error("sample {key} is {width}x{height}, not canonical size")]
    InvalidSample { key: String, width: u32, height: u32 },
}

/// One subject as persisted in the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectRecord {
    pub id: SubjectId,
    pub name: String,
    /// Number of samples; sequence indices run `1..=samples`.
    pub samples: u32,
    pub created_at: DateTime<Utc>,
}

impl SubjectRecord {
    pub fn subject(&self) -> Subject {
        Subject::with_id(self.id, &self.name)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Manifest {
    subjects: Vec<SubjectRecord>,
}

/// One stored training sample.
#[derive(Debug, Clone)]
pub struct DatasetEntry {
    pub subject: Subject,
    pub sequence: u32,
    pub face: NormalizedFace,
    pub key: String,
}

/// Display name with surrounding whitespace removed and inner spaces
/// replaced by underscores.
pub fn slug(name: &str) -> String {
    name.trim().replace(' ', "_")
}

/// Storage key of a sample, relative to the store root.
pub fn storage_key(subject: &Subject, sequence: u32) -> String {
    format!("{}/{}_{}.png", subject.id, slug(&subject.name), sequence)
}

/// Directory-backed sample store. Assumes a single writer.
pub struct DatasetStore {
    root: PathBuf,
    manifest: Manifest,
}

impl DatasetStore {
    /// Open (creating if needed) the store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, DatasetError> {
        let root = root.into();
        fs::create_dir_all(&root)?;

        let manifest_path = root.join(MANIFEST_FILE);
        let manifest = if manifest_path.exists() {
            serde_json::from_slice(&fs::read(&manifest_path)?)?
        } else {
            Manifest::default()
        };

        tracing::debug!(
            root = %root.display(),
            subjects = manifest.subjects.len(),
            "opened dataset"
        );
        Ok(Self { root, manifest })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn subjects(&self) -> &[SubjectRecord] {
        &self.manifest.subjects
    }

    pub fn sample_count(&self) -> usize {
        self.manifest.subjects.iter().map(|s| s.samples as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.sample_count() == 0
    }

    pub fn find_subject(&self, name: &str) -> Option<Subject> {
        let name = name.trim();
        self.manifest
            .subjects
            .iter()
            .find(|s| s.name == name)
            .map(SubjectRecord::subject)
    }

    /// The stored subject called `name`, or a new one with a fresh id.
    /// A new subject is only persisted once its first sample is enrolled.
    pub fn subject(&self, name: &str) -> Subject {
        self.find_subject(name).unwrap_or_else(|| Subject::new(name))
    }

    /// Append a sample for `subject` under the next sequence index.
    pub fn enroll(
        &mut self,
        subject: &Subject,
        face: &NormalizedFace,
    ) -> Result<DatasetEntry, DatasetError> {
        let name = subject.name.trim();
        if name.is_empty() {
            return Err(DatasetError::InvalidSubjectName(subject.name.clone()));
        }

        let existing = self.manifest.subjects.iter().position(|s| s.id == subject.id);
        let (stored, sequence) = match existing {
            Some(idx) => {
                let record = &self.manifest.subjects[idx];
                (record.subject(), record.samples + 1)
            }
            None => {
                if let Some(other) = self.manifest.subjects.iter().find(|s| s.name == name) {
                    return Err(DatasetError::SubjectNameTaken {
                        name: name.to_string(),
                        existing: other.id,
                    });
                }
                (Subject::with_id(subject.id, name), 1)
            }
        };
        let key = storage_key(&stored, sequence);

        let path = self.root.join(&key);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        face.image().save_with_format(&path, image::ImageFormat::Png)?;

        // The manifest only changes once the sample is on disk, and is
        // restored if it cannot be persisted.
        let idx = match existing {
            Some(idx) => idx,
            None => {
                self.manifest.subjects.push(SubjectRecord {
                    id: stored.id,
                    name: stored.name.clone(),
                    samples: 0,
                    created_at: Utc::now(),
                });
                self.manifest.subjects.len() - 1
            }
        };
        self.manifest.subjects[idx].samples = sequence;
        if let Err(e) = self.save_manifest() {
            if existing.is_some() {
                self.manifest.subjects[idx].samples = sequence - 1;
            } else {
                self.manifest.subjects.pop();
            }
            let _ = fs::remove_file(&path);
            return Err(e);
        }

        if existing.is_none() {
            tracing::info!(subject = %stored.name, id = %stored.id, "new subject");
        }
        tracing::debug!(subject = %stored.name, sequence, key = %key, "sample enrolled");
        Ok(DatasetEntry {
            subject: stored,
            sequence,
            face: face.clone(),
            key,
        })
    }

    /// Load every sample listed in the manifest.
    pub fn entries(&self) -> Result<Vec<DatasetEntry>, DatasetError> {
        let mut entries = Vec::with_capacity(self.sample_count());
        for record in &self.manifest.subjects {
            let subject = record.subject();
            for sequence in 1..=record.samples {
                let key = storage_key(&subject, sequence);
                let gray = image::open(self.root.join(&key))?.to_luma8();
                let (width, height) = gray.dimensions();
                let face = NormalizedFace::from_image(gray)
                    .ok_or(DatasetError::InvalidSample { key: key.clone(), width, height })?;
                entries.push(DatasetEntry {
                    subject: subject.clone(),
                    sequence,
                    face,
                    key,
                });
            }
        }
        Ok(entries)
    }

    fn save_manifest(&self) -> Result<(), DatasetError> {
        let bytes = serde_json::to_vec_pretty(&self.manifest)?;
        write_atomic(&self.root.join(MANIFEST_FILE), &bytes)?;
        Ok(())
    }
}

/// Write via a sibling temp file and rename, so readers never see a
/// half-written file.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CANONICAL_FACE_SIZE;
    use image::GrayImage;

    fn face(seed: u8) -> NormalizedFace {
        let img = GrayImage::from_fn(CANONICAL_FACE_SIZE, CANONICAL_FACE_SIZE, |x, y| {
            image::Luma([(x as u8).wrapping_mul(seed).wrapping_add(y as u8)])
        });
        NormalizedFace::from_image(img).unwrap()
    }

    #[test]
    fn test_slug_and_key() {
        assert_eq!(slug("  Ada King Lovelace "), "Ada_King_Lovelace");
        let subject = Subject::new("Ada Lovelace");
        assert_eq!(
            storage_key(&subject, 3),
            format!("{}/Ada_Lovelace_3.png", subject.id)
        );
    }

    #[test]
    fn test_enroll_appends_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DatasetStore::open(dir.path()).unwrap();
        let alice = store.subject("Alice");

        let first = store.enroll(&alice, &face(3)).unwrap();
        let second = store.enroll(&alice, &face(3)).unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert_ne!(first.key, second.key);
        assert!(dir.path().join(&second.key).exists());
        assert_eq!(store.subjects()[0].samples, 2);
    }

    #[test]
    fn test_entries_reload_bit_identical() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = DatasetStore::open(dir.path()).unwrap();
            let bob = store.subject("Bob");
            store.enroll(&bob, &face(5)).unwrap();
            store.enroll(&bob, &face(7)).unwrap();
        }

        let store = DatasetStore::open(dir.path()).unwrap();
        let entries = store.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].face, face(5));
        assert_eq!(entries[1].face, face(7));
        assert_eq!(entries[1].subject.name, "Bob");
    }

    #[test]
    fn test_subject_lookup_reuses_id() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DatasetStore::open(dir.path()).unwrap();
        let carol = store.subject("Carol");
        store.enroll(&carol, &face(1)).unwrap();
        assert_eq!(store.subject(" Carol ").id, carol.id);
    }

    #[test]
    fn test_name_collision_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DatasetStore::open(dir.path()).unwrap();
        let first = Subject::new("Dave");
        store.enroll(&first, &face(1)).unwrap();

        let impostor = Subject::new("Dave");
        let err = store.enroll(&impostor, &face(2)).unwrap_err();
        assert!(matches!(err, DatasetError::SubjectNameTaken { existing, .. } if existing == first.id));
        assert_eq!(store.sample_count(), 1);
    }

    #[test]
    fn test_empty_name_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DatasetStore::open(dir.path()).unwrap();
        let err = store.enroll(&Subject::new("   "), &face(1)).unwrap_err();
        assert!(matches!(err, DatasetError::InvalidSubjectName(_)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_failed_sample_write_leaves_store_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DatasetStore::open(dir.path()).unwrap();
        let frank = Subject::new("Frank");
        // A file where the subject directory should go.
        fs::write(dir.path().join(frank.id.to_string()), b"").unwrap();

        assert!(store.enroll(&frank, &face(1)).is_err());
        assert!(store.subjects().is_empty());
        assert!(!dir.path().join(MANIFEST_FILE).exists());
    }

    #[test]
    fn test_failed_manifest_write_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DatasetStore::open(dir.path()).unwrap();
        let grace = store.subject("Grace");
        store.enroll(&grace, &face(1)).unwrap();

        // A non-empty directory in place of the manifest makes the rename fail.
        let manifest = dir.path().join(MANIFEST_FILE);
        fs::remove_file(&manifest).unwrap();
        fs::create_dir_all(manifest.join("blocked")).unwrap();

        assert!(store.enroll(&grace, &face(2)).is_err());
        assert_eq!(store.subjects()[0].samples, 1);
        assert!(!dir.path().join(storage_key(&grace, 2)).exists());

        let heidi = Subject::new("Heidi");
        assert!(store.enroll(&heidi, &face(3)).is_err());
        assert_eq!(store.subjects().len(), 1);

        fs::remove_dir_all(&manifest).unwrap();
        let next = store.enroll(&grace, &face(2)).unwrap();
        assert_eq!(next.sequence, 2);
    }

    #[test]
    fn test_missing_sample_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DatasetStore::open(dir.path()).unwrap();
        let entry = store.enroll(&Subject::new("Erin"), &face(1)).unwrap();
        fs::remove_file(dir.path().join(&entry.key)).unwrap();
        assert!(store.entries().is_err());
    }
}

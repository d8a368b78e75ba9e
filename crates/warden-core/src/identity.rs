//! Registration records kept alongside the face dataset.

use crate::types::SubjectId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("identity store: {0}")]
    Backend(String),
    #[error("subject {0} already registered")]
    AlreadyRegistered(SubjectId),
    #[error("subject {0} not found")]
    NotFound(SubjectId),
}

/// Free-form registration details collected at enrollment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectMetadata {
    pub reg_no: Option<String>,
    pub year: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub id: SubjectId,
    pub full_name: String,
    pub metadata: SubjectMetadata,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Persists who a subject is. The core never deduplicates names here;
/// the dataset store owns name uniqueness.
pub trait IdentityStore {
    /// Register `name` and return the id minted for it. That id keys the
    /// subject's samples in the dataset.
    fn create_subject(
        &mut self,
        name: &str,
        metadata: &SubjectMetadata,
    ) -> Result<SubjectId, IdentityError>;

    /// Drop a registration that never received samples.
    fn remove(&mut self, id: SubjectId) -> Result<(), IdentityError>;

    fn get(&self, id: SubjectId) -> Result<Option<IdentityRecord>, IdentityError>;

    fn list(&self) -> Result<Vec<IdentityRecord>, IdentityError>;
}

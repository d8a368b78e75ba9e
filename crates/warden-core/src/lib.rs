//! warden-core: face enrollment, LBPH training and recognition, and the
//! access decision policy.
//!
//! Faces are located with the SeetaFace cascade (`rustface`), cropped to a
//! 200×200 grayscale sample, described by Local Binary Pattern Histograms
//! and matched by chi-square distance against the enrolled dataset.

pub mod dataset;
pub mod detector;
pub mod frame;
pub mod identity;
pub mod lbph;
pub mod model;
pub mod normalizer;
pub mod policy;
pub mod recognizer;
pub mod registry;
pub mod session;
pub mod source;
pub mod trainer;
pub mod types;

pub use dataset::{DatasetEntry, DatasetError, DatasetStore, SubjectRecord};
pub use detector::{DetectorConfig, DetectorError, FaceDetector, SeetaDetector};
pub use frame::{PixelLayout, RawFrame};
pub use identity::{IdentityError, IdentityRecord, IdentityStore, SubjectMetadata};
pub use lbph::LbphParams;
pub use model::{ModelError, TrainedModel};
pub use normalizer::{NormalizeError, Normalizer};
pub use policy::{DecisionPolicy, SessionState, DEFAULT_ADMIT_THRESHOLD};
pub use recognizer::{classify, ChiSquareMatcher, Matcher, RecognizeError};
pub use registry::{LabelRegistry, RegistryError};
pub use session::{
    CancelToken, EnrollmentReport, EnrollmentSession, SessionBudget, SessionError, SessionEvent,
    SessionKind, SessionObserver, SessionReport, Silent, VerificationSession,
};
pub use source::{CaptureError, FrameSource, ScopedSource, StillSource};
pub use trainer::{TrainError, Trainer};
pub use types::{
    DecisionOutcome, DetectedRegion, Label, NormalizedFace, RecognitionResult, Subject, SubjectId,
    CANONICAL_FACE_SIZE,
};

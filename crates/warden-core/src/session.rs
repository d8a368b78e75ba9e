//! Verification and enrollment sessions.
//!
//! A session owns its frame source for its whole lifetime, processes frames
//! strictly in order on the calling thread and polls its [`CancelToken`]
//! once per frame, before pulling the next one.

use crate::dataset::{DatasetEntry, DatasetError, DatasetStore};
use crate::detector::{DetectorError, FaceDetector};
use crate::frame::RawFrame;
use crate::model::TrainedModel;
use crate::normalizer::{NormalizeError, Normalizer};
use crate::policy::{DecisionPolicy, SessionState, DEFAULT_ADMIT_THRESHOLD};
use crate::recognizer::{self, RecognizeError};
use crate::source::{CaptureError, FrameSource, ScopedSource};
use crate::types::{DecisionOutcome, DetectedRegion, NormalizedFace, RecognitionResult, Subject};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Default number of samples captured per enrollment.
pub const DEFAULT_SAMPLES_PER_ENROLL: u32 = 20;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("capture failed: {0}")]
    Capture(#[from] CaptureError),
    #[error("detection failed: {0}")]
    Detector(#[from] DetectorError),
    #[error("normalization failed: {0}")]
    Normalize(#[from] NormalizeError),
    #[error("recognition failed: {0}")]
    Recognize(#[from] RecognizeError),
    #[error("dataset: {0}")]
    Dataset(#[from] DatasetError),
}

/// Cooperative cancellation flag shared between a session and whoever may
/// want to stop it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Upper bounds on a session. `None` means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionBudget {
    pub max_frames: Option<u32>,
    pub timeout: Option<Duration>,
}

impl SessionBudget {
    pub fn frames(max_frames: u32) -> Self {
        Self {
            max_frames: Some(max_frames),
            timeout: None,
        }
    }

    fn exhausted(&self, frames: u32, elapsed: Duration) -> bool {
        self.max_frames.is_some_and(|max| frames >= max)
            || self.timeout.is_some_and(|limit| elapsed >= limit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Verification,
    Enrollment,
}

/// Progress notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Started(SessionKind),
    StateChanged(SessionState),
    SampleCaptured { sequence: u32, captured: u32, target: u32 },
    Cancelled,
    BudgetExhausted { frames: u32 },
    Outcome(DecisionOutcome),
    Error(String),
}

pub trait SessionObserver {
    fn on_event(&mut self, event: &SessionEvent);
}

impl<F: FnMut(&SessionEvent)> SessionObserver for F {
    fn on_event(&mut self, event: &SessionEvent) {
        self(event)
    }
}

/// Observer that discards every event.
pub struct Silent;

impl SessionObserver for Silent {
    fn on_event(&mut self, _event: &SessionEvent) {}
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    pub outcome: DecisionOutcome,
    /// Frames pulled from the source, dark ones included.
    pub frames: u32,
    pub dark_frames: u32,
    pub best: Option<RecognitionResult>,
    pub elapsed: Duration,
}

impl SessionReport {
    pub fn best_score(&self) -> Option<f64> {
        self.best.as_ref().map(|b| b.score)
    }
}

/// Why a loop stopped without reaching its goal.
enum Stop {
    Cancelled,
    Budget,
}

fn check_stop(cancel: &CancelToken, budget: &SessionBudget, frames: u32, started: Instant) -> Option<Stop> {
    if cancel.is_cancelled() {
        Some(Stop::Cancelled)
    } else if budget.exhausted(frames, started.elapsed()) {
        Some(Stop::Budget)
    } else {
        None
    }
}

fn report_stop(stop: Stop, frames: u32, observer: &mut dyn SessionObserver) {
    match stop {
        Stop::Cancelled => {
            tracing::info!(frames, "session cancelled");
            observer.on_event(&SessionEvent::Cancelled);
        }
        Stop::Budget => {
            tracing::info!(frames, "session budget exhausted");
            observer.on_event(&SessionEvent::BudgetExhausted { frames });
        }
    }
}

/// Normalize a region, turning out-of-bounds rejections into a skip.
fn normalize_or_skip(
    normalizer: &Normalizer,
    frame: &RawFrame,
    region: &DetectedRegion,
) -> Option<Result<NormalizedFace, NormalizeError>> {
    match normalizer.normalize(frame, region) {
        Ok(face) => Some(Ok(face)),
        Err(e @ NormalizeError::RegionOutOfBounds { .. }) => {
            tracing::debug!(error = %e, frame = frame.sequence, "skipping region");
            None
        }
        Err(e) => Some(Err(e)),
    }
}

/// Runs the decision policy over live frames until it reaches a verdict.
pub struct VerificationSession {
    admit_threshold: f64,
    budget: SessionBudget,
    cancel: CancelToken,
    normalizer: Normalizer,
}

impl Default for VerificationSession {
    fn default() -> Self {
        Self::new(DEFAULT_ADMIT_THRESHOLD)
    }
}

impl VerificationSession {
    pub fn new(admit_threshold: f64) -> Self {
        Self {
            admit_threshold,
            budget: SessionBudget::default(),
            cancel: CancelToken::new(),
            normalizer: Normalizer::new(),
        }
    }

    pub fn with_budget(mut self, budget: SessionBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Acquire `source`, scan until the policy is terminal and release the
    /// source on every exit path. Fatal errors are reported to the observer
    /// and returned, never turned into a Deny.
    pub fn run<S, D>(
        &self,
        source: S,
        detector: &mut D,
        model: &TrainedModel,
        observer: &mut dyn SessionObserver,
    ) -> Result<SessionReport, SessionError>
    where
        S: FrameSource,
        D: FaceDetector + ?Sized,
    {
        let result = self.scan(source, detector, model, observer);
        if let Err(e) = &result {
            tracing::error!(error = %e, "verification failed");
            observer.on_event(&SessionEvent::Error(e.to_string()));
        }
        result
    }

    fn scan<S, D>(
        &self,
        source: S,
        detector: &mut D,
        model: &TrainedModel,
        observer: &mut dyn SessionObserver,
    ) -> Result<SessionReport, SessionError>
    where
        S: FrameSource,
        D: FaceDetector + ?Sized,
    {
        let started = Instant::now();
        let mut source = ScopedSource::acquire(source)?;
        let mut policy = DecisionPolicy::new(self.admit_threshold);
        let mut frames = 0u32;
        let mut dark_frames = 0u32;

        tracing::info!(
            threshold = self.admit_threshold,
            subjects = model.registry().len(),
            "verification started"
        );
        observer.on_event(&SessionEvent::Started(SessionKind::Verification));

        while !policy.is_terminal() {
            if let Some(stop) = check_stop(&self.cancel, &self.budget, frames, started) {
                report_stop(stop, frames, observer);
                policy.conclude();
            } else {
                let frame = source.next_frame()?;
                frames += 1;
                if frame.is_dark {
                    dark_frames += 1;
                    tracing::trace!(frame = frame.sequence, "dark frame skipped");
                    continue;
                }

                let regions = detector.detect(&frame)?;
                let faces = regions
                    .iter()
                    .filter_map(|region| normalize_or_skip(&self.normalizer, &frame, region))
                    .map(|face| -> Result<RecognitionResult, SessionError> {
                        Ok(recognizer::classify(model, &face?)?)
                    });
                policy.observe(regions.len(), faces)?;
            }

            for state in policy.take_transitions() {
                observer.on_event(&SessionEvent::StateChanged(state));
            }
        }

        source.release();

        let outcome = policy.conclude();
        let report = SessionReport {
            outcome: outcome.clone(),
            frames,
            dark_frames,
            best: policy.best_match().cloned(),
            elapsed: started.elapsed(),
        };

        tracing::info!(
            outcome = %outcome,
            frames,
            dark_frames,
            best_score = report.best_score(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "verification finished"
        );
        observer.on_event(&SessionEvent::Outcome(outcome));
        Ok(report)
    }
}

#[derive(Debug, Clone)]
pub struct EnrollmentReport {
    pub subject: Subject,
    pub entries: Vec<DatasetEntry>,
    pub frames: u32,
    pub target: u32,
}

impl EnrollmentReport {
    pub fn is_complete(&self) -> bool {
        self.entries.len() as u32 >= self.target
    }
}

/// Captures face samples of one subject into the dataset.
pub struct EnrollmentSession {
    target: u32,
    budget: SessionBudget,
    cancel: CancelToken,
    normalizer: Normalizer,
}

impl Default for EnrollmentSession {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLES_PER_ENROLL)
    }
}

impl EnrollmentSession {
    pub fn new(target: u32) -> Self {
        Self {
            target,
            budget: SessionBudget::default(),
            cancel: CancelToken::new(),
            normalizer: Normalizer::new(),
        }
    }

    pub fn with_budget(mut self, budget: SessionBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Store up to `target` samples of `subject`, one per usable frame (the
    /// largest in-bounds region). Stops early on cancel or budget; samples
    /// already stored are kept.
    pub fn run<S, D>(
        &self,
        source: S,
        detector: &mut D,
        store: &mut DatasetStore,
        subject: &Subject,
        observer: &mut dyn SessionObserver,
    ) -> Result<EnrollmentReport, SessionError>
    where
        S: FrameSource,
        D: FaceDetector + ?Sized,
    {
        let result = self.capture(source, detector, store, subject, observer);
        if let Err(e) = &result {
            tracing::error!(error = %e, subject = %subject.name, "enrollment failed");
            observer.on_event(&SessionEvent::Error(e.to_string()));
        }
        result
    }

    fn capture<S, D>(
        &self,
        source: S,
        detector: &mut D,
        store: &mut DatasetStore,
        subject: &Subject,
        observer: &mut dyn SessionObserver,
    ) -> Result<EnrollmentReport, SessionError>
    where
        S: FrameSource,
        D: FaceDetector + ?Sized,
    {
        let started = Instant::now();
        let mut source = ScopedSource::acquire(source)?;
        let mut entries = Vec::new();
        let mut frames = 0u32;

        tracing::info!(subject = %subject.name, target = self.target, "enrollment started");
        observer.on_event(&SessionEvent::Started(SessionKind::Enrollment));

        while (entries.len() as u32) < self.target {
            if let Some(stop) = check_stop(&self.cancel, &self.budget, frames, started) {
                report_stop(stop, frames, observer);
                break;
            }

            let frame = source.next_frame()?;
            frames += 1;
            if frame.is_dark {
                continue;
            }

            let regions = detector.detect(&frame)?;
            let Some(region) = regions
                .iter()
                .filter(|r| r.is_within(frame.width, frame.height))
                .max_by_key(|r| r.area())
            else {
                tracing::trace!(frame = frame.sequence, detected = regions.len(), "no usable face");
                continue;
            };

            let face = self.normalizer.normalize(&frame, region)?;
            let entry = store.enroll(subject, &face)?;
            observer.on_event(&SessionEvent::SampleCaptured {
                sequence: entry.sequence,
                captured: entries.len() as u32 + 1,
                target: self.target,
            });
            entries.push(entry);
        }

        source.release();

        tracing::info!(
            subject = %subject.name,
            captured = entries.len(),
            target = self.target,
            frames,
            "enrollment finished"
        );
        Ok(EnrollmentReport {
            subject: subject.clone(),
            entries,
            frames,
            target: self.target,
        })
    }
}

//! Access decision state machine.
//!
//! ```text
//! Scanning ──(regions)──▶ FaceObserved ──(score < threshold)──▶ Matched ──▶ Terminal(Admit)
//!    ▲                        │
//!    └──────── Unmatched ◀────┘ (no face qualified)
//!
//! cancel / budget ──▶ Terminal(Deny), or Terminal(NoFaceFound) if no face was ever observed
//! ```
//!
//! The policy is passive: the session runner feeds it one frame at a time
//! and drains the recorded transitions to report them.

use crate::types::{DecisionOutcome, RecognitionResult};
use std::fmt;

/// Default admit threshold (chi-square distance, exclusive).
pub const DEFAULT_ADMIT_THRESHOLD: f64 = 45.0;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Scanning,
    FaceObserved,
    Matched,
    Unmatched,
    Terminal(DecisionOutcome),
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Scanning => f.write_str("scanning"),
            SessionState::FaceObserved => f.write_str("face observed"),
            SessionState::Matched => f.write_str("matched"),
            SessionState::Unmatched => f.write_str("unmatched"),
            SessionState::Terminal(outcome) => write!(f, "terminal: {outcome}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DecisionPolicy {
    admit_threshold: f64,
    state: SessionState,
    face_observed: bool,
    best: Option<RecognitionResult>,
    transitions: Vec<SessionState>,
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_ADMIT_THRESHOLD)
    }
}

impl DecisionPolicy {
    pub fn new(admit_threshold: f64) -> Self {
        Self {
            admit_threshold,
            state: SessionState::Scanning,
            face_observed: false,
            best: None,
            transitions: Vec::new(),
        }
    }

    pub fn admit_threshold(&self) -> f64 {
        self.admit_threshold
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn outcome(&self) -> Option<&DecisionOutcome> {
        match &self.state {
            SessionState::Terminal(outcome) => Some(outcome),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.outcome().is_some()
    }

    /// Whether any frame in this session contained a detected region.
    pub fn face_observed(&self) -> bool {
        self.face_observed
    }

    /// Lowest-scoring classification seen so far.
    pub fn best_match(&self) -> Option<&RecognitionResult> {
        self.best.as_ref()
    }

    /// Strict: a score equal to the threshold does not admit.
    pub fn admits(&self, score: f64) -> bool {
        score < self.admit_threshold
    }

    /// Feed one frame.
    ///
    /// `detected` is the number of regions the detector reported. `faces`
    /// yields classification results for the usable ones and is pulled
    /// lazily: iteration stops at the first admitting face, so later faces
    /// of the frame are never classified. Errors from `faces` are returned
    /// as-is and leave the session non-terminal.
    pub fn observe<I, E>(&mut self, detected: usize, faces: I) -> Result<&SessionState, E>
    where
        I: IntoIterator<Item = Result<RecognitionResult, E>>,
    {
        if self.is_terminal() || detected == 0 {
            return Ok(&self.state);
        }

        self.face_observed = true;
        self.transition(SessionState::FaceObserved);

        for result in faces {
            let result = result?;
            let admitted = self.admits(result.score);
            if self.best.as_ref().map_or(true, |b| result.score < b.score) {
                self.best = Some(result.clone());
            }
            if admitted {
                tracing::info!(
                    subject = %result.subject,
                    score = result.score,
                    threshold = self.admit_threshold,
                    "face matched"
                );
                self.transition(SessionState::Matched);
                self.transition(SessionState::Terminal(DecisionOutcome::Admit(result.subject)));
                return Ok(&self.state);
            }
            tracing::debug!(
                subject = %result.subject,
                score = result.score,
                threshold = self.admit_threshold,
                "face above threshold"
            );
        }

        self.transition(SessionState::Unmatched);
        self.transition(SessionState::Scanning);
        Ok(&self.state)
    }

    /// End the session without a match (cancel or budget). A no-op once
    /// terminal.
    pub fn conclude(&mut self) -> DecisionOutcome {
        if let SessionState::Terminal(outcome) = &self.state {
            return outcome.clone();
        }
        let outcome = if self.face_observed {
            DecisionOutcome::Deny
        } else {
            DecisionOutcome::NoFaceFound
        };
        self.transition(SessionState::Terminal(outcome.clone()));
        outcome
    }

    /// States entered since the last call, in order.
    pub fn take_transitions(&mut self) -> Vec<SessionState> {
        std::mem::take(&mut self.transitions)
    }

    fn transition(&mut self, next: SessionState) {
        tracing::trace!(from = %self.state, to = %next, "policy transition");
        self.state = next.clone();
        self.transitions.push(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    fn scored(subject: &str, score: f64) -> Result<RecognitionResult, Infallible> {
        Ok(RecognitionResult {
            label: 0,
            subject: subject.to_string(),
            score,
        })
    }

    #[test]
    fn test_threshold_is_strict() {
        let policy = DecisionPolicy::new(45.0);
        assert!(policy.admits(44.0));
        assert!(policy.admits(44.999));
        assert!(!policy.admits(45.0));
        assert!(!policy.admits(46.0));
    }

    #[test]
    fn test_score_44_admits() {
        let mut policy = DecisionPolicy::new(45.0);
        policy.observe(1, [scored("Alice", 44.0)]).unwrap();
        assert_eq!(policy.outcome(), Some(&DecisionOutcome::Admit("Alice".into())));
        assert_eq!(
            policy.take_transitions(),
            vec![
                SessionState::FaceObserved,
                SessionState::Matched,
                SessionState::Terminal(DecisionOutcome::Admit("Alice".into())),
            ]
        );
    }

    #[test]
    fn test_score_45_denies() {
        let mut policy = DecisionPolicy::new(45.0);
        policy.observe(1, [scored("Alice", 45.0)]).unwrap();
        assert_eq!(policy.state(), &SessionState::Scanning);
        assert_eq!(
            policy.take_transitions(),
            vec![
                SessionState::FaceObserved,
                SessionState::Unmatched,
                SessionState::Scanning,
            ]
        );
        assert_eq!(policy.conclude(), DecisionOutcome::Deny);
    }

    #[test]
    fn test_empty_frame_stays_scanning() {
        let mut policy = DecisionPolicy::default();
        policy.observe(0, std::iter::empty::<Result<_, Infallible>>()).unwrap();
        assert_eq!(policy.state(), &SessionState::Scanning);
        assert!(policy.take_transitions().is_empty());
        assert!(!policy.face_observed());
    }

    #[test]
    fn test_no_face_ever_observed() {
        let mut policy = DecisionPolicy::default();
        policy.observe(0, std::iter::empty::<Result<_, Infallible>>()).unwrap();
        assert_eq!(policy.conclude(), DecisionOutcome::NoFaceFound);
    }

    #[test]
    fn test_unusable_regions_still_count_as_observed() {
        // Regions were detected but none could be classified.
        let mut policy = DecisionPolicy::default();
        policy.observe(2, std::iter::empty::<Result<_, Infallible>>()).unwrap();
        assert!(policy.face_observed());
        assert_eq!(policy.conclude(), DecisionOutcome::Deny);
    }

    #[test]
    fn test_first_qualifying_face_wins() {
        let mut policy = DecisionPolicy::new(45.0);
        let pulled = std::cell::Cell::new(0);
        let faces = [("Bob", 80.0), ("Alice", 10.0), ("Carol", 5.0)]
            .into_iter()
            .map(|(name, score)| {
                pulled.set(pulled.get() + 1);
                scored(name, score)
            });

        policy.observe(3, faces).unwrap();
        assert_eq!(policy.outcome(), Some(&DecisionOutcome::Admit("Alice".into())));
        assert_eq!(pulled.get(), 2);
    }

    #[test]
    fn test_best_match_tracks_lowest_score() {
        let mut policy = DecisionPolicy::new(10.0);
        policy.observe(1, [scored("Bob", 80.0)]).unwrap();
        policy.observe(1, [scored("Eve", 60.0)]).unwrap();
        policy.observe(1, [scored("Bob", 70.0)]).unwrap();
        let best = policy.best_match().unwrap();
        assert_eq!(best.subject, "Eve");
        assert_eq!(best.score, 60.0);
    }

    #[test]
    fn test_terminal_ignores_further_frames() {
        let mut policy = DecisionPolicy::new(45.0);
        policy.observe(1, [scored("Alice", 1.0)]).unwrap();
        policy.take_transitions();
        policy.observe(1, [scored("Bob", 0.0)]).unwrap();
        assert_eq!(policy.outcome(), Some(&DecisionOutcome::Admit("Alice".into())));
        assert_eq!(policy.conclude(), DecisionOutcome::Admit("Alice".into()));
        assert!(policy.take_transitions().is_empty());
    }

    #[test]
    fn test_errors_propagate() {
        let mut policy = DecisionPolicy::default();
        let faces = [Err::<RecognitionResult, _>("model broken")];
        assert_eq!(policy.observe(1, faces), Err("model broken"));
        assert!(!policy.is_terminal());
    }
}

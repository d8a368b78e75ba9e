use warden_core::{DecisionOutcome, SessionEvent, SessionKind, SessionObserver, SessionState};

/// Prints session progress to the terminal.
#[derive(Default)]
pub struct TerminalObserver {
    faces_seen: u32,
}

impl SessionObserver for TerminalObserver {
    fn on_event(&mut self, event: &SessionEvent) {
        match event {
            SessionEvent::Started(SessionKind::Verification) => {
                println!("Look at the camera...");
            }
            SessionEvent::Started(SessionKind::Enrollment) => {
                println!("Capturing face samples, look at the camera...");
            }
            SessionEvent::StateChanged(SessionState::FaceObserved) => {
                self.faces_seen += 1;
                if self.faces_seen == 1 {
                    println!("Face detected, matching...");
                }
            }
            SessionEvent::StateChanged(_) => {}
            SessionEvent::SampleCaptured { captured, target, .. } => {
                println!("  sample {captured}/{target}");
            }
            SessionEvent::Cancelled => println!("Cancelled."),
            SessionEvent::BudgetExhausted { frames } => {
                println!("Gave up after {frames} frames.");
            }
            SessionEvent::Outcome(outcome) => match outcome {
                DecisionOutcome::Admit(name) => println!("ACCESS GRANTED: welcome, {name}"),
                DecisionOutcome::Deny => println!("ACCESS DENIED: face not recognized"),
                DecisionOutcome::NoFaceFound => println!("ACCESS DENIED: no face found"),
            },
            SessionEvent::Error(message) => eprintln!("error: {message}"),
        }
    }
}

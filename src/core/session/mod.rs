//! Interview session lifecycle.

mod engine;
pub mod profile;
mod state;

pub use engine::{InterviewSession, SessionHandle, TICK_INTERVAL};
pub use profile::{InterviewProfile, InterviewProfileBuilder, InterviewerVoice};
pub use state::{
    CompletionCallback, EscalationSource, SafetyEscalation, SafetyEscalationCallback,
    SessionError, SessionReport, SessionResult, SessionStatus, SpeechActivityCallback,
    StatusCallback,
};

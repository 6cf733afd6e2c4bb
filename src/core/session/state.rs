//! Session status, report and callback types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

use crate::core::events::SpeechActivity;
use crate::core::extraction::StructuredRecord;
use crate::core::transcript::TranscriptEntry;
use crate::core::transport::NegotiationError;

// =============================================================================
// Error Types
// =============================================================================

/// Errors returned by session operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Transport negotiation failed; the session is now in `error`
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    /// The operation is not allowed in the current status; nothing changed
    #[error("Cannot {operation} while session is {status}")]
    InvalidState {
        operation: &'static str,
        status: SessionStatus,
    },

    /// The interview profile is incomplete
    #[error("Invalid interview profile: {0}")]
    InvalidProfile(String),
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

// =============================================================================
// Status
// =============================================================================

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created, not started
    #[default]
    Idle,
    /// Negotiating the transport or waiting for the data channel to open
    Connecting,
    /// Conversation in progress
    Active,
    /// Caller ended the session; teardown in progress
    Ending,
    /// Finished normally
    Complete,
    /// Negotiation failed; `start()` may be called again
    Error,
    /// Crisis language detected; the caller decides what happens next
    SafetyEscalation,
}

impl SessionStatus {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Ending => "ending",
            Self::Complete => "complete",
            Self::Error => "error",
            Self::SafetyEscalation => "safety_escalation",
        }
    }

    /// Whether `start()` is accepted from this status.
    pub fn can_start(&self) -> bool {
        matches!(self, Self::Idle | Self::Error)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Report & Events
// =============================================================================

/// Everything handed to the caller when a session finishes.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session_id: String,
    pub status: SessionStatus,
    pub transcript: Vec<TranscriptEntry>,
    pub structured_record: Option<StructuredRecord>,
    pub safety_escalated: bool,
    pub duration_seconds: u64,
    pub question_count: u32,
}

/// What triggered a safety escalation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum EscalationSource {
    /// The local classifier matched a user utterance
    LocalMonitor { indicator: String, utterance: String },
    /// The remote agent set `safety_escalated` in its record
    RemoteAgent,
}

/// Payload of the safety escalation callback.
#[derive(Debug, Clone, Serialize)]
pub struct SafetyEscalation {
    pub session_id: String,
    pub source: EscalationSource,
    pub offset_seconds: u64,
}

// =============================================================================
// Callback Types
// =============================================================================

/// Invoked exactly once per session lifecycle, after teardown.
pub type CompletionCallback =
    Arc<dyn Fn(SessionReport) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Invoked the moment the session enters `safety_escalation`.
pub type SafetyEscalationCallback =
    Arc<dyn Fn(SafetyEscalation) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Invoked on every status transition.
pub type StatusCallback =
    Arc<dyn Fn(SessionStatus) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Invoked when the user starts or stops speaking.
pub type SpeechActivityCallback =
    Arc<dyn Fn(SpeechActivity) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

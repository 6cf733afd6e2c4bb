//! Base traits and types for transport negotiation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;

/// Label of the JSON event data channel opened on the peer connection.
pub const DATA_CHANNEL_LABEL: &str = "oai-events";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while negotiating a session transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NegotiationError {
    /// The user refused microphone access
    #[error("Microphone permission denied: {0}")]
    PermissionDenied(String),

    /// No usable input device
    #[error("No microphone found: {0}")]
    DeviceNotFound(String),

    /// The ephemeral credential could not be obtained
    #[error("Credential error: {0}")]
    CredentialError(String),

    /// The offer/answer exchange failed
    #[error("Signaling error: {0}")]
    SignalingError(String),

    /// The local peer connection could not be set up
    #[error("Transport error: {0}")]
    Transport(String),
}

impl NegotiationError {
    /// Whether re-running `start()` may succeed without user action.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NegotiationError::CredentialError(_)
                | NegotiationError::SignalingError(_)
                | NegotiationError::Transport(_)
        )
    }

    /// Whether the user can fix the problem themselves (permissions, plugging
    /// in a device).
    pub fn is_user_recoverable(&self) -> bool {
        matches!(
            self,
            NegotiationError::PermissionDenied(_) | NegotiationError::DeviceNotFound(_)
        )
    }
}

/// Result type for negotiation operations.
pub type NegotiationResult<T> = Result<T, NegotiationError>;

// =============================================================================
// Session Parameters
// =============================================================================

/// Which interview the session is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterviewKind {
    /// Clinical history interview
    #[default]
    ClinicalHistory,
    /// Patient intake interview
    PatientIntake,
}

impl InterviewKind {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClinicalHistory => "clinical_history",
            Self::PatientIntake => "patient_intake",
        }
    }
}

impl fmt::Display for InterviewKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Parameters sent to the credential issuer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionParams {
    pub interview_type: InterviewKind,
    /// Optional referral text the issuer may fold into the session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referral_context: Option<String>,
}

impl SessionParams {
    pub fn new(interview_type: InterviewKind) -> Self {
        Self {
            interview_type,
            referral_context: None,
        }
    }

    pub fn with_referral_context(mut self, context: impl Into<String>) -> Self {
        self.referral_context = Some(context.into());
        self
    }
}

/// Short-lived credential scoped to one negotiation.
#[derive(Clone, PartialEq, Eq)]
pub struct EphemeralCredential {
    pub token: String,
    pub session_id: Option<String>,
    /// Unix timestamp (seconds) after which the token is no longer valid
    pub expires_at: Option<i64>,
}

impl EphemeralCredential {
    /// Whether the credential has expired at `now` (unix seconds).
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }

    /// Whether the credential has expired according to the system clock.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(time::OffsetDateTime::now_utc().unix_timestamp())
    }
}

impl fmt::Debug for EphemeralCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralCredential")
            .field("token", &"<redacted>")
            .field("session_id", &self.session_id)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

// =============================================================================
// Data Channel
// =============================================================================

/// Event delivered by the data channel to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The channel is open and ready for traffic
    Open,
    /// A text message from the remote service
    Message(String),
    /// A transport-level error report
    Error(String),
    /// The channel closed
    Closed,
}

/// The negotiated event channel.
///
/// Inbound events arrive in order on a single receiver; outbound messages are
/// queued without waiting for delivery.
#[derive(Debug)]
pub struct DataChannel {
    pub inbound: mpsc::Receiver<ChannelEvent>,
    pub outbound: mpsc::Sender<String>,
}

impl DataChannel {
    pub fn new(inbound: mpsc::Receiver<ChannelEvent>, outbound: mpsc::Sender<String>) -> Self {
        Self { inbound, outbound }
    }
}

// =============================================================================
// Runtime Traits
// =============================================================================

/// Source of microphone access (permission prompt + device open).
#[async_trait]
pub trait MicrophoneSource: Send + Sync {
    /// Request access to the input device.
    ///
    /// Fails with `PermissionDenied` or `DeviceNotFound`.
    async fn acquire(&self) -> NegotiationResult<Box<dyn MicrophoneHandle>>;
}

/// A held microphone.
pub trait MicrophoneHandle: Send + Sync {
    /// Identifier of the local audio track.
    fn track_id(&self) -> &str;

    /// Stop capture and release the device. Must tolerate repeated calls.
    fn release(&mut self);

    /// Whether the device is still held.
    fn is_held(&self) -> bool;
}

/// Factory for peer connections.
#[async_trait]
pub trait PeerFactory: Send + Sync {
    async fn create(&self) -> NegotiationResult<Box<dyn PeerConnection>>;
}

/// A local peer connection to the realtime service.
///
/// Remote audio playback is handled by the implementation once the answer
/// is applied.
#[async_trait]
pub trait PeerConnection: Send {
    /// Add the local microphone track to the connection.
    fn attach_microphone(&mut self, microphone: &dyn MicrophoneHandle) -> NegotiationResult<()>;

    /// Create the event data channel. Events flow once the answer is applied.
    fn open_data_channel(&mut self, label: &str) -> NegotiationResult<DataChannel>;

    /// Create the local session-description offer.
    async fn create_offer(&mut self) -> NegotiationResult<String>;

    /// Apply the remote session-description answer.
    async fn apply_answer(&mut self, answer_sdp: &str) -> NegotiationResult<()>;

    /// Tear the connection down. Must tolerate repeated calls.
    fn close(&mut self);
}

pub mod events;
pub mod extraction;
pub mod safety;
pub mod session;
pub mod transcript;
pub mod transport;

// Re-export commonly used types for convenience
pub use events::{ClientEvent, EventStreamProcessor, ProcessedEvent, ServerEvent, SpeechActivity};

pub use extraction::{MalformedOutputError, RecordSchema, RedFlag, Severity, StructuredRecord};

pub use safety::{KeywordSafetyMonitor, SharedClassifier, TextClassifier};

pub use session::{
    EscalationSource, InterviewProfile, InterviewSession, InterviewerVoice, SafetyEscalation,
    SessionError, SessionHandle, SessionReport, SessionResult, SessionStatus,
};

pub use transcript::{Speaker, TranscriptAccumulator, TranscriptEntry};

pub use transport::{
    ChannelEvent, CredentialIssuer, EphemeralCredential, HttpCredentialIssuer, HttpSignaling,
    InterviewKind, MicrophoneHandle, MicrophoneSource, NegotiationError, NegotiationResult,
    PeerConnection, PeerFactory, SessionParams, SignalingClient, TransportNegotiator,
};

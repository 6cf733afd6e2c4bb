//! Transport negotiation for realtime interview sessions.
//!
//! A session talks to the realtime speech service over a peer connection
//! carrying the microphone track and a JSON event data channel. Setting it
//! up takes three suspension points:
//!
//! 1. Fetching an ephemeral credential from the credential issuer
//! 2. Acquiring the microphone (runs concurrently with 1)
//! 3. Exchanging the session-description offer/answer with the service
//!
//! The runtime-specific parts (audio device, peer connection) sit behind
//! traits so the engine can run against any media stack. The HTTP parts
//! (credential fetch, signaling) ship with reqwest implementations.

mod base;
pub mod credentials;
pub mod loopback;
mod negotiator;
pub mod signaling;

pub use base::{
    ChannelEvent, DATA_CHANNEL_LABEL, DataChannel, EphemeralCredential, InterviewKind,
    MicrophoneHandle, MicrophoneSource, NegotiationError, NegotiationResult, PeerConnection,
    PeerFactory, SessionParams,
};
pub use credentials::{CredentialIssuer, HttpCredentialIssuer};
pub use negotiator::{NegotiatedTransport, TransportNegotiator};
pub use signaling::{
    DEFAULT_REALTIME_MODEL, DEFAULT_REALTIME_URL, HttpSignaling, SignalingClient, validate_answer,
};

//! Shared fixtures for session scenario tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use interview_engine::core::transport::loopback::{
    LoopbackMicrophone, LoopbackPeerFactory, LoopbackSignaling, RemoteEnd,
    StaticCredentialIssuer,
};
use interview_engine::{
    CredentialIssuer, EphemeralCredential, InterviewKind, InterviewProfile, InterviewSession,
    MicrophoneHandle, MicrophoneSource, NegotiationError, NegotiationResult, SafetyEscalation,
    SessionParams, SessionReport, SessionStatus, SignalingClient, TransportNegotiator,
};

pub const TOOL_NAME: &str = "submit_intake";

pub fn intake_parameters() -> Value {
    json!({
        "type": "object",
        "properties": {
            "patient_name": {"type": "string"},
            "chief_complaint": {"type": "string"},
            "medications": {"type": "array", "items": {"type": "string"}},
            "narrative_summary": {"type": "string"},
            "red_flags": {"type": "array"},
            "safety_escalated": {"type": "boolean"}
        },
        "required": ["patient_name", "chief_complaint", "medications"]
    })
}

pub fn intake_profile(completion_grace: Duration) -> InterviewProfile {
    InterviewProfile::builder(InterviewKind::PatientIntake)
        .instructions("You are a calm intake interviewer. Ask one question at a time.")
        .tool(TOOL_NAME, "Submit the completed intake record", intake_parameters())
        .completion_grace(completion_grace)
        .build()
        .expect("valid profile")
}

// =============================================================================
// Wire messages
// =============================================================================

pub fn assistant_delta(text: &str) -> String {
    json!({"type": "response.audio_transcript.delta", "delta": text}).to_string()
}

pub fn assistant_done(transcript: Option<&str>) -> String {
    match transcript {
        Some(text) => json!({"type": "response.audio_transcript.done", "transcript": text}),
        None => json!({"type": "response.audio_transcript.done"}),
    }
    .to_string()
}

pub fn user_said(text: &str) -> String {
    json!({
        "type": "conversation.item.input_audio_transcription.completed",
        "item_id": "item_user",
        "content_index": 0,
        "transcript": text
    })
    .to_string()
}

pub fn tool_call(call_id: &str, arguments: Value) -> String {
    json!({
        "type": "response.function_call_arguments.done",
        "call_id": call_id,
        "name": TOOL_NAME,
        "arguments": arguments.to_string()
    })
    .to_string()
}

// =============================================================================
// Failing collaborators
// =============================================================================

pub struct FailingIssuer(pub NegotiationError);

#[async_trait]
impl CredentialIssuer for FailingIssuer {
    async fn issue(&self, _params: &SessionParams) -> NegotiationResult<EphemeralCredential> {
        Err(self.0.clone())
    }
}

pub struct FailingMicrophone(pub NegotiationError);

#[async_trait]
impl MicrophoneSource for FailingMicrophone {
    async fn acquire(&self) -> NegotiationResult<Box<dyn MicrophoneHandle>> {
        Err(self.0.clone())
    }
}

pub struct RejectingSignaling;

#[async_trait]
impl SignalingClient for RejectingSignaling {
    async fn exchange(
        &self,
        _credential: &EphemeralCredential,
        _offer_sdp: &str,
    ) -> NegotiationResult<String> {
        Err(NegotiationError::SignalingError(
            "Signaling endpoint returned 503".to_string(),
        ))
    }
}

// =============================================================================
// Callback recorder
// =============================================================================

#[derive(Debug, Clone)]
pub enum Observed {
    Status(SessionStatus),
    Escalation(SafetyEscalation),
    Completion(SessionReport),
}

#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<Observed>>>,
}

impl Recorder {
    pub fn attach(&self, session: &mut InterviewSession) {
        let events = Arc::clone(&self.events);
        session.on_status(Arc::new(move |status: SessionStatus| {
            events.lock().unwrap().push(Observed::Status(status));
            Box::pin(async {})
        }));

        let events = Arc::clone(&self.events);
        session.on_safety_escalation(Arc::new(move |escalation: SafetyEscalation| {
            events.lock().unwrap().push(Observed::Escalation(escalation));
            Box::pin(async {})
        }));

        let events = Arc::clone(&self.events);
        session.on_complete(Arc::new(move |report: SessionReport| {
            events.lock().unwrap().push(Observed::Completion(report));
            Box::pin(async {})
        }));
    }

    pub fn all(&self) -> Vec<Observed> {
        self.events.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<SessionStatus> {
        self.all()
            .into_iter()
            .filter_map(|e| match e {
                Observed::Status(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    pub fn escalations(&self) -> Vec<SafetyEscalation> {
        self.all()
            .into_iter()
            .filter_map(|e| match e {
                Observed::Escalation(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    pub fn completions(&self) -> Vec<SessionReport> {
        self.all()
            .into_iter()
            .filter_map(|e| match e {
                Observed::Completion(r) => Some(r),
                _ => None,
            })
            .collect()
    }
}

// =============================================================================
// Harness
// =============================================================================

/// A session wired to the in-memory loopback transport.
pub struct Harness {
    pub session: InterviewSession,
    pub recorder: Recorder,
    pub microphone: LoopbackMicrophone,
    pub peers: LoopbackPeerFactory,
    pub remotes: mpsc::UnboundedReceiver<RemoteEnd>,
}

impl Harness {
    pub fn new(completion_grace: Duration) -> Self {
        Self::with_profile(intake_profile(completion_grace))
    }

    pub fn with_profile(profile: InterviewProfile) -> Self {
        let microphone = LoopbackMicrophone::new();
        let (peers, remotes) = LoopbackPeerFactory::new();
        let negotiator = TransportNegotiator::new(
            Arc::new(StaticCredentialIssuer::new("ek_test")),
            Arc::new(LoopbackSignaling),
            Arc::new(microphone.clone()),
            Arc::new(peers.clone()),
        );
        let mut session = InterviewSession::new(profile, negotiator);
        let recorder = Recorder::default();
        recorder.attach(&mut session);

        Self {
            session,
            recorder,
            microphone,
            peers,
            remotes,
        }
    }

    /// Start the session and take the remote end of its data channel.
    pub async fn connect(&mut self) -> RemoteEnd {
        self.session.start().await.expect("negotiation succeeds");
        self.remotes.try_recv().expect("data channel opened")
    }

    /// Start and open the data channel, leaving the session active.
    pub async fn activate(&mut self) -> RemoteEnd {
        let remote = self.connect().await;
        self.session
            .handle_channel_event(interview_engine::ChannelEvent::Open)
            .await;
        remote
    }

    pub async fn deliver(&mut self, raw: impl Into<String>) {
        self.session
            .handle_channel_event(interview_engine::ChannelEvent::Message(raw.into()))
            .await;
    }
}

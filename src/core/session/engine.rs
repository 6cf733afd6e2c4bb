//! The interview session state machine.
//!
//! [`InterviewSession`] owns one interview lifecycle: it negotiates the
//! transport, feeds inbound data-channel traffic through the
//! [`EventStreamProcessor`], applies the outcomes (transcript, safety latch,
//! structured record) and tears everything down exactly once.
//!
//! Everything runs on a single task. The only suspension points are the
//! transport negotiation inside [`InterviewSession::start`] and the
//! caller-supplied callbacks.

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use std::time::Duration;

use super::profile::InterviewProfile;
use super::state::{
    CompletionCallback, EscalationSource, SafetyEscalation, SafetyEscalationCallback,
    SessionError, SessionReport, SessionResult, SessionStatus, SpeechActivityCallback,
    StatusCallback,
};
use crate::core::events::{ClientEvent, EventStreamProcessor, ProcessedEvent};
use crate::core::extraction::StructuredRecord;
use crate::core::transcript::{Speaker, TranscriptAccumulator, TranscriptEntry};
use crate::core::transport::{
    ChannelEvent, MicrophoneHandle, NegotiatedTransport, PeerConnection, TransportNegotiator,
};

/// Period of the duration tick driven by [`InterviewSession::run`].
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionCommand {
    End,
    Cancel,
}

/// Cloneable remote control for a session driven by [`InterviewSession::run`].
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    /// Ask the session to end normally. Returns false if the session is gone.
    pub fn end(&self) -> bool {
        self.tx.send(SessionCommand::End).is_ok()
    }

    /// Ask the session to tear down immediately.
    pub fn cancel(&self) -> bool {
        self.tx.send(SessionCommand::Cancel).is_ok()
    }
}

/// One interview lifecycle.
pub struct InterviewSession {
    session_id: String,
    profile: InterviewProfile,
    negotiator: TransportNegotiator,
    processor: EventStreamProcessor,

    status: SessionStatus,
    transcript: TranscriptAccumulator,
    structured_record: Option<StructuredRecord>,
    safety_escalated: bool,
    last_error: Option<String>,
    started_at: Option<Instant>,
    duration_seconds: u64,
    completion_deadline: Option<Instant>,
    completion_fired: bool,

    microphone: Option<Box<dyn MicrophoneHandle>>,
    peer: Option<Box<dyn PeerConnection>>,
    inbound: Option<mpsc::Receiver<ChannelEvent>>,
    outbound: Option<mpsc::Sender<String>>,

    command_tx: mpsc::UnboundedSender<SessionCommand>,
    command_rx: mpsc::UnboundedReceiver<SessionCommand>,

    completion_callback: Option<CompletionCallback>,
    safety_callback: Option<SafetyEscalationCallback>,
    status_callback: Option<StatusCallback>,
    speech_callback: Option<SpeechActivityCallback>,
}

impl InterviewSession {
    pub fn new(profile: InterviewProfile, negotiator: TransportNegotiator) -> Self {
        let processor = EventStreamProcessor::new(
            profile.tool_name(),
            profile.schema().clone(),
            profile.classifier(),
        );
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        Self {
            session_id: Uuid::new_v4().to_string(),
            profile,
            negotiator,
            processor,
            status: SessionStatus::Idle,
            transcript: TranscriptAccumulator::new(),
            structured_record: None,
            safety_escalated: false,
            last_error: None,
            started_at: None,
            duration_seconds: 0,
            completion_deadline: None,
            completion_fired: false,
            microphone: None,
            peer: None,
            inbound: None,
            outbound: None,
            command_tx,
            command_rx,
            completion_callback: None,
            safety_callback: None,
            status_callback: None,
            speech_callback: None,
        }
    }

    // =========================================================================
    // Callbacks
    // =========================================================================

    pub fn on_complete(&mut self, callback: CompletionCallback) {
        self.completion_callback = Some(callback);
    }

    pub fn on_safety_escalation(&mut self, callback: SafetyEscalationCallback) {
        self.safety_callback = Some(callback);
    }

    pub fn on_status(&mut self, callback: StatusCallback) {
        self.status_callback = Some(callback);
    }

    pub fn on_user_speech(&mut self, callback: SpeechActivityCallback) {
        self.speech_callback = Some(callback);
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn profile(&self) -> &InterviewProfile {
        &self.profile
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn transcript(&self) -> &[TranscriptEntry] {
        self.transcript.entries()
    }

    pub fn structured_record(&self) -> Option<&StructuredRecord> {
        self.structured_record.as_ref()
    }

    pub fn is_safety_escalated(&self) -> bool {
        self.safety_escalated
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn duration_seconds(&self) -> u64 {
        self.duration_seconds
    }

    pub fn question_count(&self) -> u32 {
        self.processor.question_count()
    }

    /// The assistant utterance currently streaming in, for live captions.
    pub fn current_assistant_utterance(&self) -> &str {
        self.processor.current_assistant_utterance()
    }

    /// Whether the microphone or peer connection is still held.
    pub fn holds_transport(&self) -> bool {
        self.microphone.is_some() || self.peer.is_some()
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            tx: self.command_tx.clone(),
        }
    }

    /// Snapshot of everything accumulated so far.
    pub fn report(&self) -> SessionReport {
        SessionReport {
            session_id: self.session_id.clone(),
            status: self.status,
            transcript: self.transcript.entries().to_vec(),
            structured_record: self.structured_record.clone(),
            safety_escalated: self.safety_escalated,
            duration_seconds: self.duration_seconds,
            question_count: self.processor.question_count(),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Negotiate the transport. Allowed from `idle` and `error` only.
    ///
    /// On success the session waits in `connecting` until the data channel
    /// reports open. On failure it moves to `error` with every resource
    /// released, and the error is returned.
    pub async fn start(&mut self) -> SessionResult<()> {
        if !self.status.can_start() {
            warn!(session_id = %self.session_id, status = %self.status, "Ignoring start()");
            return Err(self.invalid_state("start"));
        }

        self.reset_lifecycle();
        info!(
            session_id = %self.session_id,
            interview_type = %self.profile.kind(),
            "Starting interview session"
        );
        self.set_status(SessionStatus::Connecting).await;

        let params = self.profile.session_params();
        match self.negotiator.negotiate(&params).await {
            Ok(transport) => {
                let NegotiatedTransport {
                    data_channel,
                    peer,
                    microphone,
                    credential,
                } = transport;
                debug!(
                    session_id = %self.session_id,
                    remote_session = ?credential.session_id,
                    "Waiting for data channel"
                );
                self.microphone = Some(microphone);
                self.peer = Some(peer);
                self.inbound = Some(data_channel.inbound);
                self.outbound = Some(data_channel.outbound);
                Ok(())
            }
            Err(e) => {
                error!(session_id = %self.session_id, "Negotiation failed: {}", e);
                self.last_error = Some(e.to_string());
                self.cleanup();
                self.set_status(SessionStatus::Error).await;
                Err(e.into())
            }
        }
    }

    /// End an active session normally.
    pub async fn end(&mut self) -> SessionResult<()> {
        if self.status != SessionStatus::Active {
            debug!(session_id = %self.session_id, status = %self.status, "Ignoring end()");
            return Err(self.invalid_state("end"));
        }
        info!(session_id = %self.session_id, "Ending session");
        self.set_status(SessionStatus::Ending).await;
        self.finish(Some(SessionStatus::Complete)).await;
        Ok(())
    }

    /// Tear down immediately and report what was accumulated.
    ///
    /// A session in `safety_escalation` keeps that status.
    pub async fn cancel(&mut self) -> SessionResult<()> {
        match self.status {
            SessionStatus::Connecting | SessionStatus::Active => {
                info!(session_id = %self.session_id, status = %self.status, "Cancelling session");
                self.finish(Some(SessionStatus::Complete)).await;
                Ok(())
            }
            SessionStatus::SafetyEscalation if !self.completion_fired => {
                info!(session_id = %self.session_id, "Closing escalated session");
                self.finish(None).await;
                Ok(())
            }
            _ => Err(self.invalid_state("cancel")),
        }
    }

    /// Refresh the elapsed duration and fire a due scheduled completion.
    pub async fn tick(&mut self) {
        self.refresh_duration();
        self.check_completion_deadline().await;
    }

    /// Apply one data-channel event.
    pub async fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Open => self.on_channel_open().await,
            ChannelEvent::Message(raw) => {
                if !self.is_live() {
                    debug!(session_id = %self.session_id, status = %self.status, "Dropping message");
                    return;
                }
                let outcome = self.processor.process(&raw);
                self.apply(outcome).await;
                self.check_completion_deadline().await;
            }
            ChannelEvent::Error(message) => {
                warn!(session_id = %self.session_id, "Data channel error: {}", message);
                self.last_error = Some(message);
            }
            ChannelEvent::Closed => self.on_channel_closed().await,
        }
    }

    /// Drive the session until it finishes.
    ///
    /// Call after a successful [`start`](Self::start). Multiplexes inbound
    /// channel events, the duration tick and [`SessionHandle`] commands.
    ///
    /// The receivers stay owned by the session, so dropping this future (for
    /// example under `tokio::time::timeout`) leaves the session intact and
    /// `run` can be called again.
    pub async fn run(&mut self) -> SessionResult<SessionReport> {
        let runnable = self.is_live() || self.status == SessionStatus::Connecting;
        if !runnable || self.inbound.is_none() {
            return Err(self.invalid_state("run"));
        }

        let mut ticker = tokio::time::interval_at(Instant::now() + TICK_INTERVAL, TICK_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !self.is_finished() {
            tokio::select! {
                event = next_inbound(&mut self.inbound) => match event {
                    Some(event) => self.handle_channel_event(event).await,
                    None => {
                        self.handle_channel_event(ChannelEvent::Closed).await;
                        break;
                    }
                },
                _ = ticker.tick() => self.tick().await,
                Some(command) = self.command_rx.recv() => {
                    let result = match command {
                        SessionCommand::End => self.end().await,
                        SessionCommand::Cancel => self.cancel().await,
                    };
                    if let Err(e) = result {
                        debug!(session_id = %self.session_id, "Command {:?} rejected: {}", command, e);
                    }
                }
            }
        }

        Ok(self.report())
    }

    /// Release the microphone and peer connection if held.
    ///
    /// Safe to call any number of times, from any state.
    pub fn cleanup(&mut self) {
        if let Some(mut microphone) = self.microphone.take() {
            debug!(track_id = microphone.track_id(), "Releasing microphone");
            microphone.release();
        }
        if let Some(mut peer) = self.peer.take() {
            debug!("Closing peer connection");
            peer.close();
        }
        self.inbound = None;
        self.outbound = None;
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn on_channel_open(&mut self) {
        if self.status != SessionStatus::Connecting {
            debug!(session_id = %self.session_id, status = %self.status, "Ignoring channel open");
            return;
        }
        self.started_at = Some(Instant::now());
        self.duration_seconds = 0;
        self.set_status(SessionStatus::Active).await;

        let mut events = vec![ClientEvent::SessionUpdate {
            session: self.profile.session_config(),
        }];
        if self.profile.greet_on_open() {
            events.push(ClientEvent::response_create());
        }
        self.send(events);
    }

    async fn on_channel_closed(&mut self) {
        match self.status {
            SessionStatus::Connecting => {
                warn!(session_id = %self.session_id, "Data channel closed before opening");
                self.last_error = Some("Data channel closed before opening".to_string());
                self.cleanup();
                self.set_status(SessionStatus::Error).await;
            }
            SessionStatus::Active => {
                info!(session_id = %self.session_id, "Data channel closed");
                self.finish(Some(SessionStatus::Complete)).await;
            }
            SessionStatus::SafetyEscalation => {
                info!(session_id = %self.session_id, "Data channel closed during escalation");
                self.finish(None).await;
            }
            _ => debug!(session_id = %self.session_id, status = %self.status, "Ignoring channel close"),
        }
    }

    async fn apply(&mut self, outcome: ProcessedEvent) {
        match outcome {
            ProcessedEvent::AssistantUtterance(text) => {
                let offset = self.offset_seconds();
                self.transcript.append(Speaker::Assistant, text, offset);
            }
            ProcessedEvent::UserUtterance {
                text,
                crisis_indicator,
            } => {
                let offset = self.offset_seconds();
                if let Some(indicator) = crisis_indicator {
                    self.escalate(EscalationSource::LocalMonitor {
                        indicator,
                        utterance: text.clone(),
                    })
                    .await;
                }
                self.transcript.append(Speaker::User, text, offset);
            }
            ProcessedEvent::SpeechActivity(activity) => {
                if let Some(callback) = self.speech_callback.clone() {
                    callback(activity).await;
                }
            }
            ProcessedEvent::RecordExtracted {
                mut record,
                acknowledgement,
            } => {
                let agent_escalated = record.safety_escalated;
                if self.safety_escalated {
                    record.mark_safety_escalated();
                }
                info!(
                    session_id = %self.session_id,
                    red_flags = record.red_flags.len(),
                    high_severity = record.has_high_severity_flag(),
                    "Structured record received"
                );
                self.structured_record = Some(record);
                self.send(acknowledgement);

                if agent_escalated {
                    self.escalate(EscalationSource::RemoteAgent).await;
                }
                if self.status == SessionStatus::Active {
                    self.completion_deadline = Some(Instant::now() + self.profile.completion_grace());
                }
            }
            ProcessedEvent::RecordRejected {
                error,
                acknowledgement,
            } => {
                debug!(session_id = %self.session_id, "Asking agent to resubmit: {}", error);
                self.send(acknowledgement);
            }
            ProcessedEvent::TransportError(message) => {
                self.last_error = Some(message);
            }
            ProcessedEvent::Buffered | ProcessedEvent::Ignored => {}
        }
    }

    /// Latch the session into safety escalation. Fires the callback once.
    async fn escalate(&mut self, source: EscalationSource) {
        if self.safety_escalated {
            debug!(session_id = %self.session_id, "Safety escalation already latched");
            return;
        }
        self.safety_escalated = true;
        self.completion_deadline = None;
        if let Some(record) = self.structured_record.as_mut() {
            record.mark_safety_escalated();
        }

        warn!(session_id = %self.session_id, source = ?source, "Safety escalation");
        if self.status == SessionStatus::Active {
            self.set_status(SessionStatus::SafetyEscalation).await;
        }

        if let Some(callback) = self.safety_callback.clone() {
            callback(SafetyEscalation {
                session_id: self.session_id.clone(),
                source,
                offset_seconds: self.offset_seconds(),
            })
            .await;
        }
    }

    async fn check_completion_deadline(&mut self) {
        if let Some(deadline) = self.completion_deadline
            && self.status == SessionStatus::Active
            && Instant::now() >= deadline
        {
            info!(session_id = %self.session_id, "Completing session after record submission");
            self.completion_deadline = None;
            if let Err(e) = self.end().await {
                warn!(session_id = %self.session_id, "Scheduled completion failed: {}", e);
            }
        }
    }

    /// Teardown, then optional status change, then the completion callback.
    async fn finish(&mut self, next: Option<SessionStatus>) {
        self.refresh_duration();
        self.started_at = None;
        self.completion_deadline = None;
        self.cleanup();
        if let Some(status) = next {
            self.set_status(status).await;
        }
        self.fire_completion().await;
    }

    async fn fire_completion(&mut self) {
        if self.completion_fired {
            return;
        }
        self.completion_fired = true;
        let report = self.report();
        info!(
            session_id = %self.session_id,
            entries = report.transcript.len(),
            user_turns = self.transcript.count_for(Speaker::User),
            duration_seconds = report.duration_seconds,
            safety_escalated = report.safety_escalated,
            "Session finished"
        );
        if let Some(callback) = self.completion_callback.clone() {
            callback(report).await;
        }
    }

    async fn set_status(&mut self, status: SessionStatus) {
        if self.status == status {
            return;
        }
        info!(session_id = %self.session_id, from = %self.status, to = %status, "Session status changed");
        self.status = status;
        if let Some(callback) = self.status_callback.clone() {
            callback(status).await;
        }
    }

    /// Queue outbound events without waiting for delivery.
    fn send(&self, events: Vec<ClientEvent>) {
        let Some(outbound) = &self.outbound else {
            warn!(session_id = %self.session_id, "No data channel; dropping {} event(s)", events.len());
            return;
        };
        for event in events {
            match event.to_json() {
                Ok(json) => {
                    if let Err(e) = outbound.try_send(json) {
                        warn!(session_id = %self.session_id, "Failed to queue outbound event: {}", e);
                    }
                }
                Err(e) => warn!(session_id = %self.session_id, "Failed to serialize event: {}", e),
            }
        }
    }

    fn reset_lifecycle(&mut self) {
        self.session_id = Uuid::new_v4().to_string();
        self.processor.reset();
        self.transcript = TranscriptAccumulator::new();
        self.structured_record = None;
        self.safety_escalated = false;
        self.last_error = None;
        self.started_at = None;
        self.duration_seconds = 0;
        self.completion_deadline = None;
        self.completion_fired = false;
        while self.command_rx.try_recv().is_ok() {}
    }

    fn refresh_duration(&mut self) {
        if let Some(started_at) = self.started_at {
            self.duration_seconds = started_at.elapsed().as_secs();
        }
    }

    fn offset_seconds(&self) -> u64 {
        self.started_at
            .map_or(self.duration_seconds, |started_at| started_at.elapsed().as_secs())
    }

    fn is_live(&self) -> bool {
        matches!(
            self.status,
            SessionStatus::Active | SessionStatus::SafetyEscalation
        ) && !self.completion_fired
    }

    fn is_finished(&self) -> bool {
        self.completion_fired
            || matches!(
                self.status,
                SessionStatus::Idle | SessionStatus::Error | SessionStatus::Complete
            )
    }

    fn invalid_state(&self, operation: &'static str) -> SessionError {
        SessionError::InvalidState {
            operation,
            status: self.status,
        }
    }
}

/// Next inbound event, or `None` once the channel is gone.
async fn next_inbound(inbound: &mut Option<mpsc::Receiver<ChannelEvent>>) -> Option<ChannelEvent> {
    match inbound {
        Some(rx) => rx.recv().await,
        None => None,
    }
}

impl Drop for InterviewSession {
    fn drop(&mut self) {
        self.cleanup();
    }
}

impl std::fmt::Debug for InterviewSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterviewSession")
            .field("session_id", &self.session_id)
            .field("status", &self.status)
            .field("entries", &self.transcript.len())
            .field("safety_escalated", &self.safety_escalated)
            .field("holds_transport", &self.holds_transport())
            .finish_non_exhaustive()
    }
}

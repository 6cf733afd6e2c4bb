//! In-memory transport for replaying recorded sessions and for tests.
//!
//! Every peer created by [`LoopbackPeerFactory`] hands the far end of its data
//! channel out as a [`RemoteEnd`], so a script can play the realtime
//! service: push [`ChannelEvent`]s in, read the engine's outbound JSON.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;

use super::base::{
    ChannelEvent, DataChannel, EphemeralCredential, MicrophoneHandle, MicrophoneSource,
    NegotiationError, NegotiationResult, PeerConnection, PeerFactory, SessionParams,
};
use super::credentials::CredentialIssuer;
use super::signaling::SignalingClient;

/// Buffer size for both directions of a loopback data channel.
pub const LOOPBACK_CHANNEL_CAPACITY: usize = 256;

const LOOPBACK_ANSWER: &str = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n";

/// The service side of a loopback data channel.
#[derive(Debug)]
pub struct RemoteEnd {
    /// Events delivered to the engine
    pub events: mpsc::Sender<ChannelEvent>,
    /// JSON messages the engine sent
    pub outbound: mpsc::Receiver<String>,
}

impl RemoteEnd {
    /// Deliver a raw message to the engine.
    pub async fn send_message(&self, raw: impl Into<String>) -> bool {
        self.events
            .send(ChannelEvent::Message(raw.into()))
            .await
            .is_ok()
    }

    /// Drain everything the engine has queued so far.
    pub fn drain_outbound(&mut self) -> Vec<String> {
        let mut sent = Vec::new();
        while let Ok(message) = self.outbound.try_recv() {
            sent.push(message);
        }
        sent
    }
}

/// Issues the same credential every time.
#[derive(Debug, Clone)]
pub struct StaticCredentialIssuer {
    credential: EphemeralCredential,
}

impl StaticCredentialIssuer {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            credential: EphemeralCredential {
                token: token.into(),
                session_id: None,
                expires_at: None,
            },
        }
    }
}

#[async_trait]
impl CredentialIssuer for StaticCredentialIssuer {
    async fn issue(&self, _params: &SessionParams) -> NegotiationResult<EphemeralCredential> {
        Ok(self.credential.clone())
    }
}

/// Answers every offer with a minimal session description.
#[derive(Debug, Clone, Default)]
pub struct LoopbackSignaling;

#[async_trait]
impl SignalingClient for LoopbackSignaling {
    async fn exchange(
        &self,
        credential: &EphemeralCredential,
        offer_sdp: &str,
    ) -> NegotiationResult<String> {
        if credential.token.is_empty() {
            return Err(NegotiationError::SignalingError(
                "missing credential".to_string(),
            ));
        }
        if offer_sdp.is_empty() {
            return Err(NegotiationError::SignalingError("empty offer".to_string()));
        }
        Ok(LOOPBACK_ANSWER.to_string())
    }
}

/// Microphone that always grants access and counts releases.
#[derive(Debug, Clone, Default)]
pub struct LoopbackMicrophone {
    acquired: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
}

impl LoopbackMicrophone {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire_count(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn release_count(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MicrophoneSource for LoopbackMicrophone {
    async fn acquire(&self) -> NegotiationResult<Box<dyn MicrophoneHandle>> {
        let n = self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(LoopbackTrack {
            track_id: format!("loopback-mic-{n}"),
            held: true,
            released: Arc::clone(&self.released),
        }))
    }
}

struct LoopbackTrack {
    track_id: String,
    held: bool,
    released: Arc<AtomicUsize>,
}

impl MicrophoneHandle for LoopbackTrack {
    fn track_id(&self) -> &str {
        &self.track_id
    }

    fn release(&mut self) {
        if self.held {
            self.held = false;
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_held(&self) -> bool {
        self.held
    }
}

/// Creates peers whose data channels terminate in memory.
#[derive(Debug, Clone)]
pub struct LoopbackPeerFactory {
    remotes: mpsc::UnboundedSender<RemoteEnd>,
    closed: Arc<AtomicUsize>,
}

impl LoopbackPeerFactory {
    /// Returns the factory and the stream of remote ends, one per opened
    /// data channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RemoteEnd>) {
        let (remotes, rx) = mpsc::unbounded_channel();
        (
            Self {
                remotes,
                closed: Arc::new(AtomicUsize::new(0)),
            },
            rx,
        )
    }

    /// Number of peers closed so far.
    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerFactory for LoopbackPeerFactory {
    async fn create(&self) -> NegotiationResult<Box<dyn PeerConnection>> {
        Ok(Box::new(LoopbackPeer {
            remotes: self.remotes.clone(),
            closed: Arc::clone(&self.closed),
            track: None,
            is_closed: false,
        }))
    }
}

struct LoopbackPeer {
    remotes: mpsc::UnboundedSender<RemoteEnd>,
    closed: Arc<AtomicUsize>,
    track: Option<String>,
    is_closed: bool,
}

#[async_trait]
impl PeerConnection for LoopbackPeer {
    fn attach_microphone(&mut self, microphone: &dyn MicrophoneHandle) -> NegotiationResult<()> {
        if !microphone.is_held() {
            return Err(NegotiationError::Transport(
                "microphone already released".to_string(),
            ));
        }
        self.track = Some(microphone.track_id().to_string());
        Ok(())
    }

    fn open_data_channel(&mut self, _label: &str) -> NegotiationResult<DataChannel> {
        let (event_tx, event_rx) = mpsc::channel(LOOPBACK_CHANNEL_CAPACITY);
        let (out_tx, out_rx) = mpsc::channel(LOOPBACK_CHANNEL_CAPACITY);
        self.remotes
            .send(RemoteEnd {
                events: event_tx,
                outbound: out_rx,
            })
            .map_err(|_| NegotiationError::Transport("loopback receiver dropped".to_string()))?;
        Ok(DataChannel::new(event_rx, out_tx))
    }

    async fn create_offer(&mut self) -> NegotiationResult<String> {
        let track = self.track.as_deref().unwrap_or("none");
        Ok(format!("v=0\r\na=msid:{track}\r\n"))
    }

    async fn apply_answer(&mut self, answer_sdp: &str) -> NegotiationResult<()> {
        if answer_sdp.starts_with("v=") {
            Ok(())
        } else {
            Err(NegotiationError::SignalingError(
                "answer is not a session description".to_string(),
            ))
        }
    }

    fn close(&mut self) {
        if !self.is_closed {
            self.is_closed = true;
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

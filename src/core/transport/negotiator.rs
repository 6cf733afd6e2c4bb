use std::sync::Arc;

use tracing::{debug, info, warn};

use super::base::{
    DATA_CHANNEL_LABEL, DataChannel, EphemeralCredential, MicrophoneHandle, MicrophoneSource,
    NegotiationError, NegotiationResult, PeerConnection, PeerFactory, SessionParams,
};
use super::credentials::CredentialIssuer;
use super::signaling::SignalingClient;

/// Everything a live session holds on to.
pub struct NegotiatedTransport {
    pub data_channel: DataChannel,
    pub peer: Box<dyn PeerConnection>,
    pub microphone: Box<dyn MicrophoneHandle>,
    pub credential: EphemeralCredential,
}

impl std::fmt::Debug for NegotiatedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NegotiatedTransport")
            .field("microphone", &self.microphone.track_id())
            .field("credential", &self.credential)
            .finish_non_exhaustive()
    }
}

/// Establishes the peer transport for one session attempt.
///
/// Single attempt: any failure is returned to the caller and nothing is
/// retried. On every failure path the microphone is released and the peer
/// connection closed before returning.
#[derive(Clone)]
pub struct TransportNegotiator {
    issuer: Arc<dyn CredentialIssuer>,
    signaling: Arc<dyn SignalingClient>,
    microphone: Arc<dyn MicrophoneSource>,
    peers: Arc<dyn PeerFactory>,
}

impl std::fmt::Debug for TransportNegotiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportNegotiator").finish_non_exhaustive()
    }
}

impl TransportNegotiator {
    pub fn new(
        issuer: Arc<dyn CredentialIssuer>,
        signaling: Arc<dyn SignalingClient>,
        microphone: Arc<dyn MicrophoneSource>,
        peers: Arc<dyn PeerFactory>,
    ) -> Self {
        Self {
            issuer,
            signaling,
            microphone,
            peers,
        }
    }

    /// Negotiate a transport for `params`.
    pub async fn negotiate(&self, params: &SessionParams) -> NegotiationResult<NegotiatedTransport> {
        // The permission prompt and the credential fetch run side by side.
        let (mic_result, credential_result) =
            tokio::join!(self.microphone.acquire(), self.issuer.issue(params));

        let mut microphone = match mic_result {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Microphone acquisition failed: {}", e);
                return Err(e);
            }
        };

        let credential = match credential_result {
            Ok(credential) if credential.is_expired() => {
                microphone.release();
                return Err(NegotiationError::CredentialError(
                    "Issued credential has already expired".to_string(),
                ));
            }
            Ok(credential) => credential,
            Err(e) => {
                warn!("Credential fetch failed: {}", e);
                microphone.release();
                return Err(e);
            }
        };

        let mut peer = match self.peers.create().await {
            Ok(peer) => peer,
            Err(e) => {
                microphone.release();
                return Err(e);
            }
        };

        match self
            .connect_peer(peer.as_mut(), microphone.as_ref(), &credential)
            .await
        {
            Ok(data_channel) => {
                info!(
                    session_id = ?credential.session_id,
                    track_id = microphone.track_id(),
                    "Transport negotiated"
                );
                Ok(NegotiatedTransport {
                    data_channel,
                    peer,
                    microphone,
                    credential,
                })
            }
            Err(e) => {
                warn!("Peer negotiation failed: {}", e);
                peer.close();
                microphone.release();
                Err(e)
            }
        }
    }

    async fn connect_peer(
        &self,
        peer: &mut dyn PeerConnection,
        microphone: &dyn MicrophoneHandle,
        credential: &EphemeralCredential,
    ) -> NegotiationResult<DataChannel> {
        peer.attach_microphone(microphone)?;
        let data_channel = peer.open_data_channel(DATA_CHANNEL_LABEL)?;

        let offer = peer.create_offer().await?;
        debug!(bytes = offer.len(), "Created SDP offer");

        let answer = self.signaling.exchange(credential, &offer).await?;
        peer.apply_answer(&answer).await.map_err(|e| match e {
            NegotiationError::SignalingError(_) => e,
            other => NegotiationError::SignalingError(other.to_string()),
        })?;

        Ok(data_channel)
    }
}

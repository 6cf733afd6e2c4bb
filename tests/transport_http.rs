//! HTTP transport tests
//!
//! Credential issuance and SDP signaling against mocked endpoints, plus a
//! full negotiation through both.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_json, body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use interview_engine::core::transport::loopback::{LoopbackMicrophone, LoopbackPeerFactory};
use interview_engine::{
    CredentialIssuer, EphemeralCredential, HttpCredentialIssuer, HttpSignaling, InterviewKind,
    NegotiationError, SessionParams, SignalingClient, TransportNegotiator,
};

const ANSWER_SDP: &str = "v=0\r\no=- 4611731400430051336 2 IN IP4 127.0.0.1\r\ns=-\r\n";

fn credential(token: &str) -> EphemeralCredential {
    EphemeralCredential {
        token: token.to_string(),
        session_id: None,
        expires_at: None,
    }
}

#[tokio::test]
async fn test_issuer_posts_session_params() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/realtime-token"))
        .and(header("Authorization", "Bearer app-session"))
        .and(body_json(json!({
            "interview_type": "patient_intake",
            "referral_context": "Referred by GP for chest pain"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token": "ek_abc123",
            "session_id": "sess_42",
            "expires_at": 4102444800i64
        })))
        .expect(1)
        .mount(&server)
        .await;

    let issuer = HttpCredentialIssuer::new(
        format!("{}/api/realtime-token", server.uri()),
        Duration::from_secs(5),
    )
    .unwrap()
    .with_bearer_token("app-session");

    let params = SessionParams::new(InterviewKind::PatientIntake)
        .with_referral_context("Referred by GP for chest pain");
    let credential = issuer.issue(&params).await.unwrap();

    assert_eq!(credential.token, "ek_abc123");
    assert_eq!(credential.session_id.as_deref(), Some("sess_42"));
    assert!(!credential.is_expired());
}

#[tokio::test]
async fn test_issuer_accepts_client_secret_shape() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "sess_7",
            "client_secret": {"value": "ek_nested", "expires_at": 4102444800i64}
        })))
        .mount(&server)
        .await;

    let issuer =
        HttpCredentialIssuer::new(format!("{}/token", server.uri()), Duration::from_secs(5))
            .unwrap();
    let credential = issuer.issue(&SessionParams::default()).await.unwrap();

    assert_eq!(credential.token, "ek_nested");
    assert_eq!(credential.session_id.as_deref(), Some("sess_7"));
    assert_eq!(credential.expires_at, Some(4102444800));
}

#[tokio::test]
async fn test_issuer_error_status_is_credential_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(401).set_body_string("session expired"))
        .mount(&server)
        .await;

    let issuer =
        HttpCredentialIssuer::new(format!("{}/token", server.uri()), Duration::from_secs(5))
            .unwrap();
    let err = issuer.issue(&SessionParams::default()).await.unwrap_err();

    match err {
        NegotiationError::CredentialError(msg) => {
            assert!(msg.contains("401"));
            assert!(msg.contains("session expired"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_issuer_rejects_body_without_token() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": ""})))
        .mount(&server)
        .await;

    let issuer =
        HttpCredentialIssuer::new(format!("{}/token", server.uri()), Duration::from_secs(5))
            .unwrap();
    let err = issuer.issue(&SessionParams::default()).await.unwrap_err();
    assert!(matches!(err, NegotiationError::CredentialError(_)));
}

#[tokio::test]
async fn test_issuer_timeout_is_credential_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"token": "late"}))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let issuer =
        HttpCredentialIssuer::new(format!("{}/token", server.uri()), Duration::from_millis(50))
            .unwrap();
    let err = issuer.issue(&SessionParams::default()).await.unwrap_err();
    assert!(matches!(err, NegotiationError::CredentialError(_)));
}

#[tokio::test]
async fn test_signaling_exchanges_sdp() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/realtime"))
        .and(query_param("model", "gpt-4o-realtime-preview-2024-12-17"))
        .and(header("Authorization", "Bearer ek_abc123"))
        .and(header("Content-Type", "application/sdp"))
        .and(body_string("v=0\r\noffer\r\n"))
        .respond_with(ResponseTemplate::new(201).set_body_string(ANSWER_SDP))
        .expect(1)
        .mount(&server)
        .await;

    let signaling = HttpSignaling::new(
        &format!("{}/v1/realtime", server.uri()),
        "gpt-4o-realtime-preview-2024-12-17",
        Duration::from_secs(5),
    )
    .unwrap();

    let answer = signaling
        .exchange(&credential("ek_abc123"), "v=0\r\noffer\r\n")
        .await
        .unwrap();
    assert_eq!(answer, ANSWER_SDP);
}

#[tokio::test]
async fn test_signaling_non_success_is_signaling_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/realtime"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad offer"))
        .mount(&server)
        .await;

    let signaling = HttpSignaling::new(
        &format!("{}/v1/realtime", server.uri()),
        "m",
        Duration::from_secs(5),
    )
    .unwrap();

    let err = signaling
        .exchange(&credential("ek"), "v=0\r\n")
        .await
        .unwrap_err();
    assert!(matches!(err, NegotiationError::SignalingError(_)));
}

#[tokio::test]
async fn test_signaling_malformed_answer_is_signaling_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/realtime"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy error</html>"))
        .mount(&server)
        .await;

    let signaling = HttpSignaling::new(
        &format!("{}/v1/realtime", server.uri()),
        "m",
        Duration::from_secs(5),
    )
    .unwrap();

    let err = signaling
        .exchange(&credential("ek"), "v=0\r\n")
        .await
        .unwrap_err();
    assert!(matches!(err, NegotiationError::SignalingError(_)));
}

#[tokio::test]
async fn test_negotiation_over_http() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "ek_live"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/realtime"))
        .and(header("Authorization", "Bearer ek_live"))
        .respond_with(ResponseTemplate::new(201).set_body_string(ANSWER_SDP))
        .expect(1)
        .mount(&server)
        .await;

    let microphone = LoopbackMicrophone::new();
    let (peers, mut remotes) = LoopbackPeerFactory::new();
    let negotiator = TransportNegotiator::new(
        Arc::new(
            HttpCredentialIssuer::new(format!("{}/token", server.uri()), Duration::from_secs(5))
                .unwrap(),
        ),
        Arc::new(
            HttpSignaling::new(
                &format!("{}/v1/realtime", server.uri()),
                "gpt-4o-realtime-preview-2024-12-17",
                Duration::from_secs(5),
            )
            .unwrap(),
        ),
        Arc::new(microphone.clone()),
        Arc::new(peers.clone()),
    );

    let transport = negotiator
        .negotiate(&SessionParams::default())
        .await
        .unwrap();
    assert_eq!(transport.credential.token, "ek_live");
    assert!(transport.microphone.is_held());
    assert!(remotes.try_recv().is_ok());
    assert_eq!(microphone.release_count(), 0);
}

#[tokio::test]
async fn test_negotiation_signaling_failure_releases_everything() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "ek_live"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/realtime"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let microphone = LoopbackMicrophone::new();
    let (peers, _remotes) = LoopbackPeerFactory::new();
    let negotiator = TransportNegotiator::new(
        Arc::new(
            HttpCredentialIssuer::new(format!("{}/token", server.uri()), Duration::from_secs(5))
                .unwrap(),
        ),
        Arc::new(
            HttpSignaling::new(
                &format!("{}/v1/realtime", server.uri()),
                "m",
                Duration::from_secs(5),
            )
            .unwrap(),
        ),
        Arc::new(microphone.clone()),
        Arc::new(peers.clone()),
    );

    let err = negotiator
        .negotiate(&SessionParams::default())
        .await
        .unwrap_err();
    assert!(matches!(err, NegotiationError::SignalingError(_)));
    assert_eq!(microphone.acquire_count(), 1);
    assert_eq!(microphone.release_count(), 1);
    assert_eq!(peers.close_count(), 1);
}

#[tokio::test]
async fn test_negotiation_expired_credential_rejected() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"token": "ek_old", "expires_at": 1})),
        )
        .mount(&server)
        .await;

    let microphone = LoopbackMicrophone::new();
    let (peers, _remotes) = LoopbackPeerFactory::new();
    let negotiator = TransportNegotiator::new(
        Arc::new(
            HttpCredentialIssuer::new(format!("{}/token", server.uri()), Duration::from_secs(5))
                .unwrap(),
        ),
        Arc::new(common::RejectingSignaling),
        Arc::new(microphone.clone()),
        Arc::new(peers.clone()),
    );

    let err = negotiator
        .negotiate(&SessionParams::default())
        .await
        .unwrap_err();
    assert!(matches!(err, NegotiationError::CredentialError(_)));
    assert_eq!(microphone.release_count(), 1);
    assert_eq!(peers.close_count(), 0);
}

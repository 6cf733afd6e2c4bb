//! Realtime data-channel message types.
//!
//! Client events (sent to the service):
//! - session.update - Configure instructions, voice, tools, transcription
//! - conversation.item.create - Add an item (used for tool call output)
//! - response.create - Ask the agent to respond
//!
//! Server events (received from the service) that the engine acts on:
//! - response.audio_transcript.delta / .done - Assistant speech transcript
//! - response.text.delta / .done - Assistant text (text-only sessions)
//! - conversation.item.input_audio_transcription.completed - User utterance
//! - input_audio_buffer.speech_started / .speech_stopped - User activity
//! - response.output_item.added - Announces a function call by name
//! - response.function_call_arguments.done - Complete tool arguments
//! - error - Transport-level error report
//!
//! Every other event type decodes to [`ServerEvent::Unknown`].

use serde::{Deserialize, Serialize};

// =============================================================================
// Session Configuration
// =============================================================================

/// Session configuration sent with `session.update`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Response modalities (text, audio)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,

    /// System instructions for the interviewer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    /// Voice for audio output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,

    /// Input audio transcription configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<InputAudioTranscription>,

    /// Tool definitions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDef>>,

    /// Tool choice strategy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
}

/// Input audio transcription configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputAudioTranscription {
    /// Transcription model (e.g., "whisper-1")
    pub model: String,
}

/// Tool definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDef {
    /// Tool type (always "function")
    #[serde(rename = "type")]
    pub tool_type: String,
    /// Function name
    pub name: String,
    /// Function description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Function parameters JSON schema
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

impl ToolDef {
    pub fn function(
        name: impl Into<String>,
        description: Option<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            tool_type: "function".to_string(),
            name: name.into(),
            description,
            parameters: Some(parameters),
        }
    }
}

// =============================================================================
// Conversation Items
// =============================================================================

/// Conversation item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationItem {
    /// Item ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Item type (message, function_call, function_call_output)
    #[serde(rename = "type")]
    pub item_type: String,
    /// Item role (user, assistant, system)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Call ID for function call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    /// Function name for function call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Function arguments for function call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
    /// Function output for function call result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

/// Response configuration for `response.create`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseConfig {
    /// Per-response instructions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

// =============================================================================
// Client Events (sent to server)
// =============================================================================

/// Client events sent down the data channel.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Update session configuration
    #[serde(rename = "session.update")]
    SessionUpdate {
        /// Session configuration
        session: SessionConfig,
    },

    /// Create a conversation item
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate {
        /// Item to create
        item: ConversationItem,
    },

    /// Create a response
    #[serde(rename = "response.create")]
    ResponseCreate {
        /// Response configuration
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<ResponseConfig>,
    },
}

impl ClientEvent {
    /// Build the item that reports a tool call's result back to the agent.
    pub fn function_call_output(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        ClientEvent::ConversationItemCreate {
            item: ConversationItem {
                item_type: "function_call_output".to_string(),
                call_id: Some(call_id.into()),
                output: Some(output.into()),
                ..Default::default()
            },
        }
    }

    /// Ask the agent to produce its next response.
    pub fn response_create() -> Self {
        ClientEvent::ResponseCreate { response: None }
    }

    /// Serialize to the JSON text sent on the channel.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// =============================================================================
// Server Events (received from server)
// =============================================================================

/// Server events received on the data channel.
///
/// Field requirements are kept loose; the stream is only loosely typed.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Error occurred
    #[serde(rename = "error")]
    Error {
        /// Error details
        error: ApiError,
    },

    /// Session created
    #[serde(rename = "session.created")]
    SessionCreated {
        #[serde(default)]
        session: Option<SessionInfo>,
    },

    /// Session updated
    #[serde(rename = "session.updated")]
    SessionUpdated {
        #[serde(default)]
        session: Option<SessionInfo>,
    },

    /// Speech started (VAD detected speech)
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {
        #[serde(default)]
        audio_start_ms: Option<u64>,
        #[serde(default)]
        item_id: Option<String>,
    },

    /// Speech stopped (VAD detected silence)
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped {
        #[serde(default)]
        audio_end_ms: Option<u64>,
        #[serde(default)]
        item_id: Option<String>,
    },

    /// Input audio transcription completed
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    TranscriptionCompleted {
        #[serde(default)]
        item_id: Option<String>,
        /// Transcript text
        transcript: String,
    },

    /// Audio transcript delta
    #[serde(
        rename = "response.audio_transcript.delta",
        alias = "response.output_audio_transcript.delta"
    )]
    AudioTranscriptDelta {
        #[serde(default)]
        item_id: Option<String>,
        /// Transcript delta
        delta: String,
    },

    /// Audio transcript done
    #[serde(
        rename = "response.audio_transcript.done",
        alias = "response.output_audio_transcript.done"
    )]
    AudioTranscriptDone {
        #[serde(default)]
        item_id: Option<String>,
        /// Full transcript, when the service supplies it
        #[serde(default)]
        transcript: Option<String>,
    },

    /// Text delta
    #[serde(rename = "response.text.delta", alias = "response.output_text.delta")]
    TextDelta {
        #[serde(default)]
        item_id: Option<String>,
        delta: String,
    },

    /// Text done
    #[serde(rename = "response.text.done", alias = "response.output_text.done")]
    TextDone {
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        text: Option<String>,
    },

    /// Output item added to response
    #[serde(rename = "response.output_item.added")]
    OutputItemAdded {
        /// Item
        item: ConversationItem,
    },

    /// Function call arguments done
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        /// Call ID
        call_id: String,
        /// Function name (not sent by every API revision)
        #[serde(default)]
        name: Option<String>,
        /// Full arguments
        arguments: String,
        #[serde(default)]
        item_id: Option<String>,
    },

    /// Response done
    #[serde(rename = "response.done")]
    ResponseDone {
        #[serde(default)]
        response: Option<serde_json::Value>,
    },

    /// Any event type the engine does not act on
    #[serde(other)]
    Unknown,
}

impl ServerEvent {
    /// Parse one data-channel message.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

// =============================================================================
// Supporting Types
// =============================================================================

/// API error information.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiError {
    /// Error type
    #[serde(rename = "type", default)]
    pub error_type: String,
    /// Error code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Error message
    #[serde(default)]
    pub message: String,
}

/// Session information echoed by the service.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_function_call_output_serialization() {
        let event = ClientEvent::function_call_output("call_1", r#"{"success":true}"#);
        let json: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "conversation.item.create");
        assert_eq!(json["item"]["type"], "function_call_output");
        assert_eq!(json["item"]["call_id"], "call_1");
        assert_eq!(json["item"]["output"], r#"{"success":true}"#);
        assert!(json["item"].get("role").is_none());
    }

    #[test]
    fn test_response_create_serialization() {
        let json = ClientEvent::response_create().to_json().unwrap();
        assert_eq!(json, r#"{"type":"response.create"}"#);
    }

    #[test]
    fn test_session_update_serialization() {
        let event = ClientEvent::SessionUpdate {
            session: SessionConfig {
                instructions: Some("Ask about symptoms".to_string()),
                voice: Some("alloy".to_string()),
                tools: Some(vec![ToolDef::function(
                    "submit_intake",
                    None,
                    json!({"type": "object"}),
                )]),
                tool_choice: Some("auto".to_string()),
                ..Default::default()
            },
        };
        let json: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "session.update");
        assert_eq!(json["session"]["tools"][0]["type"], "function");
        assert_eq!(json["session"]["tools"][0]["name"], "submit_intake");
        assert!(json["session"].get("modalities").is_none());
    }

    #[test]
    fn test_error_event_deserialization() {
        let event = ServerEvent::parse(
            r#"{"type":"error","error":{"type":"invalid_request_error","message":"Test error"}}"#,
        )
        .unwrap();
        match event {
            ServerEvent::Error { error } => assert_eq!(error.message, "Test error"),
            _ => panic!("Wrong event type"),
        }
    }

    #[test]
    fn test_transcript_delta_aliases() {
        for kind in [
            "response.audio_transcript.delta",
            "response.output_audio_transcript.delta",
        ] {
            let text = json!({"type": kind, "delta": "Hel", "response_id": "r"}).to_string();
            match ServerEvent::parse(&text).unwrap() {
                ServerEvent::AudioTranscriptDelta { delta, .. } => assert_eq!(delta, "Hel"),
                other => panic!("Wrong event type: {other:?}"),
            }
        }
    }

    #[test]
    fn test_function_call_done_without_name() {
        let event = ServerEvent::parse(
            r#"{"type":"response.function_call_arguments.done","call_id":"c1","arguments":"{}"}"#,
        )
        .unwrap();
        match event {
            ServerEvent::FunctionCallArgumentsDone { call_id, name, .. } => {
                assert_eq!(call_id, "c1");
                assert!(name.is_none());
            }
            _ => panic!("Wrong event type"),
        }
    }

    #[test]
    fn test_unknown_event_type() {
        let event = ServerEvent::parse(r#"{"type":"rate_limits.updated","rate_limits":[]}"#).unwrap();
        assert!(matches!(event, ServerEvent::Unknown));
    }

    #[test]
    fn test_known_type_with_bad_fields_fails() {
        assert!(ServerEvent::parse(r#"{"type":"response.audio_transcript.delta"}"#).is_err());
        assert!(ServerEvent::parse("not json").is_err());
    }
}

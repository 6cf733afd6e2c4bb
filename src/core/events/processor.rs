//! Inbound event stream processing.
//!
//! The processor decodes one data-channel message at a time and classifies
//! it into a [`ProcessedEvent`] for the session state machine to apply. It
//! owns the only scratch state in the pipeline:
//!
//! - the assistant utterance being streamed in as deltas
//! - function names announced by `response.output_item.added`, keyed by
//!   call id, for API revisions whose `function_call_arguments.done` omits
//!   the name
//! - the question counter
//!
//! Messages are handled strictly in arrival order; nothing is reordered.

use std::collections::HashMap;

use serde_json::json;
use tracing::{debug, trace, warn};

use super::messages::{ClientEvent, ServerEvent};
use crate::core::extraction::{MalformedOutputError, RecordSchema, StructuredRecord};
use crate::core::safety::SharedClassifier;

/// User voice activity, surfaced for UI only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechActivity {
    Started,
    Stopped,
}

/// Result of processing one message.
#[derive(Debug)]
pub enum ProcessedEvent {
    /// A delta went into the scratch buffer; nothing to apply
    Buffered,
    /// A completed assistant utterance
    AssistantUtterance(String),
    /// A completed user utterance, already screened by the classifier
    UserUtterance {
        text: String,
        crisis_indicator: Option<String>,
    },
    /// User started or stopped speaking
    SpeechActivity(SpeechActivity),
    /// The expected tool was invoked with a valid payload
    RecordExtracted {
        record: StructuredRecord,
        acknowledgement: Vec<ClientEvent>,
    },
    /// The expected tool was invoked with a malformed payload
    RecordRejected {
        error: MalformedOutputError,
        acknowledgement: Vec<ClientEvent>,
    },
    /// The service reported an error on the channel
    TransportError(String),
    /// Unrecognized, unparseable or irrelevant message
    Ignored,
}

/// Stateful decoder for the inbound message stream.
pub struct EventStreamProcessor {
    tool_name: String,
    schema: RecordSchema,
    classifier: SharedClassifier,
    current_assistant_utterance: String,
    pending_function_calls: HashMap<String, String>,
    question_count: u32,
}

impl EventStreamProcessor {
    pub fn new(
        tool_name: impl Into<String>,
        schema: RecordSchema,
        classifier: SharedClassifier,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            schema,
            classifier,
            current_assistant_utterance: String::new(),
            pending_function_calls: HashMap::new(),
            question_count: 0,
        }
    }

    /// Number of completed assistant utterances.
    pub fn question_count(&self) -> u32 {
        self.question_count
    }

    /// The assistant utterance currently being streamed.
    pub fn current_assistant_utterance(&self) -> &str {
        &self.current_assistant_utterance
    }

    /// Clear all scratch state, for a fresh session attempt.
    pub fn reset(&mut self) {
        self.current_assistant_utterance.clear();
        self.pending_function_calls.clear();
        self.question_count = 0;
    }

    /// Decode and classify one raw message.
    pub fn process(&mut self, raw: &str) -> ProcessedEvent {
        match ServerEvent::parse(raw) {
            Ok(event) => self.handle(event),
            Err(e) => {
                warn!("Failed to parse data channel message: {}", e);
                ProcessedEvent::Ignored
            }
        }
    }

    /// Classify one decoded event.
    pub fn handle(&mut self, event: ServerEvent) -> ProcessedEvent {
        match event {
            ServerEvent::AudioTranscriptDelta { delta, .. }
            | ServerEvent::TextDelta { delta, .. } => {
                self.current_assistant_utterance.push_str(&delta);
                ProcessedEvent::Buffered
            }

            ServerEvent::AudioTranscriptDone { transcript, .. } => self.flush_assistant(transcript),
            ServerEvent::TextDone { text, .. } => self.flush_assistant(text),

            ServerEvent::TranscriptionCompleted { transcript, .. } => {
                // Screen before anything else touches the utterance.
                let crisis_indicator = self.classifier.matched_indicator(&transcript);
                debug!("User transcript: {}", transcript);
                ProcessedEvent::UserUtterance {
                    text: transcript,
                    crisis_indicator,
                }
            }

            ServerEvent::SpeechStarted { .. } => {
                ProcessedEvent::SpeechActivity(SpeechActivity::Started)
            }
            ServerEvent::SpeechStopped { .. } => {
                ProcessedEvent::SpeechActivity(SpeechActivity::Stopped)
            }

            ServerEvent::OutputItemAdded { item } => {
                if item.item_type == "function_call"
                    && let (Some(call_id), Some(name)) = (item.call_id, item.name)
                {
                    debug!("Tracking function call: call_id={}, name={}", call_id, name);
                    self.pending_function_calls.insert(call_id, name);
                }
                ProcessedEvent::Ignored
            }

            ServerEvent::FunctionCallArgumentsDone {
                call_id,
                name,
                arguments,
                ..
            } => self.handle_function_call(call_id, name, &arguments),

            ServerEvent::Error { error } => {
                let message = if error.error_type.is_empty() {
                    error.message
                } else {
                    format!("{}: {}", error.error_type, error.message)
                };
                warn!("Realtime service error: {}", message);
                ProcessedEvent::TransportError(message)
            }

            ServerEvent::SessionCreated { session } | ServerEvent::SessionUpdated { session } => {
                debug!(
                    remote_session = ?session.and_then(|s| s.id),
                    "Realtime session configured"
                );
                ProcessedEvent::Ignored
            }

            ServerEvent::ResponseDone { .. } => {
                trace!("Response done");
                ProcessedEvent::Ignored
            }

            ServerEvent::Unknown => {
                trace!("Unhandled server event");
                ProcessedEvent::Ignored
            }
        }
    }

    fn flush_assistant(&mut self, final_text: Option<String>) -> ProcessedEvent {
        let buffered = std::mem::take(&mut self.current_assistant_utterance);
        let text = match final_text {
            Some(text) if !text.is_empty() => text,
            _ => buffered,
        };

        if text.trim().is_empty() {
            return ProcessedEvent::Ignored;
        }

        self.question_count += 1;
        ProcessedEvent::AssistantUtterance(text)
    }

    fn handle_function_call(
        &mut self,
        call_id: String,
        name: Option<String>,
        arguments: &str,
    ) -> ProcessedEvent {
        let tracked = self.pending_function_calls.remove(&call_id);
        let name = name.or(tracked);

        if let Some(ref name) = name
            && name != &self.tool_name
        {
            warn!(
                "Ignoring call to unexpected function '{}' (expected '{}')",
                name, self.tool_name
            );
            return ProcessedEvent::Ignored;
        }

        match self.schema.extract(arguments) {
            Ok(record) => {
                debug!(call_id = %call_id, "Structured record extracted");
                ProcessedEvent::RecordExtracted {
                    record,
                    acknowledgement: vec![
                        ClientEvent::function_call_output(
                            call_id,
                            json!({"success": true}).to_string(),
                        ),
                        ClientEvent::response_create(),
                    ],
                }
            }
            Err(error) => {
                warn!(call_id = %call_id, "Malformed tool payload: {}", error);
                let output = json!({"success": false, "error": error.to_string()}).to_string();
                ProcessedEvent::RecordRejected {
                    error,
                    acknowledgement: vec![
                        ClientEvent::function_call_output(call_id, output),
                        ClientEvent::response_create(),
                    ],
                }
            }
        }
    }
}

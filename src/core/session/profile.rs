//! Interview profiles.
//!
//! A profile carries everything that differs between interview types: the
//! interviewer instructions, the tool the agent calls with its structured
//! record, the safety classifier and the voice settings. One engine serves
//! every interview type by swapping profiles.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use super::state::{SessionError, SessionResult};
use crate::core::events::{SessionConfig, ToolDef};
use crate::core::events::messages::InputAudioTranscription;
use crate::core::extraction::RecordSchema;
use crate::core::safety::{KeywordSafetyMonitor, SharedClassifier};
use crate::core::transport::{InterviewKind, SessionParams};

/// Default input transcription model.
pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "whisper-1";

/// Default delay between a successful tool call and automatic completion.
pub const DEFAULT_COMPLETION_GRACE: Duration = Duration::from_secs(3);

// =============================================================================
// Voices
// =============================================================================

/// Interviewer voices offered by the realtime service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterviewerVoice {
    #[default]
    Alloy,
    Ash,
    Ballad,
    Coral,
    Echo,
    Sage,
    Shimmer,
    Verse,
}

impl InterviewerVoice {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alloy => "alloy",
            Self::Ash => "ash",
            Self::Ballad => "ballad",
            Self::Coral => "coral",
            Self::Echo => "echo",
            Self::Sage => "sage",
            Self::Shimmer => "shimmer",
            Self::Verse => "verse",
        }
    }

    /// Parse from string, with fallback to default.
    pub fn from_str_or_default(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "ash" => Self::Ash,
            "ballad" => Self::Ballad,
            "coral" => Self::Coral,
            "echo" => Self::Echo,
            "sage" => Self::Sage,
            "shimmer" => Self::Shimmer,
            "verse" => Self::Verse,
            _ => Self::Alloy,
        }
    }
}

impl std::fmt::Display for InterviewerVoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Profile
// =============================================================================

/// Immutable per-interview configuration.
#[derive(Clone)]
pub struct InterviewProfile {
    kind: InterviewKind,
    referral_context: Option<String>,
    instructions: String,
    tool: ToolDef,
    schema: RecordSchema,
    classifier: SharedClassifier,
    voice: InterviewerVoice,
    transcription_model: String,
    completion_grace: Duration,
    greet_on_open: bool,
}

impl InterviewProfile {
    pub fn builder(kind: InterviewKind) -> InterviewProfileBuilder {
        InterviewProfileBuilder::new(kind)
    }

    pub fn kind(&self) -> InterviewKind {
        self.kind
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    pub fn tool(&self) -> &ToolDef {
        &self.tool
    }

    pub fn tool_name(&self) -> &str {
        &self.tool.name
    }

    pub fn schema(&self) -> &RecordSchema {
        &self.schema
    }

    pub fn classifier(&self) -> SharedClassifier {
        Arc::clone(&self.classifier)
    }

    pub fn voice(&self) -> InterviewerVoice {
        self.voice
    }

    pub fn completion_grace(&self) -> Duration {
        self.completion_grace
    }

    pub fn greet_on_open(&self) -> bool {
        self.greet_on_open
    }

    /// Parameters sent to the credential issuer.
    pub fn session_params(&self) -> SessionParams {
        let params = SessionParams::new(self.kind);
        match &self.referral_context {
            Some(context) => params.with_referral_context(context.clone()),
            None => params,
        }
    }

    /// The `session.update` payload sent once the data channel opens.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            modalities: Some(vec!["text".to_string(), "audio".to_string()]),
            instructions: Some(self.instructions.clone()),
            voice: Some(self.voice.as_str().to_string()),
            input_audio_transcription: Some(InputAudioTranscription {
                model: self.transcription_model.clone(),
            }),
            tools: Some(vec![self.tool.clone()]),
            tool_choice: Some("auto".to_string()),
        }
    }
}

impl std::fmt::Debug for InterviewProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterviewProfile")
            .field("kind", &self.kind)
            .field("tool", &self.tool.name)
            .field("required", &self.schema.required())
            .field("voice", &self.voice)
            .field("completion_grace", &self.completion_grace)
            .finish_non_exhaustive()
    }
}

/// Builder for [`InterviewProfile`].
pub struct InterviewProfileBuilder {
    kind: InterviewKind,
    referral_context: Option<String>,
    instructions: Option<String>,
    tool: Option<ToolDef>,
    required_fields: Option<Vec<String>>,
    classifier: Option<SharedClassifier>,
    voice: InterviewerVoice,
    transcription_model: String,
    completion_grace: Duration,
    greet_on_open: bool,
}

impl InterviewProfileBuilder {
    fn new(kind: InterviewKind) -> Self {
        Self {
            kind,
            referral_context: None,
            instructions: None,
            tool: None,
            required_fields: None,
            classifier: None,
            voice: InterviewerVoice::default(),
            transcription_model: DEFAULT_TRANSCRIPTION_MODEL.to_string(),
            completion_grace: DEFAULT_COMPLETION_GRACE,
            greet_on_open: true,
        }
    }

    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// The function the agent calls with the final record.
    ///
    /// Required keys are taken from the schema's `required` array unless
    /// [`required_fields`](Self::required_fields) overrides them.
    pub fn tool(
        mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
    ) -> Self {
        self.tool = Some(ToolDef::function(
            name,
            Some(description.into()),
            parameters,
        ));
        self
    }

    /// Use a tool definition loaded elsewhere (e.g. from a JSON file).
    pub fn tool_def(mut self, tool: ToolDef) -> Self {
        self.tool = Some(tool);
        self
    }

    pub fn required_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Replace the default crisis phrase list.
    pub fn safety_phrases<I, S>(mut self, phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.classifier = Some(Arc::new(KeywordSafetyMonitor::new(phrases)));
        self
    }

    /// Plug in a different classifier.
    pub fn classifier(mut self, classifier: SharedClassifier) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn referral_context(mut self, context: impl Into<String>) -> Self {
        self.referral_context = Some(context.into());
        self
    }

    pub fn voice(mut self, voice: InterviewerVoice) -> Self {
        self.voice = voice;
        self
    }

    pub fn transcription_model(mut self, model: impl Into<String>) -> Self {
        self.transcription_model = model.into();
        self
    }

    pub fn completion_grace(mut self, grace: Duration) -> Self {
        self.completion_grace = grace;
        self
    }

    pub fn greet_on_open(mut self, greet: bool) -> Self {
        self.greet_on_open = greet;
        self
    }

    pub fn build(self) -> SessionResult<InterviewProfile> {
        let instructions = self
            .instructions
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| SessionError::InvalidProfile("instructions are required".to_string()))?;

        let tool = self
            .tool
            .ok_or_else(|| SessionError::InvalidProfile("a tool definition is required".to_string()))?;
        if tool.name.trim().is_empty() {
            return Err(SessionError::InvalidProfile(
                "tool name must not be empty".to_string(),
            ));
        }

        let schema = match self.required_fields {
            Some(fields) => RecordSchema::new(fields),
            None => tool
                .parameters
                .as_ref()
                .map(RecordSchema::from_tool_parameters)
                .unwrap_or_default(),
        };

        if self.transcription_model.trim().is_empty() {
            return Err(SessionError::InvalidProfile(
                "transcription model must not be empty".to_string(),
            ));
        }

        Ok(InterviewProfile {
            kind: self.kind,
            referral_context: self.referral_context,
            instructions,
            tool,
            schema,
            classifier: self
                .classifier
                .unwrap_or_else(|| Arc::new(KeywordSafetyMonitor::default())),
            voice: self.voice,
            transcription_model: self.transcription_model,
            completion_grace: self.completion_grace,
            greet_on_open: self.greet_on_open,
        })
    }
}

//! Configuration for the interview engine
//!
//! Configuration comes from .env files, environment variables and an optional
//! YAML file. Priority: YAML > ENV vars > .env values > defaults. The .env file
//! is loaded by the binary at startup, so library callers see it as ordinary
//! environment variables.
//!
//! # Example
//! ```rust,no_run
//! use interview_engine::config::EngineConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = EngineConfig::from_env()?;
//!
//! // Load from YAML file with environment variable base
//! let config = EngineConfig::from_file(&PathBuf::from("interview.yaml"))?;
//! println!("Realtime endpoint: {}", config.realtime_url);
//! # Ok(())
//! # }
//! ```

use std::env;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use url::Url;

mod yaml;

pub use yaml::{CredentialsYaml, RealtimeYaml, SafetyYaml, SessionYaml, YamlConfig};

use crate::core::safety::KeywordSafetyMonitor;
use crate::core::session::{InterviewProfileBuilder, InterviewerVoice};
use crate::core::session::profile::DEFAULT_TRANSCRIPTION_MODEL;
use crate::core::transport::{
    DEFAULT_REALTIME_MODEL, DEFAULT_REALTIME_URL, HttpCredentialIssuer, HttpSignaling,
    MicrophoneSource, PeerFactory, TransportNegotiator,
};

const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 10;
const DEFAULT_COMPLETION_GRACE_MS: u64 = 3000;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0}")]
    Read(String),

    #[error("{0}")]
    Parse(String),

    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },

    #[error("Invalid URL for {name}: {source}")]
    InvalidUrl {
        name: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Missing required configuration: {0}")]
    Missing(&'static str),

    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Engine configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Backend endpoint that mints ephemeral realtime credentials
    pub credential_url: Option<String>,
    /// Bearer token for the credential endpoint, if it requires one
    pub credential_bearer_token: Option<String>,
    pub realtime_url: String,
    pub model: String,
    pub voice: InterviewerVoice,
    pub transcription_model: String,
    pub request_timeout_seconds: u64,
    pub completion_grace_ms: u64,
    pub greet_on_open: bool,
    /// Replaces the built-in crisis phrase list when set
    pub safety_phrases: Option<Vec<String>>,
    pub safety_extra_phrases: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            credential_url: None,
            credential_bearer_token: None,
            realtime_url: DEFAULT_REALTIME_URL.to_string(),
            model: DEFAULT_REALTIME_MODEL.to_string(),
            voice: InterviewerVoice::default(),
            transcription_model: DEFAULT_TRANSCRIPTION_MODEL.to_string(),
            request_timeout_seconds: DEFAULT_REQUEST_TIMEOUT_SECONDS,
            completion_grace_ms: DEFAULT_COMPLETION_GRACE_MS,
            greet_on_open: true,
            safety_phrases: None,
            safety_extra_phrases: Vec::new(),
        }
    }
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("credential_url", &self.credential_url)
            .field(
                "credential_bearer_token",
                &self.credential_bearer_token.as_ref().map(|_| "<redacted>"),
            )
            .field("realtime_url", &self.realtime_url)
            .field("model", &self.model)
            .field("voice", &self.voice)
            .field("transcription_model", &self.transcription_model)
            .field("request_timeout_seconds", &self.request_timeout_seconds)
            .field("completion_grace_ms", &self.completion_grace_ms)
            .field("greet_on_open", &self.greet_on_open)
            .field("safety_phrases", &self.safety_phrases)
            .field("safety_extra_phrases", &self.safety_extra_phrases)
            .finish()
    }
}

impl EngineConfig {
    /// Load configuration from environment variables over defaults
    ///
    /// | Variable | Field |
    /// |---|---|
    /// | `INTERVIEW_CREDENTIAL_URL` | `credential_url` |
    /// | `INTERVIEW_CREDENTIAL_TOKEN` | `credential_bearer_token` |
    /// | `INTERVIEW_REALTIME_URL` | `realtime_url` |
    /// | `INTERVIEW_MODEL` | `model` |
    /// | `INTERVIEW_VOICE` | `voice` |
    /// | `INTERVIEW_TRANSCRIPTION_MODEL` | `transcription_model` |
    /// | `INTERVIEW_REQUEST_TIMEOUT_SECONDS` | `request_timeout_seconds` |
    /// | `INTERVIEW_COMPLETION_GRACE_MS` | `completion_grace_ms` |
    /// | `INTERVIEW_GREET_ON_OPEN` | `greet_on_open` |
    /// | `INTERVIEW_SAFETY_EXTRA_PHRASES` | `safety_extra_phrases` (comma separated) |
    pub fn from_env() -> ConfigResult<Self> {
        let config = Self::env_base()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let yaml_config = YamlConfig::from_file(path)?;
        let mut config = Self::env_base()?;
        config.apply_yaml(yaml_config);
        config.validate()?;
        Ok(config)
    }

    fn env_base() -> ConfigResult<Self> {
        let defaults = Self::default();

        let safety_extra_phrases = env_string("INTERVIEW_SAFETY_EXTRA_PHRASES")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            credential_url: env_string("INTERVIEW_CREDENTIAL_URL"),
            credential_bearer_token: env_string("INTERVIEW_CREDENTIAL_TOKEN"),
            realtime_url: env_string("INTERVIEW_REALTIME_URL").unwrap_or(defaults.realtime_url),
            model: env_string("INTERVIEW_MODEL").unwrap_or(defaults.model),
            voice: env_string("INTERVIEW_VOICE")
                .map(|v| InterviewerVoice::from_str_or_default(&v))
                .unwrap_or(defaults.voice),
            transcription_model: env_string("INTERVIEW_TRANSCRIPTION_MODEL")
                .unwrap_or(defaults.transcription_model),
            request_timeout_seconds: env_parse("INTERVIEW_REQUEST_TIMEOUT_SECONDS")?
                .unwrap_or(defaults.request_timeout_seconds),
            completion_grace_ms: env_parse("INTERVIEW_COMPLETION_GRACE_MS")?
                .unwrap_or(defaults.completion_grace_ms),
            greet_on_open: env_bool("INTERVIEW_GREET_ON_OPEN")?.unwrap_or(defaults.greet_on_open),
            safety_phrases: None,
            safety_extra_phrases,
        })
    }

    fn apply_yaml(&mut self, yaml: YamlConfig) {
        if let Some(credentials) = yaml.credentials {
            if let Some(url) = credentials.url {
                self.credential_url = Some(url);
            }
            if let Some(token) = credentials.bearer_token {
                self.credential_bearer_token = Some(token);
            }
        }

        if let Some(realtime) = yaml.realtime {
            if let Some(url) = realtime.url {
                self.realtime_url = url;
            }
            if let Some(model) = realtime.model {
                self.model = model;
            }
            if let Some(voice) = realtime.voice {
                self.voice = InterviewerVoice::from_str_or_default(&voice);
            }
            if let Some(model) = realtime.transcription_model {
                self.transcription_model = model;
            }
            if let Some(timeout) = realtime.request_timeout_seconds {
                self.request_timeout_seconds = timeout;
            }
        }

        if let Some(session) = yaml.session {
            if let Some(grace) = session.completion_grace_ms {
                self.completion_grace_ms = grace;
            }
            if let Some(greet) = session.greet_on_open {
                self.greet_on_open = greet;
            }
        }

        if let Some(safety) = yaml.safety {
            if let Some(phrases) = safety.phrases {
                self.safety_phrases = Some(phrases);
            }
            if let Some(extra) = safety.extra_phrases {
                self.safety_extra_phrases = extra;
            }
        }
    }

    /// Check the merged configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(url) = &self.credential_url {
            validate_http_url("credential_url", url)?;
        }
        validate_http_url("realtime_url", &self.realtime_url)?;

        if self.model.trim().is_empty() {
            return Err(invalid("model", "must not be empty"));
        }
        if self.transcription_model.trim().is_empty() {
            return Err(invalid("transcription_model", "must not be empty"));
        }
        if self.request_timeout_seconds == 0 {
            return Err(invalid("request_timeout_seconds", "must be greater than zero"));
        }
        if let Some(phrases) = &self.safety_phrases
            && phrases.iter().all(|p| p.trim().is_empty())
        {
            return Err(invalid("safety.phrases", "must contain at least one phrase"));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn completion_grace(&self) -> Duration {
        Duration::from_millis(self.completion_grace_ms)
    }

    /// The keyword monitor described by the safety settings.
    pub fn safety_monitor(&self) -> KeywordSafetyMonitor {
        let base = match &self.safety_phrases {
            Some(phrases) => KeywordSafetyMonitor::new(phrases),
            None => KeywordSafetyMonitor::default(),
        };
        base.with_extra_phrases(&self.safety_extra_phrases)
    }

    /// Apply voice, transcription, timing and safety settings to a profile.
    pub fn apply_to_profile(&self, builder: InterviewProfileBuilder) -> InterviewProfileBuilder {
        builder
            .voice(self.voice)
            .transcription_model(self.transcription_model.clone())
            .completion_grace(self.completion_grace())
            .greet_on_open(self.greet_on_open)
            .classifier(Arc::new(self.safety_monitor()))
    }

    /// Build a negotiator using the HTTP credential issuer and signaling.
    pub fn build_negotiator(
        &self,
        microphone: Arc<dyn MicrophoneSource>,
        peers: Arc<dyn PeerFactory>,
    ) -> ConfigResult<TransportNegotiator> {
        let credential_url = self
            .credential_url
            .as_deref()
            .ok_or(ConfigError::Missing("credential_url"))?;

        let mut issuer = HttpCredentialIssuer::new(credential_url, self.request_timeout())
            .map_err(|e| ConfigError::Client(e.to_string()))?;
        if let Some(token) = &self.credential_bearer_token {
            issuer = issuer.with_bearer_token(token.clone());
        }

        let signaling = HttpSignaling::new(&self.realtime_url, &self.model, self.request_timeout())
            .map_err(|e| ConfigError::Client(e.to_string()))?;

        Ok(TransportNegotiator::new(
            Arc::new(issuer),
            Arc::new(signaling),
            microphone,
            peers,
        ))
    }
}

fn invalid(name: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

fn validate_http_url(name: &str, value: &str) -> ConfigResult<()> {
    let url = Url::parse(value).map_err(|source| ConfigError::InvalidUrl {
        name: name.to_string(),
        source,
    })?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(invalid(name, &format!("unsupported scheme '{other}'"))),
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T>(key: &str) -> ConfigResult<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    env_string(key)
        .map(|raw| {
            raw.parse::<T>().map_err(|e| ConfigError::InvalidValue {
                name: key.to_string(),
                reason: e.to_string(),
            })
        })
        .transpose()
}

fn env_bool(key: &str) -> ConfigResult<Option<bool>> {
    env_string(key)
        .map(|raw| match raw.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                name: key.to_string(),
                reason: format!("expected a boolean, got '{raw}'"),
            }),
        })
        .transpose()
}

use serde::Deserialize;
use std::path::Path;

use super::ConfigError;

/// Complete YAML configuration structure
///
/// All fields are optional so a file can override only what it needs;
/// anything left out falls back to the environment and then to defaults.
///
/// # Example YAML structure
/// ```yaml
/// credentials:
///   url: "https://clinic.example.com/api/realtime-token"
///   bearer_token: "backend-token"
///
/// realtime:
///   url: "https://api.openai.com/v1/realtime"
///   model: "gpt-4o-realtime-preview-2024-12-17"
///   voice: "sage"
///   transcription_model: "whisper-1"
///   request_timeout_seconds: 15
///
/// session:
///   completion_grace_ms: 4000
///   greet_on_open: true
///
/// safety:
///   extra_phrases:
///     - "can't go on"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub credentials: Option<CredentialsYaml>,
    pub realtime: Option<RealtimeYaml>,
    pub session: Option<SessionYaml>,
    pub safety: Option<SafetyYaml>,
}

/// Credential issuer endpoint from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CredentialsYaml {
    pub url: Option<String>,
    pub bearer_token: Option<String>,
}

/// Realtime service settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RealtimeYaml {
    pub url: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
    pub transcription_model: Option<String>,
    pub request_timeout_seconds: Option<u64>,
}

/// Session behaviour from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SessionYaml {
    pub completion_grace_ms: Option<u64>,
    pub greet_on_open: Option<bool>,
}

/// Safety monitor phrases from YAML
///
/// `phrases` replaces the built-in list; `extra_phrases` extends it.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SafetyYaml {
    pub phrases: Option<Vec<String>>,
    pub extra_phrases: Option<Vec<String>>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::Read(format!(
                "Failed to read config file {}: {e}",
                path.display()
            ))
        })?;

        serde_yaml::from_str(&contents)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse YAML config: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_yaml_full_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let yaml_content = r#"
credentials:
  url: "https://clinic.example.com/token"
  bearer_token: "secret"

realtime:
  url: "https://realtime.example.com/v1/realtime"
  model: "gpt-4o-mini-realtime-preview"
  voice: "coral"
  transcription_model: "gpt-4o-transcribe"
  request_timeout_seconds: 20

session:
  completion_grace_ms: 1500
  greet_on_open: false

safety:
  phrases:
    - "end it all"
  extra_phrases:
    - "no way out"
"#;
        fs::write(&config_path, yaml_content).unwrap();

        let config = YamlConfig::from_file(&config_path).unwrap();

        let credentials = config.credentials.unwrap();
        assert_eq!(
            credentials.url,
            Some("https://clinic.example.com/token".to_string())
        );
        assert_eq!(credentials.bearer_token, Some("secret".to_string()));

        let realtime = config.realtime.unwrap();
        assert_eq!(realtime.voice, Some("coral".to_string()));
        assert_eq!(realtime.request_timeout_seconds, Some(20));

        let session = config.session.unwrap();
        assert_eq!(session.completion_grace_ms, Some(1500));
        assert_eq!(session.greet_on_open, Some(false));

        let safety = config.safety.unwrap();
        assert_eq!(safety.phrases, Some(vec!["end it all".to_string()]));
        assert_eq!(safety.extra_phrases, Some(vec!["no way out".to_string()]));
    }

    #[test]
    fn test_yaml_partial_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        fs::write(&config_path, "session:\n  greet_on_open: false\n").unwrap();

        let config = YamlConfig::from_file(&config_path).unwrap();
        assert!(config.credentials.is_none());
        assert!(config.realtime.is_none());
        assert_eq!(config.session.unwrap().greet_on_open, Some(false));
    }

    #[test]
    fn test_yaml_empty_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("empty.yaml");
        fs::write(&config_path, "{}").unwrap();

        let config = YamlConfig::from_file(&config_path).unwrap();
        assert!(config.safety.is_none());
    }

    #[test]
    fn test_yaml_invalid_type() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("bad.yaml");
        fs::write(&config_path, "session:\n  completion_grace_ms: \"soon\"\n").unwrap();

        let err = YamlConfig::from_file(&config_path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse YAML config"));
    }
}

//! Structured-output extraction from tool invocation payloads.
//!
//! The remote agent emits its findings by calling a function whose JSON
//! schema is supplied by the prompt builder. This module only enforces that
//! the arguments are a JSON object with the declared required keys present,
//! and lifts the three engine-owned fields out of the payload:
//!
//! - `narrative_summary` (default `""`)
//! - `red_flags` (default `[]`)
//! - `safety_escalated` (default `false`)
//!
//! The engine-owned fields never reject a record. A wrongly typed value falls
//! back to its default and an unparseable red flag is dropped, both with a
//! warning.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;
use tracing::warn;

/// Payload key for the free-text summary.
pub const NARRATIVE_SUMMARY_KEY: &str = "narrative_summary";
/// Payload key for the red flag list.
pub const RED_FLAGS_KEY: &str = "red_flags";
/// Payload key for the remote safety flag.
pub const SAFETY_ESCALATED_KEY: &str = "safety_escalated";

/// The tool payload could not be turned into a record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedOutputError {
    #[error("Tool arguments are not valid JSON: {0}")]
    InvalidJson(String),

    #[error("Tool arguments must be a JSON object")]
    NotAnObject,

    #[error("Tool arguments are missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<String>),
}

/// Severity of a red flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
    Low,
}

impl Severity {
    const LABELS: &'static [&'static str] = &["high", "medium", "low"];

    /// Parse a severity label, ignoring case and surrounding whitespace.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "high" => Some(Severity::High),
            "medium" => Some(Severity::Medium),
            "low" => Some(Severity::Low),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for Severity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        Severity::parse(&label)
            .ok_or_else(|| serde::de::Error::unknown_variant(&label, Self::LABELS))
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::High => write!(f, "high"),
            Severity::Medium => write!(f, "medium"),
            Severity::Low => write!(f, "low"),
        }
    }
}

/// A clinically significant finding surfaced by the interviewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedFlag {
    pub flag: String,
    pub severity: Severity,
    #[serde(default)]
    pub context: String,
}

/// The record produced by the remote agent's tool invocation.
///
/// `fields` holds the caller-defined schema verbatim (including the
/// engine-owned keys as they appeared in the payload).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredRecord {
    pub fields: Map<String, Value>,
    pub narrative_summary: String,
    pub red_flags: Vec<RedFlag>,
    pub safety_escalated: bool,
}

impl StructuredRecord {
    /// Look up a caller-defined field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Whether any red flag carries high severity.
    pub fn has_high_severity_flag(&self) -> bool {
        self.red_flags.iter().any(|f| f.severity == Severity::High)
    }

    /// Set by the engine when the local monitor fires independently.
    pub(crate) fn mark_safety_escalated(&mut self) {
        self.safety_escalated = true;
    }
}

/// Required-key contract for the record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordSchema {
    required: Vec<String>,
}

impl RecordSchema {
    pub fn new<I, S>(required: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            required: required.into_iter().map(Into::into).collect(),
        }
    }

    /// Derive the required keys from a function's JSON-schema parameters.
    ///
    /// Anything without a `required` string array yields an empty schema.
    pub fn from_tool_parameters(parameters: &Value) -> Self {
        let required = parameters
            .get("required")
            .and_then(Value::as_array)
            .map(|keys| {
                keys.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Self { required }
    }

    pub fn required(&self) -> &[String] {
        &self.required
    }

    /// Parse and validate a raw tool arguments payload.
    pub fn extract(&self, raw_arguments: &str) -> Result<StructuredRecord, MalformedOutputError> {
        let value: Value = serde_json::from_str(raw_arguments)
            .map_err(|e| MalformedOutputError::InvalidJson(e.to_string()))?;

        let Value::Object(fields) = value else {
            return Err(MalformedOutputError::NotAnObject);
        };

        let missing: Vec<String> = self
            .required
            .iter()
            .filter(|key| matches!(fields.get(key.as_str()), None | Some(Value::Null)))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(MalformedOutputError::MissingFields(missing));
        }

        let narrative_summary = match fields.get(NARRATIVE_SUMMARY_KEY) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => {
                warn!("Ignoring non-string {}: {}", NARRATIVE_SUMMARY_KEY, other);
                String::new()
            }
        };

        let red_flags = lenient_red_flags(fields.get(RED_FLAGS_KEY));

        let safety_escalated = match fields.get(SAFETY_ESCALATED_KEY) {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(other) => {
                warn!("Ignoring non-boolean {}: {}", SAFETY_ESCALATED_KEY, other);
                false
            }
        };

        Ok(StructuredRecord {
            fields,
            narrative_summary,
            red_flags,
            safety_escalated,
        })
    }
}

fn lenient_red_flags(value: Option<&Value>) -> Vec<RedFlag> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(entries)) => entries
            .iter()
            .filter_map(|entry| match RedFlag::deserialize(entry) {
                Ok(flag) => Some(flag),
                Err(e) => {
                    warn!("Dropping unparseable red flag {}: {}", entry, e);
                    None
                }
            })
            .collect(),
        Some(other) => {
            warn!("Ignoring non-array {}: {}", RED_FLAGS_KEY, other);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn intake_schema() -> RecordSchema {
        RecordSchema::new(["patient_name", "chief_complaint"])
    }

    #[test]
    fn test_extract_valid_payload() {
        let raw = json!({
            "patient_name": "Jane Doe",
            "chief_complaint": "headache",
            "narrative_summary": "Two weeks of morning headaches.",
            "red_flags": [
                {"flag": "worst headache of life", "severity": "high", "context": "onset yesterday"}
            ],
            "safety_escalated": false
        })
        .to_string();

        let record = intake_schema().extract(&raw).unwrap();
        assert_eq!(record.get("patient_name"), Some(&json!("Jane Doe")));
        assert_eq!(record.narrative_summary, "Two weeks of morning headaches.");
        assert_eq!(record.red_flags.len(), 1);
        assert_eq!(record.red_flags[0].severity, Severity::High);
        assert!(record.has_high_severity_flag());
        assert!(!record.safety_escalated);
    }

    #[test]
    fn test_engine_fields_default() {
        let raw = r#"{"patient_name":"Jane Doe","chief_complaint":"cough"}"#;
        let record = intake_schema().extract(raw).unwrap();
        assert_eq!(record.narrative_summary, "");
        assert!(record.red_flags.is_empty());
        assert!(!record.safety_escalated);
    }

    #[test]
    fn test_invalid_json_is_malformed() {
        let err = intake_schema().extract("{not json").unwrap_err();
        assert!(matches!(err, MalformedOutputError::InvalidJson(_)));
    }

    #[test]
    fn test_non_object_is_malformed() {
        let err = intake_schema().extract("[1, 2, 3]").unwrap_err();
        assert_eq!(err, MalformedOutputError::NotAnObject);
    }

    #[test]
    fn test_missing_and_null_required_fields() {
        let err = intake_schema()
            .extract(r#"{"patient_name": null}"#)
            .unwrap_err();
        assert_eq!(
            err,
            MalformedOutputError::MissingFields(vec![
                "patient_name".to_string(),
                "chief_complaint".to_string()
            ])
        );
        assert!(err.to_string().contains("patient_name, chief_complaint"));
    }

    #[test]
    fn test_severity_is_case_insensitive() {
        let raw = json!({
            "patient_name": "A",
            "chief_complaint": "B",
            "red_flags": [
                {"flag": "syncope", "severity": "High"},
                {"flag": "weight loss", "severity": " MEDIUM "}
            ]
        })
        .to_string();
        let record = intake_schema().extract(&raw).unwrap();
        assert_eq!(record.red_flags.len(), 2);
        assert_eq!(record.red_flags[0].severity, Severity::High);
        assert_eq!(record.red_flags[1].severity, Severity::Medium);
        assert_eq!(record.red_flags[1].context, "");
    }

    #[test]
    fn test_unparseable_red_flags_are_dropped() {
        let raw = json!({
            "patient_name": "A",
            "chief_complaint": "B",
            "red_flags": [
                {"flag": "x", "severity": "critical"},
                {"severity": "low"},
                "chest pain",
                {"flag": "fever", "severity": "low", "context": "3 days"}
            ]
        })
        .to_string();
        let record = intake_schema().extract(&raw).unwrap();
        assert_eq!(record.red_flags.len(), 1);
        assert_eq!(record.red_flags[0].flag, "fever");
        // The raw payload is still kept verbatim.
        assert_eq!(record.get("red_flags").unwrap().as_array().unwrap().len(), 4);
    }

    #[test]
    fn test_non_array_red_flags_default_to_empty() {
        let raw = r#"{"patient_name":"A","chief_complaint":"B","red_flags":"none"}"#;
        let record = intake_schema().extract(raw).unwrap();
        assert!(record.red_flags.is_empty());
    }

    #[test]
    fn test_wrongly_typed_summary_defaults_to_empty() {
        let raw = r#"{"patient_name":"A","chief_complaint":"B","narrative_summary":["a","b"]}"#;
        let record = intake_schema().extract(raw).unwrap();
        assert_eq!(record.narrative_summary, "");
        assert_eq!(record.get("narrative_summary"), Some(&json!(["a", "b"])));
    }

    #[test]
    fn test_wrongly_typed_safety_flag_defaults_to_false() {
        let raw = r#"{"patient_name":"A","chief_complaint":"B","safety_escalated":"yes"}"#;
        let record = intake_schema().extract(raw).unwrap();
        assert!(!record.safety_escalated);
    }

    #[test]
    fn test_severity_parse() {
        assert_eq!(Severity::parse("LOW"), Some(Severity::Low));
        assert_eq!(Severity::parse("critical"), None);
        assert_eq!(Severity::High.to_string(), "high");
    }

    #[test]
    fn test_schema_from_tool_parameters() {
        let params = json!({
            "type": "object",
            "properties": {
                "patient_name": {"type": "string"},
                "dob": {"type": "string"}
            },
            "required": ["patient_name", "dob"]
        });
        let schema = RecordSchema::from_tool_parameters(&params);
        assert_eq!(schema.required(), &["patient_name".to_string(), "dob".to_string()]);

        let empty = RecordSchema::from_tool_parameters(&json!({"type": "object"}));
        assert!(empty.required().is_empty());
    }
}

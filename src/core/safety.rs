//! Safety monitor for crisis-indicating language.
//!
//! The monitor is a pure predicate over a text span. It is intentionally
//! simple: case-insensitive exact phrase containment against a fixed list,
//! with no stemming or fuzzy matching, so every escalation can be traced back
//! to a listed phrase.
//!
//! The [`TextClassifier`] trait is the seam for swapping in a different
//! classifier without touching the session state machine.

use std::fmt;
use std::sync::Arc;

/// Phrases that trigger a safety escalation when spoken by the user.
pub const DEFAULT_CRISIS_PHRASES: &[&str] = &[
    "kill myself",
    "killing myself",
    "end my life",
    "ending my life",
    "take my own life",
    "want to die",
    "wanna die",
    "suicide",
    "suicidal",
    "hurt myself",
    "harm myself",
    "hurting myself",
    "self-harm",
    "self harm",
    "better off dead",
    "no reason to live",
    "not worth living",
    "overdose",
];

/// Capability for deciding whether a user utterance requires escalation.
pub trait TextClassifier: Send + Sync {
    /// Returns true when the text should trigger a safety escalation.
    fn is_crisis(&self, text: &str) -> bool;

    /// Returns a label for what matched, for logging.
    fn matched_indicator(&self, text: &str) -> Option<String> {
        self.is_crisis(text).then(|| "classifier".to_string())
    }
}

/// Shared classifier handle used by the session engine.
pub type SharedClassifier = Arc<dyn TextClassifier>;

/// Keyword-based safety monitor.
///
/// Phrases are stored lowercased; matching lowercases the input and checks
/// plain substring containment.
#[derive(Clone)]
pub struct KeywordSafetyMonitor {
    phrases: Vec<String>,
}

impl KeywordSafetyMonitor {
    /// Create a monitor from an explicit phrase list.
    ///
    /// Empty and whitespace-only phrases are dropped, since they would match
    /// every input.
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list: Vec<String> = Vec::new();
        for phrase in phrases {
            let normalized = phrase.as_ref().trim().to_lowercase();
            if !normalized.is_empty() && !list.contains(&normalized) {
                list.push(normalized);
            }
        }
        Self { phrases: list }
    }

    /// Add phrases on top of the current list.
    pub fn with_extra_phrases<I, S>(mut self, extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for phrase in extra {
            let normalized = phrase.as_ref().trim().to_lowercase();
            if !normalized.is_empty() && !self.phrases.contains(&normalized) {
                self.phrases.push(normalized);
            }
        }
        self
    }

    /// The configured phrases, lowercased.
    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }

    /// Scan `text` and return the first configured phrase it contains.
    pub fn find_match(&self, text: &str) -> Option<&str> {
        if text.is_empty() {
            return None;
        }
        let haystack = text.to_lowercase();
        self.phrases
            .iter()
            .find(|phrase| haystack.contains(phrase.as_str()))
            .map(String::as_str)
    }
}

impl Default for KeywordSafetyMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_CRISIS_PHRASES.iter().copied())
    }
}

impl fmt::Debug for KeywordSafetyMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeywordSafetyMonitor")
            .field("phrases", &self.phrases.len())
            .finish()
    }
}

impl TextClassifier for KeywordSafetyMonitor {
    fn is_crisis(&self, text: &str) -> bool {
        self.find_match(text).is_some()
    }

    fn matched_indicator(&self, text: &str) -> Option<String> {
        self.find_match(text).map(str::to_string)
    }
}
